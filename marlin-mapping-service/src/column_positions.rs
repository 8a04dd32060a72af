// Copyright (C) 2024 Marlin, Inc.
//
// Marlin is offered under the AGPL v3.0 and as commercial software.
// For commercial licensing, contact us at hello@marlin.io.
//
// AGPL:
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use marlin_cluster_state::{IndexMetadata, IndexVersion, SchemaBytes, SchemaMap};
use marlin_mapper::MapperError;
use serde_json::Value as JsonValue;

use crate::MappingUpdateError;

/// What to do when a template property carries no `position`.
///
/// Templates written by current nodes always carry positions, so a hole is a
/// hard error. Templates last written by nodes predating position tracking
/// may legitimately have holes; for indices created back then the hole is
/// skipped and the property keeps whatever position it has.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingPositionPolicy {
    /// Fail the update on a missing template position.
    Strict,
    /// Skip properties whose template position is missing.
    Lenient,
}

impl MissingPositionPolicy {
    /// The policy appropriate for an index, based on the engine version that
    /// created it.
    pub fn for_index(index_metadata: &IndexMetadata) -> Self {
        if index_metadata.version_created() < IndexVersion::COLUMN_POSITION_TRACKING {
            MissingPositionPolicy::Lenient
        } else {
            MissingPositionPolicy::Strict
        }
    }
}

/// Overwrites every `position` in `index_mapping` with the position the
/// template defines for the property of the same name.
///
/// Template and index mappings of one partitioned table are kept consistent
/// by construction, so this simply stamps the template values over the tree,
/// resolving any duplicate or stale positions the submitted mapping carries.
pub fn populate_column_positions(
    index_mapping: &mut SchemaMap,
    template_mapping: &SchemaBytes,
    policy: MissingPositionPolicy,
) -> Result<(), MappingUpdateError> {
    let template_map = template_mapping.to_map().map_err(MapperError::from)?;
    populate_column_positions_impl(
        unwrap_default_mut(index_mapping),
        unwrap_default(&template_map),
        policy,
    )
}

fn populate_column_positions_impl(
    index_mapping: &mut SchemaMap,
    template_mapping: &SchemaMap,
    policy: MissingPositionPolicy,
) -> Result<(), MappingUpdateError> {
    let Some(index_properties) = index_mapping
        .get_mut("properties")
        .and_then(JsonValue::as_object_mut)
    else {
        return Ok(());
    };
    let empty = SchemaMap::new();
    let template_properties = template_mapping
        .get("properties")
        .and_then(JsonValue::as_object)
        .unwrap_or(&empty);

    for (name, value) in index_properties.iter_mut() {
        let Some(index_column) = value.as_object_mut() else {
            continue;
        };
        let template_column = template_properties
            .get(name)
            .and_then(JsonValue::as_object)
            .unwrap_or(&empty);

        // Collection columns keep their element definition under `inner`.
        let template_column = unwrap_inner(template_column);
        let index_column = unwrap_inner_mut(index_column);

        match template_column.get("position").and_then(JsonValue::as_i64) {
            Some(position) => {
                index_column.insert("position".to_string(), JsonValue::Number(position.into()));
            }
            None => {
                if policy == MissingPositionPolicy::Strict {
                    return Err(MappingUpdateError::MissingColumnPosition {
                        column: name.clone(),
                    });
                }
            }
        }
        populate_column_positions_impl(index_column, template_column, policy)?;
    }
    Ok(())
}

fn unwrap_default(map: &SchemaMap) -> &SchemaMap {
    map.get("default")
        .and_then(JsonValue::as_object)
        .unwrap_or(map)
}

fn unwrap_default_mut(map: &mut SchemaMap) -> &mut SchemaMap {
    let has_default = matches!(map.get("default"), Some(JsonValue::Object(_)));
    if has_default {
        match map.get_mut("default") {
            Some(JsonValue::Object(default)) => default,
            _ => unreachable!("checked right above"),
        }
    } else {
        map
    }
}

fn unwrap_inner(column: &SchemaMap) -> &SchemaMap {
    column
        .get("inner")
        .and_then(JsonValue::as_object)
        .unwrap_or(column)
}

fn unwrap_inner_mut(column: &mut SchemaMap) -> &mut SchemaMap {
    let has_inner = matches!(column.get("inner"), Some(JsonValue::Object(_)));
    if has_inner {
        match column.get_mut("inner") {
            Some(JsonValue::Object(inner)) => inner,
            _ => unreachable!("checked right above"),
        }
    } else {
        column
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(json: &str) -> SchemaMap {
        match serde_json::from_str::<JsonValue>(json).unwrap() {
            JsonValue::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    fn template(json: &str) -> SchemaBytes {
        SchemaBytes::from_json_str(json).unwrap()
    }

    fn position_of<'a>(map: &'a SchemaMap, path: &[&str]) -> Option<i64> {
        let mut column = unwrap_default(map);
        for (step, name) in path.iter().enumerate() {
            let properties = column.get("properties")?.as_object()?;
            column = properties.get(*name)?.as_object()?;
            column = unwrap_inner(column);
            if step + 1 == path.len() {
                return column.get("position")?.as_i64();
            }
        }
        None
    }

    #[test]
    fn test_positions_are_stamped_from_the_template() {
        let mut index_mapping = tree(
            r#"{"default":{"properties":{"b":{"type":"long"},"a":{"type":"keyword"}}}}"#,
        );
        let template_mapping = template(
            r#"{"default":{"properties":{"a":{"type":"keyword","position":1},"b":{"type":"long","position":2}}}}"#,
        );
        populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Strict,
        )
        .unwrap();
        assert_eq!(position_of(&index_mapping, &["a"]), Some(1));
        assert_eq!(position_of(&index_mapping, &["b"]), Some(2));
    }

    #[test]
    fn test_template_position_overrides_submitted_position() {
        let mut index_mapping =
            tree(r#"{"default":{"properties":{"a":{"type":"keyword","position":9}}}}"#);
        let template_mapping =
            template(r#"{"default":{"properties":{"a":{"type":"keyword","position":1}}}}"#);
        populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Strict,
        )
        .unwrap();
        assert_eq!(position_of(&index_mapping, &["a"]), Some(1));
    }

    #[test]
    fn test_nested_object_properties_are_stamped() {
        let mut index_mapping = tree(
            r#"{"default":{"properties":{"o":{"type":"object","properties":{"x":{"type":"long"}}}}}}"#,
        );
        let template_mapping = template(
            r#"{"default":{"properties":{"o":{"type":"object","position":1,"properties":{"x":{"type":"long","position":2}}}}}}"#,
        );
        populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Strict,
        )
        .unwrap();
        assert_eq!(position_of(&index_mapping, &["o"]), Some(1));
        assert_eq!(position_of(&index_mapping, &["o", "x"]), Some(2));
    }

    #[test]
    fn test_collection_columns_are_stamped_through_inner() {
        let mut index_mapping = tree(
            r#"{"default":{"properties":{"tags":{"type":"array","inner":{"type":"keyword"}}}}}"#,
        );
        let template_mapping = template(
            r#"{"default":{"properties":{"tags":{"type":"array","inner":{"type":"keyword","position":3}}}}}"#,
        );
        populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Strict,
        )
        .unwrap();
        assert_eq!(position_of(&index_mapping, &["tags"]), Some(3));
    }

    #[test]
    fn test_missing_template_position_is_an_error_under_strict() {
        let mut index_mapping = tree(r#"{"default":{"properties":{"a":{"type":"keyword"}}}}"#);
        let template_mapping = template(r#"{"default":{"properties":{"a":{"type":"keyword"}}}}"#);
        let error = populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Strict,
        )
        .unwrap_err();
        assert!(matches!(
            error,
            MappingUpdateError::MissingColumnPosition { .. }
        ));
    }

    #[test]
    fn test_missing_template_position_is_skipped_under_lenient() {
        let mut index_mapping = tree(r#"{"default":{"properties":{"a":{"type":"keyword"}}}}"#);
        let template_mapping = template(r#"{"default":{"properties":{"a":{"type":"keyword"}}}}"#);
        populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Lenient,
        )
        .unwrap();
        assert_eq!(position_of(&index_mapping, &["a"]), None);
    }

    #[test]
    fn test_property_unknown_to_the_template_is_left_alone_under_lenient() {
        let mut index_mapping = tree(
            r#"{"default":{"properties":{"a":{"type":"keyword"},"extra":{"type":"long"}}}}"#,
        );
        let template_mapping =
            template(r#"{"default":{"properties":{"a":{"type":"keyword","position":1}}}}"#);
        populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Lenient,
        )
        .unwrap();
        assert_eq!(position_of(&index_mapping, &["a"]), Some(1));
        assert_eq!(position_of(&index_mapping, &["extra"]), None);
    }

    #[test]
    fn test_mapping_without_properties_is_a_no_op() {
        let mut index_mapping = tree(r#"{"default":{}}"#);
        let template_mapping =
            template(r#"{"default":{"properties":{"a":{"type":"keyword","position":1}}}}"#);
        populate_column_positions(
            &mut index_mapping,
            &template_mapping,
            MissingPositionPolicy::Strict,
        )
        .unwrap();
        assert_eq!(index_mapping, tree(r#"{"default":{}}"#));
    }

    #[test]
    fn test_policy_for_index_tracks_creating_version() {
        use marlin_cluster_state::Index;

        let current = IndexMetadata::for_test("t1", "uuid-1");
        assert_eq!(
            MissingPositionPolicy::for_index(&current),
            MissingPositionPolicy::Strict
        );

        let mut builder = IndexMetadata::builder(Index::new("t2", "uuid-2"));
        builder.set_version_created(IndexVersion(5_00_00_99));
        let legacy = builder.build();
        assert_eq!(
            MissingPositionPolicy::for_index(&legacy),
            MissingPositionPolicy::Lenient
        );
    }
}
