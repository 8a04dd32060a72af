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

use std::collections::BTreeMap;

use marlin_cluster_state::{SchemaBytes, SchemaMap};
use serde_json::Value as JsonValue;

use crate::mapper_service::MergeReason;
use crate::MapperError;

/// Root key conventionally wrapping a schema document.
const DEFAULT_MAPPING_TYPE: &str = "default";

/// Column types the engine knows how to index.
const COLUMN_TYPES: &[&str] = &[
    "array",
    "boolean",
    "byte",
    "date",
    "double",
    "float",
    "geo_point",
    "geo_shape",
    "integer",
    "ip",
    "keyword",
    "long",
    "object",
    "short",
    "text",
];

/// A parsed schema document.
///
/// Mappings are value types: merging two mappings produces a third one and
/// leaves both inputs untouched. Serialization is canonical (wrapped under
/// `default`, sorted property names, fixed attribute order), so two equal
/// mappings always re-encode to byte-identical [`SchemaBytes`].
#[derive(Clone, Debug, PartialEq)]
pub struct Mapping {
    properties: BTreeMap<String, Property>,
    root_attributes: BTreeMap<String, JsonValue>,
}

/// One column definition inside a [`Mapping`].
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    column_type: String,
    position: Option<i64>,
    inner: Option<Box<Property>>,
    properties: BTreeMap<String, Property>,
    attributes: BTreeMap<String, JsonValue>,
}

impl Mapping {
    /// Parses a schema tree, accepting an optional `default` root wrapper.
    pub fn parse(root: &SchemaMap) -> Result<Mapping, MapperError> {
        let body = unwrap_default(root);
        let mut properties = BTreeMap::new();
        let mut root_attributes = BTreeMap::new();
        for (key, value) in body {
            if key == "properties" {
                let property_map = value.as_object().ok_or_else(|| {
                    MapperError::parse("`properties` must be a JSON object")
                })?;
                for (name, property_value) in property_map {
                    properties.insert(name.clone(), Property::parse(name, property_value)?);
                }
            } else {
                root_attributes.insert(key.clone(), value.clone());
            }
        }
        Ok(Mapping {
            properties,
            root_attributes,
        })
    }

    /// Decodes and parses a compressed schema document.
    pub fn from_source(source: &SchemaBytes) -> Result<Mapping, MapperError> {
        Mapping::parse(&source.to_map()?)
    }

    /// The columns of this mapping, by name.
    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }

    /// Looks a top-level column up by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Merges `incoming` into this mapping.
    ///
    /// Under [`MergeReason::MappingUpdate`] the merge validates that no
    /// existing column changes its type. Under
    /// [`MergeReason::MappingRecovery`] the incoming document is trusted:
    /// it carries a previously committed state, not a user proposal.
    pub fn merge(&self, incoming: &Mapping, reason: MergeReason) -> Result<Mapping, MapperError> {
        let mut root_attributes = self.root_attributes.clone();
        root_attributes.extend(
            incoming
                .root_attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        let properties = merge_properties(&self.properties, &incoming.properties, reason, "")?;
        Ok(Mapping {
            properties,
            root_attributes,
        })
    }

    /// Renders the canonical schema tree, wrapped under `default`.
    pub fn to_schema_map(&self) -> SchemaMap {
        let mut body = SchemaMap::new();
        for (key, value) in &self.root_attributes {
            body.insert(key.clone(), value.clone());
        }
        if !self.properties.is_empty() {
            let mut property_map = SchemaMap::new();
            for (name, property) in &self.properties {
                property_map.insert(name.clone(), JsonValue::Object(property.to_schema_map()));
            }
            body.insert("properties".to_string(), JsonValue::Object(property_map));
        }
        let mut root = SchemaMap::new();
        root.insert(DEFAULT_MAPPING_TYPE.to_string(), JsonValue::Object(body));
        root
    }

    /// Renders the canonical compressed source of this mapping.
    pub fn mapping_source(&self) -> Result<SchemaBytes, MapperError> {
        Ok(SchemaBytes::from_map(&self.to_schema_map())?)
    }
}

impl Property {
    fn parse(name: &str, value: &JsonValue) -> Result<Property, MapperError> {
        let map = value.as_object().ok_or_else(|| {
            MapperError::parse(format!("definition of column [{name}] must be a JSON object"))
        })?;
        let mut column_type = None;
        let mut position = None;
        let mut inner = None;
        let mut properties = BTreeMap::new();
        let mut attributes = BTreeMap::new();
        for (key, attribute) in map {
            match key.as_str() {
                "type" => {
                    let type_name = attribute.as_str().ok_or_else(|| {
                        MapperError::parse(format!("type of column [{name}] must be a string"))
                    })?;
                    column_type = Some(type_name.to_string());
                }
                "position" => {
                    let value = attribute.as_i64().ok_or_else(|| {
                        MapperError::parse(format!(
                            "position of column [{name}] must be an integer"
                        ))
                    })?;
                    position = Some(value);
                }
                "inner" => {
                    inner = Some(Box::new(Property::parse(name, attribute)?));
                }
                "properties" => {
                    let property_map = attribute.as_object().ok_or_else(|| {
                        MapperError::parse(format!(
                            "properties of column [{name}] must be a JSON object"
                        ))
                    })?;
                    for (child_name, child_value) in property_map {
                        properties
                            .insert(child_name.clone(), Property::parse(child_name, child_value)?);
                    }
                }
                _ => {
                    attributes.insert(key.clone(), attribute.clone());
                }
            }
        }
        // A column declaring children but no type is an object column.
        let column_type = column_type.unwrap_or_else(|| "object".to_string());
        if !COLUMN_TYPES.contains(&column_type.as_str()) {
            return Err(MapperError::parse(format!(
                "no handler for type [{column_type}] declared on column [{name}]"
            )));
        }
        Ok(Property {
            column_type,
            position,
            inner,
            properties,
            attributes,
        })
    }

    /// The column type name.
    pub fn column_type(&self) -> &str {
        &self.column_type
    }

    /// The column position, if one is assigned.
    pub fn position(&self) -> Option<i64> {
        self.position
    }

    /// The element definition of a collection column.
    pub fn inner(&self) -> Option<&Property> {
        self.inner.as_deref()
    }

    /// Child columns of an object column.
    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }

    fn merge(
        &self,
        incoming: &Property,
        reason: MergeReason,
        path: &str,
    ) -> Result<Property, MapperError> {
        if self.column_type != incoming.column_type {
            if reason == MergeReason::MappingUpdate {
                return Err(MapperError::validation(format!(
                    "column [{path}] cannot be changed from type [{}] to [{}]",
                    self.column_type, incoming.column_type
                )));
            }
            return Ok(incoming.clone());
        }
        let position = incoming.position.or(self.position);
        let inner = match (&self.inner, &incoming.inner) {
            (Some(existing), Some(incoming_inner)) => {
                Some(Box::new(existing.merge(incoming_inner, reason, path)?))
            }
            (Some(existing), None) => Some(existing.clone()),
            (None, Some(incoming_inner)) => Some(incoming_inner.clone()),
            (None, None) => None,
        };
        let properties = merge_properties(&self.properties, &incoming.properties, reason, path)?;
        let mut attributes = self.attributes.clone();
        attributes.extend(
            incoming
                .attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Ok(Property {
            column_type: self.column_type.clone(),
            position,
            inner,
            properties,
            attributes,
        })
    }

    fn to_schema_map(&self) -> SchemaMap {
        let mut map = SchemaMap::new();
        map.insert(
            "type".to_string(),
            JsonValue::String(self.column_type.clone()),
        );
        if let Some(position) = self.position {
            map.insert("position".to_string(), JsonValue::Number(position.into()));
        }
        if let Some(inner) = &self.inner {
            map.insert("inner".to_string(), JsonValue::Object(inner.to_schema_map()));
        }
        for (key, value) in &self.attributes {
            map.insert(key.clone(), value.clone());
        }
        if !self.properties.is_empty() {
            let mut property_map = SchemaMap::new();
            for (name, property) in &self.properties {
                property_map.insert(name.clone(), JsonValue::Object(property.to_schema_map()));
            }
            map.insert("properties".to_string(), JsonValue::Object(property_map));
        }
        map
    }
}

fn merge_properties(
    existing: &BTreeMap<String, Property>,
    incoming: &BTreeMap<String, Property>,
    reason: MergeReason,
    path: &str,
) -> Result<BTreeMap<String, Property>, MapperError> {
    let mut merged = existing.clone();
    for (name, incoming_property) in incoming {
        let child_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}.{name}")
        };
        let merged_property = match merged.get(name) {
            Some(existing_property) => {
                existing_property.merge(incoming_property, reason, &child_path)?
            }
            None => incoming_property.clone(),
        };
        merged.insert(name.clone(), merged_property);
    }
    Ok(merged)
}

fn unwrap_default(map: &SchemaMap) -> &SchemaMap {
    map.get(DEFAULT_MAPPING_TYPE)
        .and_then(|value| value.as_object())
        .unwrap_or(map)
}
