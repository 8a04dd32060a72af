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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use marlin_cluster_state::index_name::{is_partitioned_index, template_name};
use marlin_cluster_state::resolver::resolve_index_expression;
use marlin_cluster_state::{
    ClusterState, Index, IndexMetadata, IndexMetadataBuilder, MappingMetadata, Metadata,
    SchemaBytes,
};
use marlin_index::IndicesService;
use marlin_mapper::{MapperError, MapperService, MergeReason};
use tracing::{debug, info};

use crate::column_positions::{populate_column_positions, MissingPositionPolicy};
use crate::{ClusterStateTaskExecutor, ClusterTasksResult, MappingUpdateError};

const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// A user-submitted mapping update for one or more indices.
#[derive(Clone, Debug)]
pub struct PutMappingRequest {
    /// Pre-resolved target index. When set, the expression is ignored.
    pub concrete_index: Option<Index>,
    /// Index expression to expand when no concrete index is given.
    pub expression: String,
    /// The submitted schema document.
    pub source: SchemaBytes,
    /// How long to wait for all nodes to acknowledge the new state.
    pub ack_timeout: Duration,
    /// Bound on the time the request may wait in the cluster-state queue.
    pub master_timeout: Option<Duration>,
}

impl PutMappingRequest {
    /// Request targeting whatever `expression` resolves to.
    pub fn new(expression: impl Into<String>, source: SchemaBytes) -> Self {
        PutMappingRequest {
            concrete_index: None,
            expression: expression.into(),
            source,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            master_timeout: None,
        }
    }

    /// Pins the request to one concrete index.
    pub fn with_concrete_index(mut self, index: Index) -> Self {
        self.concrete_index = Some(index);
        self
    }

    /// Overrides the acknowledgement timeout.
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Sets a queue deadline.
    pub fn with_master_timeout(mut self, master_timeout: Duration) -> Self {
        self.master_timeout = Some(master_timeout);
        self
    }
}

/// Batch executor applying user-submitted mapping updates.
///
/// Requests run in submission order and each one observes the committed
/// effects of the requests before it, including within the same batch. A
/// failing request is recorded in its own outcome and the batch moves on.
pub struct PutMappingExecutor {
    indices_service: Arc<IndicesService>,
}

impl PutMappingExecutor {
    /// Creates the executor.
    pub fn new(indices_service: Arc<IndicesService>) -> Self {
        PutMappingExecutor { indices_service }
    }

    fn apply_request(
        &self,
        current_state: &Arc<ClusterState>,
        request: &PutMappingRequest,
        mapper_services: &mut HashMap<Index, MapperService>,
    ) -> Result<Arc<ClusterState>, MappingUpdateError> {
        let concrete_indices = match &request.concrete_index {
            Some(concrete_index) => vec![concrete_index.clone()],
            None => resolve_index_expression(current_state, &request.expression),
        };
        if concrete_indices.is_empty() {
            return Err(MappingUpdateError::IndexNotFound {
                expression: request.expression.clone(),
            });
        }
        for index in &concrete_indices {
            let index_metadata = current_state.metadata().index_safe(index)?;
            if !mapper_services.contains_key(index) {
                let mut mapper_service = self
                    .indices_service
                    .create_index_mapper_service(index_metadata);
                // Seed with the full prior schema so cross-column validation
                // sees every existing column.
                mapper_service
                    .merge_index_metadata(index_metadata, MergeReason::MappingRecovery)?;
                mapper_services.insert(index.clone(), mapper_service);
            }
        }
        self.apply_mapping(
            current_state,
            &request.source,
            &concrete_indices,
            mapper_services,
        )
    }

    fn apply_mapping(
        &self,
        current_state: &Arc<ClusterState>,
        mapping_update_source: &SchemaBytes,
        indices: &[Index],
        mapper_services: &mut HashMap<Index, MapperService>,
    ) -> Result<Arc<ClusterState>, MappingUpdateError> {
        // Dry run first: parse the source once per index and simulate the
        // merge, so the request fails before anything was committed.
        let mut update_list: Vec<Arc<IndexMetadata>> = Vec::with_capacity(indices.len());
        for index in indices {
            // Always resolve the metadata from the threaded state: an
            // earlier request in the batch may have replaced it.
            let index_metadata = current_state.metadata().index_safe(index)?.clone();
            let mapper_service = cached_mapper_service(mapper_services, index)?;
            let candidate_mapper = mapper_service.parse(mapping_update_source)?;
            if let Some(existing_mapper) = mapper_service.document_mapper() {
                existing_mapper.merge(candidate_mapper.mapping())?;
            }
            update_list.push(index_metadata);
        }

        let mut metadata_builder = Metadata::builder_from(current_state.metadata());
        let mut updated = false;
        for index_metadata in &update_list {
            let index = index_metadata.index().clone();

            // A partitioned index inherits its column positions from the
            // parent template, which holds the latest authoritative ones.
            let mut populated_source_map = None;
            if is_partitioned_index(index.name()) {
                if let Some(parent_template_name) = template_name(index.name()) {
                    let template = current_state
                        .metadata()
                        .template(&parent_template_name)
                        .ok_or_else(|| MappingUpdateError::MissingTemplate {
                            template_name: parent_template_name.clone(),
                            index_name: index.name().to_string(),
                        })?;
                    let mut source_map =
                        mapping_update_source.to_map().map_err(MapperError::from)?;
                    populate_column_positions(
                        &mut source_map,
                        template.mapping(),
                        MissingPositionPolicy::for_index(index_metadata),
                    )?;
                    populated_source_map = Some(source_map);
                }
            }

            let mapper_service = cached_mapper_service_mut(mapper_services, &index)?;
            let existing_source = mapper_service
                .document_mapper()
                .map(|document_mapper| document_mapper.mapping_source().clone());
            let merged_mapper = match &populated_source_map {
                Some(source_map) => {
                    mapper_service.merge_map(source_map, MergeReason::MappingUpdate)?
                }
                None => {
                    mapper_service.merge_source(mapping_update_source, MergeReason::MappingUpdate)?
                }
            };
            let updated_source = merged_mapper.mapping_source().clone();

            let updated_mapping = match &existing_source {
                Some(existing_source) if *existing_source == updated_source => false,
                Some(_) => {
                    info!(index = %index, "update_mapping");
                    true
                }
                None => {
                    info!(index = %index, "create_mapping");
                    true
                }
            };

            let mut index_metadata_builder = IndexMetadataBuilder::from_metadata(index_metadata);
            if let Some(document_mapper) = mapper_service.document_mapper() {
                index_metadata_builder.put_mapping(MappingMetadata::new(
                    document_mapper.mapping_source().clone(),
                ));
            }
            if updated_mapping {
                let next_mapping_version = index_metadata_builder.mapping_version() + 1;
                index_metadata_builder.set_mapping_version(next_mapping_version);
            }
            // Committing the builder bumps the per-index metadata version,
            // so the mapping version increment must stay above this line.
            metadata_builder.put(index_metadata_builder);
            updated |= updated_mapping;
        }
        if updated {
            Ok(ClusterState::builder(current_state)
                .metadata(metadata_builder.build())
                .build())
        } else {
            Ok(current_state.clone())
        }
    }
}

impl ClusterStateTaskExecutor for PutMappingExecutor {
    type Task = PutMappingRequest;

    fn execute(
        &self,
        current_state: Arc<ClusterState>,
        tasks: Vec<PutMappingRequest>,
    ) -> anyhow::Result<ClusterTasksResult> {
        // Ephemeral mapper services are cached across the requests of this
        // batch and dropped with the map on every exit path.
        let mut mapper_services: HashMap<Index, MapperService> = HashMap::new();
        let mut state = current_state;
        let mut outcomes = Vec::with_capacity(tasks.len());
        for request in &tasks {
            match self.apply_request(&state, request, &mut mapper_services) {
                Ok(new_state) => {
                    state = new_state;
                    outcomes.push(Ok(()));
                }
                Err(error) => {
                    debug!(expression = %request.expression, error = %error, "put-mapping request failed");
                    outcomes.push(Err(error));
                }
            }
        }
        Ok(ClusterTasksResult {
            new_state: state,
            outcomes,
        })
    }
}

fn cached_mapper_service<'a>(
    mapper_services: &'a HashMap<Index, MapperService>,
    index: &Index,
) -> Result<&'a MapperService, MappingUpdateError> {
    mapper_services
        .get(index)
        .ok_or_else(|| mapper_cache_out_of_sync(index))
}

fn cached_mapper_service_mut<'a>(
    mapper_services: &'a mut HashMap<Index, MapperService>,
    index: &Index,
) -> Result<&'a mut MapperService, MappingUpdateError> {
    mapper_services
        .get_mut(index)
        .ok_or_else(|| mapper_cache_out_of_sync(index))
}

fn mapper_cache_out_of_sync(index: &Index) -> MappingUpdateError {
    MappingUpdateError::Internal {
        message: format!("no mapper service prepared for index {index}"),
        cause: anyhow::anyhow!("mapper service cache out of sync"),
    }
}

#[cfg(test)]
mod tests {
    use marlin_cluster_state::index_name::{partition_index_name, template_name_for_table};
    use marlin_cluster_state::{IndexTemplateMetadata, IndexVersion};
    use marlin_mapper::DocumentMapper;

    use super::*;

    const MAPPING_A: &str = r#"{"default":{"properties":{"a":{"type":"keyword"}}}}"#;
    const MAPPING_AB: &str =
        r#"{"default":{"properties":{"a":{"type":"keyword"},"b":{"type":"long"}}}}"#;
    const MAPPING_A_CONFLICT: &str = r#"{"default":{"properties":{"a":{"type":"long"}}}}"#;

    fn source(json: &str) -> SchemaBytes {
        SchemaBytes::from_json_str(json).unwrap()
    }

    fn state_with_empty_index(name: &str, uuid: &str) -> Arc<ClusterState> {
        let mut metadata_builder = Metadata::builder();
        metadata_builder.put_index_metadata(IndexMetadata::for_test(name, uuid));
        ClusterState::new(metadata_builder.build())
    }

    fn executor() -> (PutMappingExecutor, Arc<IndicesService>) {
        let indices_service = Arc::new(IndicesService::new());
        (PutMappingExecutor::new(indices_service.clone()), indices_service)
    }

    fn mapping_of(state: &ClusterState, index_name: &str) -> DocumentMapper {
        let mapping_metadata = state
            .metadata()
            .index(index_name)
            .unwrap()
            .mapping()
            .unwrap()
            .clone();
        DocumentMapper::parse(mapping_metadata.source()).unwrap()
    }

    #[test]
    fn test_first_mapping_install_bumps_version_to_one() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let state = state_with_empty_index("t1", "uuid-1");

        let result = put_mapping_executor.execute(
            state.clone(),
            vec![PutMappingRequest::new("t1", source(MAPPING_A))],
        )?;

        assert!(result.outcomes[0].is_ok());
        let index_metadata = result.new_state.metadata().index("t1").unwrap();
        assert_eq!(index_metadata.mapping_version(), 1);
        let mapping = mapping_of(&result.new_state, "t1");
        assert_eq!(mapping.mapping().property("a").unwrap().column_type(), "keyword");
        Ok(())
    }

    #[test]
    fn test_identical_put_is_a_no_op() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let state = state_with_empty_index("t1", "uuid-1");

        let first = put_mapping_executor.execute(
            state,
            vec![PutMappingRequest::new("t1", source(MAPPING_A))],
        )?;
        let second = put_mapping_executor.execute(
            first.new_state.clone(),
            vec![PutMappingRequest::new("t1", source(MAPPING_A))],
        )?;

        assert!(second.outcomes[0].is_ok());
        assert!(Arc::ptr_eq(&second.new_state, &first.new_state));
        let index_metadata = second.new_state.metadata().index("t1").unwrap();
        assert_eq!(index_metadata.mapping_version(), 1);
        Ok(())
    }

    #[test]
    fn test_additive_change_bumps_version_again() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let state = state_with_empty_index("t1", "uuid-1");

        let first = put_mapping_executor.execute(
            state,
            vec![PutMappingRequest::new("t1", source(MAPPING_A))],
        )?;
        let second = put_mapping_executor.execute(
            first.new_state,
            vec![PutMappingRequest::new("t1", source(MAPPING_AB))],
        )?;

        let index_metadata = second.new_state.metadata().index("t1").unwrap();
        assert_eq!(index_metadata.mapping_version(), 2);
        let mapping = mapping_of(&second.new_state, "t1");
        assert!(mapping.mapping().property("a").is_some());
        assert!(mapping.mapping().property("b").is_some());
        Ok(())
    }

    #[test]
    fn test_conflicting_request_fails_without_contaminating_the_batch() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let mut metadata_builder = Metadata::builder();
        metadata_builder.put_index_metadata(IndexMetadata::for_test("t1", "uuid-1"));
        metadata_builder.put_index_metadata(IndexMetadata::for_test("t2", "uuid-2"));
        let state = ClusterState::new(metadata_builder.build());

        let seeded = put_mapping_executor.execute(
            state,
            vec![PutMappingRequest::new("t1", source(MAPPING_A))],
        )?;

        // One batch: a conflicting update on t1 followed by a valid one on t2.
        let result = put_mapping_executor.execute(
            seeded.new_state.clone(),
            vec![
                PutMappingRequest::new("t1", source(MAPPING_A_CONFLICT)),
                PutMappingRequest::new("t2", source(MAPPING_A)),
            ],
        )?;

        assert!(matches!(
            result.outcomes[0],
            Err(MappingUpdateError::Mapper(MapperError::Validation { .. }))
        ));
        assert!(result.outcomes[1].is_ok());

        // t1 is exactly as the earlier batch left it.
        let t1 = result.new_state.metadata().index("t1").unwrap();
        assert_eq!(t1.mapping_version(), 1);
        assert_eq!(
            mapping_of(&result.new_state, "t1")
                .mapping()
                .property("a")
                .unwrap()
                .column_type(),
            "keyword"
        );
        // t2 got its mapping regardless of the failure before it.
        assert_eq!(
            result.new_state.metadata().index("t2").unwrap().mapping_version(),
            1
        );
        Ok(())
    }

    #[test]
    fn test_requests_in_a_batch_observe_prior_effects() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let state = state_with_empty_index("t1", "uuid-1");

        let result = put_mapping_executor.execute(
            state,
            vec![
                PutMappingRequest::new("t1", source(MAPPING_A)),
                PutMappingRequest::new("t1", source(MAPPING_AB)),
            ],
        )?;

        assert!(result.outcomes.iter().all(|outcome| outcome.is_ok()));
        let index_metadata = result.new_state.metadata().index("t1").unwrap();
        // Two effective changes in one batch.
        assert_eq!(index_metadata.mapping_version(), 2);
        let mapping = mapping_of(&result.new_state, "t1");
        assert_eq!(mapping.mapping().properties().len(), 2);
        Ok(())
    }

    #[test]
    fn test_unknown_expression_is_a_request_failure() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let state = state_with_empty_index("t1", "uuid-1");

        let result = put_mapping_executor.execute(
            state.clone(),
            vec![PutMappingRequest::new("missing", source(MAPPING_A))],
        )?;

        assert!(matches!(
            result.outcomes[0],
            Err(MappingUpdateError::IndexNotFound { .. })
        ));
        assert!(Arc::ptr_eq(&result.new_state, &state));
        Ok(())
    }

    #[test]
    fn test_concrete_index_with_stale_uuid_is_a_state_inconsistency() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let state = state_with_empty_index("t1", "uuid-1");

        let request = PutMappingRequest::new("t1", source(MAPPING_A))
            .with_concrete_index(Index::new("t1", "uuid-stale"));
        let result = put_mapping_executor.execute(state.clone(), vec![request])?;

        assert!(matches!(
            result.outcomes[0],
            Err(MappingUpdateError::StateInconsistency { .. })
        ));
        assert!(Arc::ptr_eq(&result.new_state, &state));
        Ok(())
    }

    #[test]
    fn test_ephemeral_mapper_services_are_not_registered() -> anyhow::Result<()> {
        let (put_mapping_executor, indices_service) = executor();
        let state = state_with_empty_index("t1", "uuid-1");

        put_mapping_executor.execute(
            state,
            vec![PutMappingRequest::new("t1", source(MAPPING_A))],
        )?;
        assert!(indices_service.is_empty());
        Ok(())
    }

    fn partitioned_state(
        table: &str,
        ident: &str,
        template_json: &str,
        version_created: Option<IndexVersion>,
    ) -> (Arc<ClusterState>, String) {
        let index_name = partition_index_name(table, ident);
        let mut index_metadata_builder =
            IndexMetadata::builder(Index::new(index_name.clone(), "uuid-p1"));
        if let Some(version) = version_created {
            index_metadata_builder.set_version_created(version);
        }
        let template_name = template_name_for_table(table);
        let mut metadata_builder = Metadata::builder();
        metadata_builder.put_index_metadata(index_metadata_builder.build());
        metadata_builder.put_template(IndexTemplateMetadata::new(
            template_name.clone(),
            vec![format!("{template_name}*")],
            source(template_json),
        ));
        (ClusterState::new(metadata_builder.build()), index_name)
    }

    #[test]
    fn test_partitioned_index_inherits_template_positions() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let (state, index_name) = partitioned_state(
            "parted",
            "p1",
            r#"{"default":{"properties":{"a":{"type":"keyword","position":1},"b":{"type":"long","position":2}}}}"#,
            None,
        );

        // Submission order differs from template order on purpose.
        let request = PutMappingRequest::new(
            index_name.clone(),
            source(r#"{"default":{"properties":{"b":{"type":"long"},"a":{"type":"keyword"}}}}"#),
        );
        let result = put_mapping_executor.execute(state, vec![request])?;

        assert!(result.outcomes[0].is_ok());
        let mapping = mapping_of(&result.new_state, &index_name);
        assert_eq!(mapping.mapping().property("a").unwrap().position(), Some(1));
        assert_eq!(mapping.mapping().property("b").unwrap().position(), Some(2));
        Ok(())
    }

    #[test]
    fn test_partitioned_index_with_position_hole_fails_for_current_indices() -> anyhow::Result<()>
    {
        let (put_mapping_executor, _) = executor();
        let (state, index_name) = partitioned_state(
            "parted",
            "p1",
            r#"{"default":{"properties":{"a":{"type":"keyword"}}}}"#,
            None,
        );

        let request = PutMappingRequest::new(index_name, source(MAPPING_A));
        let result = put_mapping_executor.execute(state.clone(), vec![request])?;

        assert!(matches!(
            result.outcomes[0],
            Err(MappingUpdateError::MissingColumnPosition { .. })
        ));
        assert!(Arc::ptr_eq(&result.new_state, &state));
        Ok(())
    }

    #[test]
    fn test_partitioned_index_with_position_hole_is_tolerated_for_legacy_indices(
    ) -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let (state, index_name) = partitioned_state(
            "parted",
            "p1",
            r#"{"default":{"properties":{"a":{"type":"keyword"}}}}"#,
            Some(IndexVersion(5_00_00_99)),
        );

        let request = PutMappingRequest::new(index_name.clone(), source(MAPPING_A));
        let result = put_mapping_executor.execute(state, vec![request])?;

        assert!(result.outcomes[0].is_ok());
        let mapping = mapping_of(&result.new_state, &index_name);
        assert_eq!(mapping.mapping().property("a").unwrap().position(), None);
        Ok(())
    }

    #[test]
    fn test_partitioned_index_without_template_is_a_failure() -> anyhow::Result<()> {
        let (put_mapping_executor, _) = executor();
        let index_name = partition_index_name("parted", "p1");
        let state = state_with_empty_index(&index_name, "uuid-p1");

        let request = PutMappingRequest::new(index_name, source(MAPPING_A));
        let result = put_mapping_executor.execute(state.clone(), vec![request])?;

        assert!(matches!(
            result.outcomes[0],
            Err(MappingUpdateError::MissingTemplate { .. })
        ));
        assert!(Arc::ptr_eq(&result.new_state, &state));
        Ok(())
    }
}
