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
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use itertools::Itertools;
use marlin_cluster_state::{
    ClusterState, Index, IndexMetadataBuilder, MappingMetadata, Metadata,
};
use marlin_index::{IndexRemovalReason, IndexService, IndicesService};
use marlin_mapper::MergeReason;
use tracing::{debug, warn};

use crate::{ClusterStateTaskExecutor, ClusterTasksResult};

/// Asks the master to re-synchronize cluster metadata with the mapping a
/// node actually has installed for an index.
#[derive(Clone, Debug)]
pub struct RefreshTask {
    /// Name of the index to inspect.
    pub index_name: String,
    /// UUID of the index incarnation the sender was looking at. A task whose
    /// UUID no longer matches the metadata is silently discarded.
    pub index_uuid: String,
}

impl fmt::Display for RefreshTask {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "[{}][{}]", self.index_name, self.index_uuid)
    }
}

/// Batch executor reconciling cluster metadata with locally installed
/// mappings.
///
/// Divergence is not an error: it is the signal to emit a new cluster state
/// carrying what the mapper actually holds. The mapping version is left
/// alone on purpose: a refresh reports reality, it does not define an
/// update.
pub struct RefreshExecutor {
    indices_service: Arc<IndicesService>,
}

impl RefreshExecutor {
    /// Creates the executor.
    pub fn new(indices_service: Arc<IndicesService>) -> Self {
        RefreshExecutor { indices_service }
    }

    /// Applies all queued refresh tasks in one pass, so several tasks on the
    /// same index cost a single on-demand index construction and the whole
    /// batch produces at most one new cluster state.
    fn execute_refresh(
        &self,
        current_state: &Arc<ClusterState>,
        all_tasks: &[RefreshTask],
    ) -> anyhow::Result<Arc<ClusterState>> {
        let tasks_per_index: HashMap<&str, Vec<&RefreshTask>> = all_tasks
            .iter()
            .map(|task| (task.index_name.as_str(), task))
            .into_group_map();

        let mut dirty = false;
        let mut metadata_builder = Metadata::builder_from(current_state.metadata());

        for (index_name, index_tasks) in tasks_per_index {
            let Some(index_metadata) = metadata_builder.index(index_name).cloned() else {
                // Index got deleted on us, ignore.
                debug!(index = index_name, "ignoring tasks - index metadata doesn't exist");
                continue;
            };
            let index = index_metadata.index().clone();
            let mut has_task_with_right_uuid = false;
            for task in &index_tasks {
                if index_metadata.is_same_uuid(&task.index_uuid) {
                    has_task_with_right_uuid = true;
                } else {
                    debug!(index = %index, task = %task, "ignoring task - index metadata doesn't match task uuid");
                }
            }
            if !has_task_with_right_uuid {
                continue;
            }

            // Use the locally open index if there is one; otherwise
            // construct one transiently and prime its mapper with the
            // mapping currently recorded in the metadata.
            let mut transient_index = None;
            let index_service = match self.indices_service.index_service(&index) {
                Some(index_service) => index_service,
                None => {
                    let index_service = self
                        .indices_service
                        .create_index(&index_metadata)
                        .with_context(|| {
                            format!("failed to create index {index} for mapping processing")
                        })?;
                    transient_index =
                        Some(RemoveIndexGuard::new(&self.indices_service, index.clone()));
                    index_service
                        .merge_index_metadata(&index_metadata, MergeReason::MappingRecovery)
                        .with_context(|| format!("failed to recover mapping of index {index}"))?;
                    index_service
                }
            };

            let mut index_metadata_builder = IndexMetadataBuilder::from_metadata(&index_metadata);
            let index_dirty = refresh_index_mapping(&index_service, &mut index_metadata_builder);
            if index_dirty {
                metadata_builder.put(index_metadata_builder);
                dirty = true;
            }
            drop(transient_index);
        }

        if !dirty {
            return Ok(current_state.clone());
        }
        Ok(ClusterState::builder(current_state)
            .metadata(metadata_builder.build())
            .build())
    }
}

impl ClusterStateTaskExecutor for RefreshExecutor {
    type Task = RefreshTask;

    fn execute(
        &self,
        current_state: Arc<ClusterState>,
        tasks: Vec<RefreshTask>,
    ) -> anyhow::Result<ClusterTasksResult> {
        let new_state = self.execute_refresh(&current_state, &tasks)?;
        Ok(ClusterTasksResult {
            new_state,
            outcomes: tasks.iter().map(|_| Ok(())).collect(),
        })
    }
}

/// Compares the live mapper source with the one staged in the builder and
/// installs the live one when they differ.
fn refresh_index_mapping(
    index_service: &IndexService,
    index_metadata_builder: &mut IndexMetadataBuilder,
) -> bool {
    let index_name = index_service.index().name();
    let Some(live_source) = index_service.mapping_source() else {
        return false;
    };
    let stored_source = index_metadata_builder
        .mapping()
        .map(|mapping_metadata| mapping_metadata.source());
    if stored_source == Some(&live_source) {
        return false;
    }
    warn!(index = index_name, "re-syncing mappings with cluster state");
    index_metadata_builder.put_mapping(MappingMetadata::new(live_source));
    true
}

/// Removes a transiently created index when dropped, on success and failure
/// paths alike.
struct RemoveIndexGuard<'a> {
    indices_service: &'a IndicesService,
    index: Index,
}

impl<'a> RemoveIndexGuard<'a> {
    fn new(indices_service: &'a IndicesService, index: Index) -> Self {
        RemoveIndexGuard {
            indices_service,
            index,
        }
    }
}

impl Drop for RemoveIndexGuard<'_> {
    fn drop(&mut self) {
        self.indices_service.remove_index(
            &self.index,
            IndexRemovalReason::NoLongerAssigned,
            "created for mapping processing",
        );
    }
}
