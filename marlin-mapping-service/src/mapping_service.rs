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

use std::sync::Arc;

use marlin_index::IndicesService;

use crate::channel_with_priority::Priority;
use crate::cluster_service::{
    ClusterService, ClusterStateTaskConfig, ClusterStateUpdateResponse, TaskCompletion,
};
use crate::{
    MappingUpdateError, PutMappingExecutor, PutMappingRequest, RefreshExecutor, RefreshTask,
};

/// Service responsible for submitting mapping changes.
///
/// Everything here is asynchronous from the caller's perspective: both entry
/// points enqueue a high-priority task on the cluster-state queue and return;
/// the actual state transformation happens on the single-writer state loop.
pub struct MetadataMappingService {
    cluster_service: Arc<ClusterService>,
    refresh_executor: Arc<RefreshExecutor>,
    put_mapping_executor: Arc<PutMappingExecutor>,
}

impl MetadataMappingService {
    /// Wires the service to the state queue and the local index registry.
    pub fn new(cluster_service: Arc<ClusterService>, indices_service: Arc<IndicesService>) -> Self {
        MetadataMappingService {
            cluster_service,
            refresh_executor: Arc::new(RefreshExecutor::new(indices_service.clone())),
            put_mapping_executor: Arc::new(PutMappingExecutor::new(indices_service)),
        }
    }

    /// Requests a re-synchronization of cluster metadata with the mapping
    /// installed for `index_name`, fire-and-forget. Failures are logged.
    pub fn refresh_mapping(&self, index_name: &str, index_uuid: &str) {
        let refresh_task = RefreshTask {
            index_name: index_name.to_string(),
            index_uuid: index_uuid.to_string(),
        };
        self.cluster_service.submit_state_update_task(
            "refresh-mapping",
            refresh_task,
            ClusterStateTaskConfig::new(Priority::High),
            &self.refresh_executor,
            TaskCompletion::fire_and_forget(),
        );
    }

    /// Applies a mapping update.
    ///
    /// Resolves once the update was committed and acknowledged by all nodes
    /// (`acknowledged: true`), committed but not acknowledged in time
    /// (`acknowledged: false`), or rejected (the error).
    pub async fn put_mapping(
        &self,
        request: PutMappingRequest,
    ) -> Result<ClusterStateUpdateResponse, MappingUpdateError> {
        let (completion, response_rx) = TaskCompletion::acked(request.ack_timeout);
        let config = ClusterStateTaskConfig {
            priority: Priority::High,
            timeout: request.master_timeout,
        };
        self.cluster_service.submit_state_update_task(
            "put-mapping",
            request,
            config,
            &self.put_mapping_executor,
            completion,
        );
        match response_rx.await {
            Ok(response) => response,
            Err(_dropped) => Err(MappingUpdateError::Internal {
                message: "the cluster state update loop went away".to_string(),
                cause: anyhow::anyhow!("completion channel closed"),
            }),
        }
    }
}
