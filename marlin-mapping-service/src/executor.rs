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

use marlin_cluster_state::ClusterState;

use crate::MappingUpdateError;

/// Result of executing a batch of cluster-state tasks.
pub struct ClusterTasksResult {
    /// The state after the batch. Pointer-equal to the input state when the
    /// batch changed nothing.
    pub new_state: Arc<ClusterState>,
    /// One outcome per submitted task, in submission order.
    pub outcomes: Vec<Result<(), MappingUpdateError>>,
}

/// A batched transformation of the cluster state.
///
/// `execute` runs on the single-writer state thread: it sees a consistent
/// snapshot and nothing else mutates the state while it runs. A `?` escaping
/// `execute` is a batch-level failure that fails every task in the batch and
/// leaves the state untouched; everything recoverable must instead be
/// recorded in the per-task outcomes, which line up with the submitted tasks
/// by position.
pub trait ClusterStateTaskExecutor: Send + Sync + 'static {
    /// The task type this executor batches.
    type Task: Send + 'static;

    /// Computes the next state from `current_state` and a batch of tasks.
    fn execute(
        &self,
        current_state: Arc<ClusterState>,
        tasks: Vec<Self::Task>,
    ) -> anyhow::Result<ClusterTasksResult>;
}
