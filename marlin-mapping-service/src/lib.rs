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

#![warn(missing_docs)]

//! `marlin-mapping-service` coordinates schema-mapping changes across the
//! cluster. All mapping mutations funnel through a single-writer state queue
//! and come out the other side as new, monotonically versioned cluster-state
//! revisions.
//!
//! [`MetadataMappingService`] is the entry point. Behind it sit two
//! cluster-state task executors:
//!
//! - [`PutMappingExecutor`] applies user-submitted mapping updates: it
//!   validates each one with a dry-run merge, commits with a real merge and
//!   bumps the per-index mapping version;
//! - [`RefreshExecutor`] re-synchronizes cluster metadata with the mapping a
//!   local index actually has installed.

mod channel_with_priority;
mod cluster_service;
mod column_positions;
mod error;
mod executor;
mod mapping_service;
mod put_mapping;
mod refresh;

pub use channel_with_priority::Priority;
pub use cluster_service::{
    ClusterService, ClusterStateApplier, ClusterStateTaskConfig, ClusterStateUpdateResponse,
    TaskCompletion,
};
pub use column_positions::{populate_column_positions, MissingPositionPolicy};
pub use error::MappingUpdateError;
pub use executor::{ClusterStateTaskExecutor, ClusterTasksResult};
pub use mapping_service::MetadataMappingService;
pub use put_mapping::{PutMappingExecutor, PutMappingRequest};
pub use refresh::{RefreshExecutor, RefreshTask};
