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

use marlin_cluster_state::ClusterStateError;
use marlin_mapper::MapperError;
use thiserror::Error;

/// Mapping update error kinds.
///
/// All of these are per-request failures: they are reported to the caller
/// that submitted the request and never abort the rest of the batch.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum MappingUpdateError {
    #[error("no index matches expression `{expression}`")]
    IndexNotFound { expression: String },

    #[error(transparent)]
    Mapper(#[from] MapperError),

    #[error("index `{name}` [{uuid}] disappeared from the cluster metadata")]
    StateInconsistency { name: String, uuid: String },

    #[error("template `{template_name}` backing partitioned index `{index_name}` is missing")]
    MissingTemplate {
        template_name: String,
        index_name: String,
    },

    #[error("template property `{column}` carries no column position")]
    MissingColumnPosition { column: String },

    #[error("cluster state update [{queue}] timed out waiting in the queue")]
    ProcessClusterEventTimeout { queue: &'static str },

    /// Any generic internal error. The message can be helpful to users, but
    /// the details are judged unrecoverable and not useful for handling.
    #[error("internal error: `{message}` cause: `{cause}`")]
    Internal {
        message: String,
        cause: anyhow::Error,
    },
}

impl From<ClusterStateError> for MappingUpdateError {
    fn from(error: ClusterStateError) -> Self {
        match error {
            ClusterStateError::IndexMissing { name, uuid } => {
                MappingUpdateError::StateInconsistency { name, uuid }
            }
            other => MappingUpdateError::Mapper(MapperError::from(other)),
        }
    }
}
