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
use thiserror::Error;

/// Error raised while parsing or merging a schema document.
#[derive(Debug, Error)]
pub enum MapperError {
    /// The schema document is malformed: not JSON, not the expected shape,
    /// or declaring a column type the engine does not know.
    #[error("failed to parse mapping: {message}")]
    Parse {
        /// What was wrong with the document.
        message: String,
    },

    /// A merge of a well-formed document was rejected, e.g. because it
    /// changes the type of an existing column.
    #[error("mapping merge rejected: {message}")]
    Validation {
        /// Why the merge was rejected.
        message: String,
    },
}

impl MapperError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        MapperError::Parse {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        MapperError::Validation {
            message: message.into(),
        }
    }
}

impl From<ClusterStateError> for MapperError {
    fn from(error: ClusterStateError) -> Self {
        MapperError::parse(error.to_string())
    }
}
