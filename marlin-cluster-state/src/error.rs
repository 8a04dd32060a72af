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

use std::io;

use thiserror::Error;

/// Cluster-state error kinds.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ClusterStateError {
    /// The metadata does not hold the expected index (or holds another
    /// incarnation of it under a different UUID).
    #[error("index `{name}` [{uuid}] is not present in the cluster metadata")]
    IndexMissing { name: String, uuid: String },

    #[error("schema document is not valid JSON: {0}")]
    InvalidSchema(#[from] serde_json::Error),

    #[error("schema document root must be a JSON object")]
    SchemaNotAnObject,

    #[error("failed to read or write a compressed schema document: {0}")]
    Io(#[from] io::Error),
}
