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

//! `marlin-cluster-state` holds the immutable cluster metadata model shared
//! by every node: cluster-state snapshots, per-index metadata, index
//! templates, and the compressed schema documents attached to them.
//!
//! A [`ClusterState`] is never mutated in place. Every change goes through
//! the builders, which produce the next monotonically versioned revision.

mod cluster_state;
mod error;
pub mod index_name;
mod metadata;
pub mod resolver;
mod schema_bytes;

pub use cluster_state::{ClusterState, ClusterStateBuilder};
pub use error::ClusterStateError;
pub use metadata::{
    Index, IndexMetadata, IndexMetadataBuilder, IndexTemplateMetadata, IndexVersion,
    MappingMetadata, Metadata, MetadataBuilder,
};
pub use schema_bytes::{SchemaBytes, SchemaMap};
