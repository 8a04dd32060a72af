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

use std::sync::{PoisonError, RwLock};

use marlin_cluster_state::{Index, IndexMetadata, SchemaBytes};
use marlin_mapper::{MapperError, MapperService, MergeReason};

/// An open index on this node.
///
/// Only the mapper side of an index matters here: the service wraps the
/// index's live [`MapperService`] behind a lock and exposes the handful of
/// operations the cluster-state executors need.
#[derive(Debug)]
pub struct IndexService {
    index: Index,
    mapper_service: RwLock<MapperService>,
}

impl IndexService {
    /// Opens an index described by `index_metadata`, with no mapping
    /// installed yet.
    pub fn new(index_metadata: &IndexMetadata) -> Self {
        let index = index_metadata.index().clone();
        IndexService {
            mapper_service: RwLock::new(MapperService::new(index.clone())),
            index,
        }
    }

    /// The index identity.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Merges the mapping recorded in `index_metadata` into the live mapper.
    pub fn merge_index_metadata(
        &self,
        index_metadata: &IndexMetadata,
        reason: MergeReason,
    ) -> Result<(), MapperError> {
        self.mapper_service
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge_index_metadata(index_metadata, reason)?;
        Ok(())
    }

    /// Merges a compressed schema document into the live mapper.
    pub fn merge_source(
        &self,
        source: &SchemaBytes,
        reason: MergeReason,
    ) -> Result<(), MapperError> {
        self.mapper_service
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge_source(source, reason)?;
        Ok(())
    }

    /// The canonical source of the currently installed mapping, if any.
    pub fn mapping_source(&self) -> Option<SchemaBytes> {
        self.mapper_service
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .document_mapper()
            .map(|document_mapper| document_mapper.mapping_source().clone())
    }
}
