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
use std::sync::{Arc, PoisonError, RwLock};

use marlin_cluster_state::{Index, IndexMetadata};
use marlin_mapper::MapperService;
use thiserror::Error;
use tracing::debug;

use crate::IndexService;

/// Why an index is being removed from the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexRemovalReason {
    /// The index is not assigned to this node anymore.
    NoLongerAssigned,
    /// The index was deleted cluster-wide.
    Deleted,
    /// The index is being torn down after a failure.
    Failure,
}

/// Error creating an index on this node.
#[derive(Debug, Error)]
pub enum IndexCreationError {
    /// The registry already holds this incarnation of the index.
    #[error("index {0} is already open on this node")]
    AlreadyExists(Index),
}

/// Registry of the indices open on this node, keyed by index UUID.
#[derive(Debug, Default)]
pub struct IndicesService {
    indices: RwLock<HashMap<String, Arc<IndexService>>>,
}

impl IndicesService {
    /// Creates an empty registry.
    pub fn new() -> Self {
        IndicesService::default()
    }

    /// The open index service for `index`, if this node has it open.
    pub fn index_service(&self, index: &Index) -> Option<Arc<IndexService>> {
        self.indices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index.uuid())
            .cloned()
    }

    /// Opens an index and registers it.
    pub fn create_index(
        &self,
        index_metadata: &IndexMetadata,
    ) -> Result<Arc<IndexService>, IndexCreationError> {
        let index_service = Arc::new(IndexService::new(index_metadata));
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        if indices.contains_key(index_metadata.index().uuid()) {
            return Err(IndexCreationError::AlreadyExists(
                index_metadata.index().clone(),
            ));
        }
        indices.insert(
            index_metadata.index().uuid().to_string(),
            index_service.clone(),
        );
        Ok(index_service)
    }

    /// Creates a free-standing mapper service for `index_metadata`.
    ///
    /// The returned service is not registered anywhere; it lives exactly as
    /// long as the caller keeps it.
    pub fn create_index_mapper_service(&self, index_metadata: &IndexMetadata) -> MapperService {
        MapperService::new(index_metadata.index().clone())
    }

    /// Drops an index from the registry.
    pub fn remove_index(&self, index: &Index, reason: IndexRemovalReason, detail: &str) {
        let removed = self
            .indices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(index.uuid());
        if removed.is_some() {
            debug!(index = %index, reason = ?reason, detail, "removed index");
        }
    }

    /// Number of open indices. Mostly useful in tests.
    pub fn len(&self) -> usize {
        self.indices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True iff no index is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
