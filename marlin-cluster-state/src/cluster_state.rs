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

use crate::Metadata;

/// An immutable snapshot of the cluster metadata at some revision.
///
/// States are shared as `Arc<ClusterState>` and never mutated; producing the
/// next revision goes through [`ClusterState::builder`], which bumps the
/// version. Pointer equality of two `Arc<ClusterState>` means "no change".
#[derive(Debug)]
pub struct ClusterState {
    version: u64,
    metadata: Metadata,
}

impl ClusterState {
    /// Wraps freshly assembled metadata into revision 1.
    pub fn new(metadata: Metadata) -> Arc<Self> {
        Arc::new(ClusterState {
            version: 1,
            metadata,
        })
    }

    /// An empty initial state.
    pub fn empty() -> Arc<Self> {
        ClusterState::new(Metadata::default())
    }

    /// Starts building the next revision on top of `current`.
    pub fn builder(current: &ClusterState) -> ClusterStateBuilder {
        ClusterStateBuilder {
            version: current.version,
            metadata: current.metadata.clone(),
        }
    }

    /// The state revision.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The cluster metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Builder for the next [`ClusterState`] revision.
pub struct ClusterStateBuilder {
    version: u64,
    metadata: Metadata,
}

impl ClusterStateBuilder {
    /// Replaces the metadata of the revision under construction.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builds the next revision.
    pub fn build(self) -> Arc<ClusterState> {
        Arc::new(ClusterState {
            version: self.version + 1,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexMetadata;

    #[test]
    fn test_builder_bumps_version() {
        let state = ClusterState::empty();
        assert_eq!(state.version(), 1);

        let mut metadata_builder = Metadata::builder_from(state.metadata());
        metadata_builder.put_index_metadata(IndexMetadata::for_test("t1", "uuid-1"));
        let new_state = ClusterState::builder(&state)
            .metadata(metadata_builder.build())
            .build();

        assert_eq!(new_state.version(), 2);
        assert!(new_state.metadata().index("t1").is_some());
        assert!(state.metadata().index("t1").is_none());
    }
}
