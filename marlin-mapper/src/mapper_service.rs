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

use marlin_cluster_state::{Index, IndexMetadata, SchemaBytes, SchemaMap};
use tracing::debug;

use crate::{DocumentMapper, Mapping, MapperError};

/// Why a merge is being applied. Recovery merges seed a mapper with a
/// previously committed schema; update merges apply a user proposal and get
/// the full validation treatment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeReason {
    /// Re-installing a schema that was already committed at some point.
    MappingRecovery,
    /// Applying a user-submitted schema change.
    MappingUpdate,
}

/// Per-index mapper: owns the currently installed [`DocumentMapper`] and
/// applies merges to it.
#[derive(Debug)]
pub struct MapperService {
    index: Index,
    document_mapper: Option<DocumentMapper>,
}

impl MapperService {
    /// Creates a mapper service with no mapping installed.
    pub fn new(index: Index) -> Self {
        MapperService {
            index,
            document_mapper: None,
        }
    }

    /// The index this service maps for.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// The currently installed mapper, if any.
    pub fn document_mapper(&self) -> Option<&DocumentMapper> {
        self.document_mapper.as_ref()
    }

    /// Parses a candidate schema document without installing it.
    pub fn parse(&self, source: &SchemaBytes) -> Result<DocumentMapper, MapperError> {
        DocumentMapper::parse(source)
    }

    /// Merges a compressed schema document into the installed mapping and
    /// installs the result.
    pub fn merge_source(
        &mut self,
        source: &SchemaBytes,
        reason: MergeReason,
    ) -> Result<&DocumentMapper, MapperError> {
        let incoming = Mapping::from_source(source)?;
        self.merge_mapping(incoming, reason)
    }

    /// Merges a decoded schema tree into the installed mapping and installs
    /// the result.
    pub fn merge_map(
        &mut self,
        map: &SchemaMap,
        reason: MergeReason,
    ) -> Result<&DocumentMapper, MapperError> {
        let incoming = Mapping::parse(map)?;
        self.merge_mapping(incoming, reason)
    }

    /// Seeds this service with the mapping recorded in `index_metadata`, if
    /// one is present.
    pub fn merge_index_metadata(
        &mut self,
        index_metadata: &IndexMetadata,
        reason: MergeReason,
    ) -> Result<Option<&DocumentMapper>, MapperError> {
        match index_metadata.mapping() {
            Some(mapping_metadata) => self.merge_source(mapping_metadata.source(), reason).map(Some),
            None => Ok(None),
        }
    }

    fn merge_mapping(
        &mut self,
        incoming: Mapping,
        reason: MergeReason,
    ) -> Result<&DocumentMapper, MapperError> {
        let merged = match &self.document_mapper {
            Some(existing) => existing.mapping().merge(&incoming, reason)?,
            None => incoming,
        };
        let document_mapper = DocumentMapper::from_mapping(merged)?;
        debug!(index = %self.index, reason = ?reason, "installed merged mapping");
        Ok(self.document_mapper.insert(document_mapper))
    }
}
