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

use marlin_cluster_state::SchemaBytes;

use crate::mapper_service::MergeReason;
use crate::{Mapping, MapperError};

/// A parsed mapping together with its canonical compressed source.
///
/// The source held here is always the canonical re-encoding of the parsed
/// mapping, never the bytes the mapping was parsed from. Comparing two
/// `mapping_source()` images therefore compares mappings, not formatting.
#[derive(Clone, Debug)]
pub struct DocumentMapper {
    mapping: Mapping,
    source: SchemaBytes,
}

impl DocumentMapper {
    /// Wraps a parsed mapping, computing its canonical source.
    pub fn from_mapping(mapping: Mapping) -> Result<Self, MapperError> {
        let source = mapping.mapping_source()?;
        Ok(DocumentMapper { mapping, source })
    }

    /// Parses a compressed schema document.
    pub fn parse(source: &SchemaBytes) -> Result<Self, MapperError> {
        DocumentMapper::from_mapping(Mapping::from_source(source)?)
    }

    /// The parsed mapping.
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// The canonical compressed source.
    pub fn mapping_source(&self) -> &SchemaBytes {
        &self.source
    }

    /// Merges `incoming` into this mapper and returns the result, leaving
    /// this mapper untouched. Callers that only want validation simply drop
    /// the returned mapper.
    pub fn merge(&self, incoming: &Mapping) -> Result<DocumentMapper, MapperError> {
        DocumentMapper::from_mapping(self.mapping.merge(incoming, MergeReason::MappingUpdate)?)
    }
}
