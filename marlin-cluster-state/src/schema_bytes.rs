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

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde_json::Value as JsonValue;

use crate::ClusterStateError;

/// An order-preserving JSON object tree, the decoded form of a schema
/// document.
pub type SchemaMap = serde_json::Map<String, JsonValue>;

/// A compressed schema document.
///
/// The compressed image is the identity of the document: two `SchemaBytes`
/// are equal iff their compressed bytes are equal. Producers are expected to
/// hand in canonical JSON, so byte equality and semantic equality coincide.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SchemaBytes {
    compressed: Bytes,
}

impl SchemaBytes {
    /// Compresses a raw JSON document.
    pub fn from_uncompressed(raw: &[u8]) -> Result<Self, ClusterStateError> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw)?;
        let compressed = encoder.finish()?;
        Ok(SchemaBytes {
            compressed: Bytes::from(compressed),
        })
    }

    /// Encodes a schema tree.
    pub fn from_map(map: &SchemaMap) -> Result<Self, ClusterStateError> {
        let raw = serde_json::to_vec(&JsonValue::Object(map.clone()))?;
        Self::from_uncompressed(&raw)
    }

    /// Validates a JSON document and compresses it verbatim.
    pub fn from_json_str(json: &str) -> Result<Self, ClusterStateError> {
        let value: JsonValue = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ClusterStateError::SchemaNotAnObject);
        }
        Self::from_uncompressed(json.as_bytes())
    }

    /// The compressed image.
    pub fn compressed(&self) -> &[u8] {
        &self.compressed
    }

    /// Decompresses the document back to its raw JSON bytes.
    pub fn uncompressed(&self) -> Result<Bytes, ClusterStateError> {
        let mut decoder = DeflateDecoder::new(self.compressed.as_ref());
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        Ok(Bytes::from(raw))
    }

    /// Decodes the document into an order-preserving tree of maps.
    pub fn to_map(&self) -> Result<SchemaMap, ClusterStateError> {
        let raw = self.uncompressed()?;
        let value: JsonValue = serde_json::from_slice(&raw)?;
        match value {
            JsonValue::Object(map) => Ok(map),
            _ => Err(ClusterStateError::SchemaNotAnObject),
        }
    }
}

impl fmt::Debug for SchemaBytes {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "SchemaBytes({} compressed bytes)",
            self.compressed.len()
        )
    }
}
