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
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{ClusterStateError, SchemaBytes};

/// Identity of an index: its name plus the UUID minted when it was created.
///
/// The UUID is the authoritative identity. A name can alias several UUIDs
/// over time (delete and recreate), so everything that acts on an index it
/// resolved earlier must re-check the UUID against the current metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    name: String,
    uuid: String,
}

impl Index {
    /// Creates an index identity.
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Index {
            name: name.into(),
            uuid: uuid.into(),
        }
    }

    /// The index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The index UUID.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl fmt::Display for Index {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "[{}/{}]", self.name, self.uuid)
    }
}

/// Engine version an index was created by, used to gate behavior that only
/// newer indices are guaranteed to support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexVersion(
    /// Internal version id, ordered chronologically across releases.
    pub u32,
);

impl IndexVersion {
    /// First release whose templates record a column position on every
    /// property. Indices created before it may carry templates with holes.
    pub const COLUMN_POSITION_TRACKING: IndexVersion = IndexVersion(5_01_00_99);

    /// Version stamped on newly created indices.
    pub const CURRENT: IndexVersion = IndexVersion(5_04_00_99);
}

/// The mapping currently attached to an index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingMetadata {
    source: SchemaBytes,
}

impl MappingMetadata {
    /// Wraps a compressed mapping source.
    pub fn new(source: SchemaBytes) -> Self {
        MappingMetadata { source }
    }

    /// The compressed mapping source.
    pub fn source(&self) -> &SchemaBytes {
        &self.source
    }
}

/// A named index template.
///
/// For partitioned indices the template mapping is the source of truth for
/// column positions: every partition stamps its own mapping from it.
#[derive(Clone, Debug)]
pub struct IndexTemplateMetadata {
    name: String,
    index_patterns: Vec<String>,
    mapping: SchemaBytes,
}

impl IndexTemplateMetadata {
    /// Creates a template.
    pub fn new(
        name: impl Into<String>,
        index_patterns: Vec<String>,
        mapping: SchemaBytes,
    ) -> Self {
        IndexTemplateMetadata {
            name: name.into(),
            index_patterns,
            mapping,
        }
    }

    /// The template name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name patterns of the indices this template applies to.
    pub fn index_patterns(&self) -> &[String] {
        &self.index_patterns
    }

    /// The template mapping.
    pub fn mapping(&self) -> &SchemaBytes {
        &self.mapping
    }
}

/// Per-index record in the cluster metadata.
#[derive(Clone, Debug)]
pub struct IndexMetadata {
    index: Index,
    version: u64,
    mapping_version: u64,
    version_created: IndexVersion,
    mapping: Option<MappingMetadata>,
}

impl IndexMetadata {
    /// Starts a builder for a brand-new index.
    pub fn builder(index: Index) -> IndexMetadataBuilder {
        IndexMetadataBuilder {
            index,
            version: 0,
            mapping_version: 0,
            version_created: IndexVersion::CURRENT,
            mapping: None,
        }
    }

    /// Returns an [`IndexMetadata`] without any mapping, for tests.
    #[doc(hidden)]
    pub fn for_test(name: &str, uuid: &str) -> Self {
        IndexMetadata::builder(Index::new(name, uuid)).build()
    }

    /// The index identity.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Metadata version, bumped every time this record is rebuilt.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Mapping version, bumped exactly when the mapping source changes.
    pub fn mapping_version(&self) -> u64 {
        self.mapping_version
    }

    /// Engine version that created this index.
    pub fn version_created(&self) -> IndexVersion {
        self.version_created
    }

    /// The current mapping, if one has been installed.
    pub fn mapping(&self) -> Option<&MappingMetadata> {
        self.mapping.as_ref()
    }

    /// True iff `uuid` identifies this incarnation of the index.
    pub fn is_same_uuid(&self, uuid: &str) -> bool {
        self.index.uuid() == uuid
    }
}

/// Builder producing the next revision of an [`IndexMetadata`].
#[derive(Clone, Debug)]
pub struct IndexMetadataBuilder {
    index: Index,
    version: u64,
    mapping_version: u64,
    version_created: IndexVersion,
    mapping: Option<MappingMetadata>,
}

impl IndexMetadataBuilder {
    /// Starts from an existing record.
    pub fn from_metadata(index_metadata: &IndexMetadata) -> Self {
        IndexMetadataBuilder {
            index: index_metadata.index.clone(),
            version: index_metadata.version,
            mapping_version: index_metadata.mapping_version,
            version_created: index_metadata.version_created,
            mapping: index_metadata.mapping.clone(),
        }
    }

    /// The mapping staged in this builder.
    pub fn mapping(&self) -> Option<&MappingMetadata> {
        self.mapping.as_ref()
    }

    /// Replaces the mapping.
    pub fn put_mapping(&mut self, mapping: MappingMetadata) -> &mut Self {
        self.mapping = Some(mapping);
        self
    }

    /// The mapping version staged in this builder.
    pub fn mapping_version(&self) -> u64 {
        self.mapping_version
    }

    /// Sets the mapping version.
    ///
    /// Must be called before [`build`](Self::build): building also bumps the
    /// metadata version, and the mapping version has to be in place by then.
    pub fn set_mapping_version(&mut self, mapping_version: u64) -> &mut Self {
        self.mapping_version = mapping_version;
        self
    }

    /// Overrides the creating engine version.
    pub fn set_version_created(&mut self, version_created: IndexVersion) -> &mut Self {
        self.version_created = version_created;
        self
    }

    /// Builds the record, bumping the metadata version.
    pub fn build(self) -> IndexMetadata {
        IndexMetadata {
            index: self.index,
            version: self.version + 1,
            mapping_version: self.mapping_version,
            version_created: self.version_created,
            mapping: self.mapping,
        }
    }
}

/// Cluster-wide metadata: all indices plus all index templates.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    indices: HashMap<String, Arc<IndexMetadata>>,
    templates: HashMap<String, Arc<IndexTemplateMetadata>>,
}

impl Metadata {
    /// Starts an empty builder.
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    /// Starts a builder seeded with this metadata.
    pub fn builder_from(metadata: &Metadata) -> MetadataBuilder {
        MetadataBuilder {
            indices: metadata.indices.clone(),
            templates: metadata.templates.clone(),
        }
    }

    /// Looks an index up by name.
    pub fn index(&self, name: &str) -> Option<&Arc<IndexMetadata>> {
        self.indices.get(name)
    }

    /// Resolves an index by name and verifies the UUID still matches.
    pub fn index_safe(&self, index: &Index) -> Result<&Arc<IndexMetadata>, ClusterStateError> {
        self.indices
            .get(index.name())
            .filter(|index_metadata| index_metadata.is_same_uuid(index.uuid()))
            .ok_or_else(|| ClusterStateError::IndexMissing {
                name: index.name().to_string(),
                uuid: index.uuid().to_string(),
            })
    }

    /// Looks a template up by name.
    pub fn template(&self, name: &str) -> Option<&Arc<IndexTemplateMetadata>> {
        self.templates.get(name)
    }

    /// Iterates over all index records.
    pub fn indices(&self) -> impl Iterator<Item = &Arc<IndexMetadata>> {
        self.indices.values()
    }
}

/// Builder producing the next [`Metadata`] revision.
#[derive(Clone, Debug, Default)]
pub struct MetadataBuilder {
    indices: HashMap<String, Arc<IndexMetadata>>,
    templates: HashMap<String, Arc<IndexTemplateMetadata>>,
}

impl MetadataBuilder {
    /// Looks an index up by name in the staged metadata.
    pub fn index(&self, name: &str) -> Option<&Arc<IndexMetadata>> {
        self.indices.get(name)
    }

    /// Commits an index builder.
    ///
    /// Building bumps the per-index metadata version, so any mapping-version
    /// change has to be staged on the builder beforehand.
    pub fn put(&mut self, index_metadata_builder: IndexMetadataBuilder) -> &mut Self {
        let index_metadata = index_metadata_builder.build();
        self.indices.insert(
            index_metadata.index().name().to_string(),
            Arc::new(index_metadata),
        );
        self
    }

    /// Inserts a fully built record as-is.
    pub fn put_index_metadata(&mut self, index_metadata: IndexMetadata) -> &mut Self {
        self.indices.insert(
            index_metadata.index().name().to_string(),
            Arc::new(index_metadata),
        );
        self
    }

    /// Inserts a template.
    pub fn put_template(&mut self, template: IndexTemplateMetadata) -> &mut Self {
        self.templates
            .insert(template.name().to_string(), Arc::new(template));
        self
    }

    /// Builds the metadata.
    pub fn build(self) -> Metadata {
        Metadata {
            indices: self.indices,
            templates: self.templates,
        }
    }
}
