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

//! Naming scheme for partitioned indices.
//!
//! A partition of table `t` is backed by an index named
//! `.partitioned.t.<ident>` where `<ident>` encodes the partition values
//! (possibly empty). The parent template of all partitions of `t` is named
//! `.partitioned.t.`, so the template name derives from any partition name.

/// Prefix shared by all partition indices and their templates.
pub const PARTITIONED_INDEX_PREFIX: &str = ".partitioned.";

/// True iff `index_name` names a partition of some table.
pub fn is_partitioned_index(index_name: &str) -> bool {
    table_and_ident(index_name).is_some()
}

/// Derives the parent template name of a partition index.
///
/// Returns `None` when `index_name` does not follow the partition scheme.
pub fn template_name(index_name: &str) -> Option<String> {
    table_and_ident(index_name).map(|(table, _ident)| template_name_for_table(table))
}

/// The template name governing all partitions of `table`.
pub fn template_name_for_table(table: &str) -> String {
    format!("{PARTITIONED_INDEX_PREFIX}{table}.")
}

/// The index name backing one partition of `table`.
pub fn partition_index_name(table: &str, partition_ident: &str) -> String {
    format!("{PARTITIONED_INDEX_PREFIX}{table}.{partition_ident}")
}

fn table_and_ident(index_name: &str) -> Option<(&str, &str)> {
    let rest = index_name.strip_prefix(PARTITIONED_INDEX_PREFIX)?;
    let (table, ident) = rest.split_once('.')?;
    if table.is_empty() {
        return None;
    }
    Some((table, ident))
}
