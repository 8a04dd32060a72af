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

//! Expands index expressions against a cluster state.

use itertools::Itertools;

use crate::index_name::template_name_for_table;
use crate::{ClusterState, Index};

/// Resolves an index expression to the concrete indices it denotes.
///
/// Three forms are supported, tried in order:
/// - the exact name of an index;
/// - a glob over index names (`*` matches any run of characters);
/// - the name of a partitioned table, expanding to all of its partitions.
///
/// The result is sorted by index name. An empty result means the expression
/// did not match anything; interpreting that is left to the caller.
pub fn resolve_index_expression(state: &ClusterState, expression: &str) -> Vec<Index> {
    let metadata = state.metadata();
    if let Some(index_metadata) = metadata.index(expression) {
        return vec![index_metadata.index().clone()];
    }
    if expression.contains('*') {
        return metadata
            .indices()
            .filter(|index_metadata| simple_match(expression, index_metadata.index().name()))
            .map(|index_metadata| index_metadata.index().clone())
            .sorted_by(|left, right| left.name().cmp(right.name()))
            .collect();
    }
    let partition_prefix = template_name_for_table(expression);
    if metadata.template(&partition_prefix).is_some() {
        return metadata
            .indices()
            .filter(|index_metadata| index_metadata.index().name().starts_with(&partition_prefix))
            .map(|index_metadata| index_metadata.index().clone())
            .sorted_by(|left, right| left.name().cmp(right.name()))
            .collect();
    }
    Vec::new()
}

/// Glob match where `*` matches any (possibly empty) run of characters.
fn simple_match(pattern: &str, input: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == input,
        Some((head, tail)) => {
            if !input.starts_with(head) {
                return false;
            }
            let rest = &input[head.len()..];
            (0..=rest.len()).any(|offset| simple_match(tail, &rest[offset..]))
        }
    }
}
