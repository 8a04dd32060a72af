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

//! `marlin-mapper` parses schema documents into typed mappings, validates
//! merges of new schema against the installed one, and renders mappings back
//! into canonical compressed form.
//!
//! The per-index entry point is [`MapperService`]; a parsed schema is held
//! by a [`DocumentMapper`].

mod document_mapper;
mod error;
mod mapper_service;
mod mapping;

pub use document_mapper::DocumentMapper;
pub use error::MapperError;
pub use mapper_service::{MapperService, MergeReason};
pub use mapping::{Mapping, Property};
