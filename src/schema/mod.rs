//! Backend schemas
//!
//! A [`Schema`] is a record descriptor mapped onto one backend: every column
//! gets a native storage type and a role. Schemas are built once per record
//! type by the [`SchemaRegistry`] and shared read-only afterwards.

mod registry;

pub use registry::SchemaRegistry;

use crate::model::{ColumnRole, RecordDescriptor, RecordKind, SemanticType};
use crate::BackendKind;
use std::collections::HashMap;

/// Storage type a backend uses for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Long,
    Double,
    String,
    Binary,
    StringArray,
}

impl NativeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeType::Long => "long",
            NativeType::Double => "double",
            NativeType::String => "string",
            NativeType::Binary => "binary",
            NativeType::StringArray => "string_array",
        }
    }
}

/// Native type for a semantic type on a backend.
///
/// The measure backend has no double type, so doubles travel as their
/// 8-byte big-endian bit pattern.
pub fn native_type(backend: BackendKind, semantic: SemanticType) -> NativeType {
    match (semantic, backend) {
        (SemanticType::Integer | SemanticType::Long | SemanticType::Enum, _) => NativeType::Long,
        (SemanticType::Double, BackendKind::Measure) => NativeType::Binary,
        (SemanticType::Double, _) => NativeType::Double,
        (SemanticType::String | SemanticType::ComplexObject, _) => NativeType::String,
        (SemanticType::Binary, _) => NativeType::Binary,
        (SemanticType::TagList, _) => NativeType::StringArray,
    }
}

/// One column of a backend schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub semantic: SemanticType,
    pub native: NativeType,
    pub role: ColumnRole,
    pub shard_index: Option<u32>,
    /// Index groups this column belongs to
    pub index_groups: Vec<Vec<String>>,
    pub exploded_from: Option<String>,
}

impl ColumnSpec {
    pub fn is_tag(&self) -> bool {
        self.role == ColumnRole::Tag
    }

    pub fn is_virtual(&self) -> bool {
        self.exploded_from.is_some()
    }
}

/// A record type's layout on one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    descriptor: RecordDescriptor,
    backend: BackendKind,
    columns: Vec<ColumnSpec>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    /// Maps a validated descriptor onto `backend`.
    pub(crate) fn build(descriptor: RecordDescriptor, backend: BackendKind) -> Self {
        // Streams on the measure backend hold tags only.
        let tags_only =
            backend == BackendKind::Measure && descriptor.kind == RecordKind::AppendOnly;

        let columns: Vec<ColumnSpec> = descriptor
            .columns
            .iter()
            .map(|c| ColumnSpec {
                name: c.name.clone(),
                semantic: c.semantic,
                native: native_type(backend, c.semantic),
                role: if tags_only { ColumnRole::Tag } else { c.role },
                shard_index: c.shard_index,
                index_groups: descriptor
                    .index_groups
                    .iter()
                    .filter(|g| g.iter().any(|n| n == &c.name))
                    .cloned()
                    .collect(),
                exploded_from: c.exploded_from.clone(),
            })
            .collect();
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        Self {
            descriptor,
            backend,
            columns,
            by_name,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> RecordKind {
        self.descriptor.kind
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn descriptor(&self) -> &RecordDescriptor {
        &self.descriptor
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.by_name.get(name).map(|i| &self.columns[*i])
    }

    /// Columns a record may carry values for.
    pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| !c.is_virtual())
    }

    /// Sharding columns in shard-key order.
    pub fn shard_key(&self) -> Vec<&ColumnSpec> {
        let mut key: Vec<&ColumnSpec> =
            self.columns.iter().filter(|c| c.shard_index.is_some()).collect();
        key.sort_by_key(|c| c.shard_index);
        key
    }
}
