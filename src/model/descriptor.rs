//! Record descriptors: the declared shape of every storable record type

use super::value::SemanticType;
use crate::{Error, Result};
use std::collections::HashSet;

/// Name of the time-bucket column every record type carries.
pub const TIME_BUCKET: &str = "time_bucket";

/// Separator placed between identity fragments.
pub const ID_CONNECTOR: &str = "_";

/// Column names the storage layer writes on its own.
pub const RESERVED_COLUMNS: &[&str] = &["id"];

/// Whether records of a type are appended or merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Immutable event, never merged
    AppendOnly,
    /// Aggregate combined with later observations of the same identity
    Metric,
}

/// TAG columns are filtered and sharded on; FIELD columns carry measured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Tag,
    Field,
}

/// How a metric column combines two observations of the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MergePolicy {
    /// Dimension column, both sides must agree
    Identity,
    Sum,
    Max,
    Min,
    /// Take the value from whichever side has the larger value in `column`
    LatestBy(String),
    /// Derived `sum / count`, recomputed after the inputs merge
    MeanOf { sum: String, count: String },
    /// Per-key sum of a `DataTable` complex value
    DataTableSum,
}

/// Declared column of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDescriptor {
    pub name: String,
    pub semantic: SemanticType,
    pub role: ColumnRole,
    pub shard_index: Option<u32>,
    pub merge: MergePolicy,
    /// Set for string tags populated from a `key=value` list column
    pub exploded_from: Option<String>,
}

impl ColumnDescriptor {
    pub fn is_virtual(&self) -> bool {
        self.exploded_from.is_some()
    }
}

/// Declared shape of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordDescriptor {
    pub name: String,
    pub kind: RecordKind,
    pub columns: Vec<ColumnDescriptor>,
    /// Columns whose values, joined by `_`, form the record id
    pub identity: Vec<String>,
    /// Column sets queryable together
    pub index_groups: Vec<Vec<String>>,
}

impl RecordDescriptor {
    /// Starts a descriptor; the time-bucket column is added up front.
    pub fn builder(name: impl Into<String>, kind: RecordKind) -> RecordDescriptorBuilder {
        RecordDescriptorBuilder {
            descriptor: RecordDescriptor {
                name: name.into(),
                kind,
                columns: vec![ColumnDescriptor {
                    name: TIME_BUCKET.to_string(),
                    semantic: SemanticType::Long,
                    role: ColumnRole::Tag,
                    shard_index: None,
                    merge: MergePolicy::Identity,
                    exploded_from: None,
                }],
                identity: Vec::new(),
                index_groups: Vec::new(),
            },
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Checks the descriptor is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidSchema(format!("{}: {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(Error::InvalidSchema("record type name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return fail(format!("duplicate column '{}'", column.name));
            }
            if RESERVED_COLUMNS.contains(&column.name.as_str()) {
                return fail(format!("column name '{}' is reserved", column.name));
            }
        }

        match self.column(TIME_BUCKET) {
            Some(c) if c.semantic == SemanticType::Long && c.role == ColumnRole::Tag => {}
            _ => return fail(format!("'{}' must be a LONG tag", TIME_BUCKET)),
        }

        if self.identity.is_empty() {
            return fail("identity rule names no columns".to_string());
        }
        for name in &self.identity {
            match self.column(name) {
                None => return fail(format!("identity column '{}' is not declared", name)),
                Some(c) if !c.semantic.is_identity_capable() || c.is_virtual() => {
                    return fail(format!(
                        "identity column '{}' has type {} which cannot form an id",
                        name, c.semantic
                    ));
                }
                Some(_) => {}
            }
        }

        if self.kind == RecordKind::Metric && !self.identity.iter().any(|n| n == TIME_BUCKET) {
            let merged = self.column(TIME_BUCKET).map(|c| &c.merge);
            if !matches!(merged, Some(MergePolicy::Min | MergePolicy::Max)) {
                return fail(format!(
                    "metrics keyed without '{}' must merge it by Min or Max",
                    TIME_BUCKET
                ));
            }
        }

        let mut shard_positions: Vec<u32> =
            self.columns.iter().filter_map(|c| c.shard_index).collect();
        shard_positions.sort_unstable();
        if shard_positions.iter().enumerate().any(|(i, p)| *p != i as u32) {
            return fail(format!(
                "shard indices must be unique and contiguous from 0, got {:?}",
                shard_positions
            ));
        }
        for column in self.columns.iter().filter(|c| c.shard_index.is_some()) {
            if column.role != ColumnRole::Tag {
                return fail(format!("shard column '{}' must be a tag", column.name));
            }
        }

        for group in &self.index_groups {
            for name in group {
                if self.column(name).is_none() {
                    return fail(format!("index group names undeclared column '{}'", name));
                }
            }
        }

        for column in &self.columns {
            if let Some(list) = &column.exploded_from {
                match self.column(list) {
                    Some(c) if c.semantic == SemanticType::TagList => {}
                    _ => {
                        return fail(format!(
                            "'{}' is exploded from '{}' which is not a TAG_LIST column",
                            column.name, list
                        ))
                    }
                }
                if column.semantic != SemanticType::String || column.role != ColumnRole::Tag {
                    return fail(format!("exploded column '{}' must be a STRING tag", column.name));
                }
            }
            if column.semantic == SemanticType::TagList && column.role != ColumnRole::Tag {
                return fail(format!("list column '{}' must be a tag", column.name));
            }
            self.validate_merge(column)?;
        }

        Ok(())
    }

    fn validate_merge(&self, column: &ColumnDescriptor) -> Result<()> {
        let fail = |msg: String| {
            Err(Error::InvalidSchema(format!(
                "{}.{}: {}",
                self.name, column.name, msg
            )))
        };
        if self.kind == RecordKind::AppendOnly {
            return if column.merge == MergePolicy::Identity {
                Ok(())
            } else {
                fail("append-only records cannot declare merge policies".to_string())
            };
        }
        match &column.merge {
            MergePolicy::Identity => Ok(()),
            MergePolicy::Sum | MergePolicy::Max | MergePolicy::Min => {
                if column.semantic.is_numeric() {
                    Ok(())
                } else {
                    fail(format!("{:?} needs a numeric column", column.merge))
                }
            }
            MergePolicy::LatestBy(by) => match self.column(by) {
                Some(c) if matches!(c.merge, MergePolicy::Max) => Ok(()),
                _ => fail(format!("latest-by column '{}' must exist and merge by Max", by)),
            },
            MergePolicy::MeanOf { sum, count } => {
                if column.semantic != SemanticType::Long {
                    return fail("mean columns must be LONG".to_string());
                }
                for input in [sum, count] {
                    match self.column(input) {
                        Some(c)
                            if c.merge == MergePolicy::Sum
                                && matches!(c.semantic, SemanticType::Long | SemanticType::Integer) => {}
                        _ => {
                            return fail(format!(
                                "mean input '{}' must be an integral column merged by Sum",
                                input
                            ))
                        }
                    }
                }
                Ok(())
            }
            MergePolicy::DataTableSum => {
                if column.semantic == SemanticType::ComplexObject {
                    Ok(())
                } else {
                    fail("data table merge needs a COMPLEX_OBJECT column".to_string())
                }
            }
        }
    }
}

/// Fluent construction of a [`RecordDescriptor`].
#[derive(Debug)]
pub struct RecordDescriptorBuilder {
    descriptor: RecordDescriptor,
}

impl RecordDescriptorBuilder {
    fn push(mut self, name: &str, semantic: SemanticType, role: ColumnRole, merge: MergePolicy) -> Self {
        self.descriptor.columns.push(ColumnDescriptor {
            name: name.to_string(),
            semantic,
            role,
            shard_index: None,
            merge,
            exploded_from: None,
        });
        self
    }

    pub fn tag(self, name: &str, semantic: SemanticType) -> Self {
        self.push(name, semantic, ColumnRole::Tag, MergePolicy::Identity)
    }

    pub fn field(self, name: &str, semantic: SemanticType) -> Self {
        self.push(name, semantic, ColumnRole::Field, MergePolicy::Identity)
    }

    /// Metric value column with a merge policy.
    pub fn merged(self, name: &str, semantic: SemanticType, merge: MergePolicy) -> Self {
        self.push(name, semantic, ColumnRole::Field, merge)
    }

    /// String tag filled from `key=value` entries of `list` whose key is `name`.
    pub fn exploded_tag(mut self, name: &str, list: &str) -> Self {
        self.descriptor.columns.push(ColumnDescriptor {
            name: name.to_string(),
            semantic: SemanticType::String,
            role: ColumnRole::Tag,
            shard_index: None,
            merge: MergePolicy::Identity,
            exploded_from: Some(list.to_string()),
        });
        self
    }

    /// Overrides the merge policy of an already declared column.
    pub fn merge_by(mut self, name: &str, merge: MergePolicy) -> Self {
        if let Some(c) = self.descriptor.columns.iter_mut().find(|c| c.name == name) {
            c.merge = merge;
        }
        self
    }

    pub fn shard_key(mut self, name: &str, index: u32) -> Self {
        if let Some(c) = self.descriptor.columns.iter_mut().find(|c| c.name == name) {
            c.shard_index = Some(index);
        }
        self
    }

    pub fn identity(mut self, columns: &[&str]) -> Self {
        self.descriptor.identity = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn index_group(mut self, columns: &[&str]) -> Self {
        self.descriptor
            .index_groups
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn build(self) -> RecordDescriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RecordDescriptorBuilder {
        RecordDescriptor::builder("snapshot", RecordKind::AppendOnly)
            .tag("task_id", SemanticType::String)
            .tag("segment_id", SemanticType::String)
            .tag("sequence", SemanticType::Integer)
            .field("stack", SemanticType::Binary)
            .identity(&["task_id", "segment_id", "sequence"])
    }

    #[test]
    fn valid_descriptor_passes() {
        snapshot()
            .shard_key("segment_id", 0)
            .index_group(&["task_id", "segment_id"])
            .build()
            .validate()
            .unwrap();
    }

    #[test]
    fn rejects_duplicate_columns() {
        let d = snapshot().tag("task_id", SemanticType::String).build();
        assert!(matches!(d.validate(), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn rejects_binary_identity() {
        let d = snapshot().identity(&["stack"]).build();
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_gaps_in_shard_positions() {
        let d = snapshot().shard_key("segment_id", 1).build();
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_reserved_id_column() {
        let d = snapshot().tag("id", SemanticType::String).build();
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_merge_policy_on_append_only() {
        let d = snapshot()
            .merged("count", SemanticType::Long, MergePolicy::Sum)
            .build();
        assert!(d.validate().is_err());
    }

    #[test]
    fn mean_inputs_must_be_summed() {
        let ok = RecordDescriptor::builder("latency", RecordKind::Metric)
            .tag("entity_id", SemanticType::String)
            .merged("total", SemanticType::Long, MergePolicy::Sum)
            .merged("count", SemanticType::Long, MergePolicy::Sum)
            .merged(
                "value",
                SemanticType::Long,
                MergePolicy::MeanOf {
                    sum: "total".into(),
                    count: "count".into(),
                },
            )
            .identity(&[TIME_BUCKET, "entity_id"])
            .build();
        ok.validate().unwrap();

        let bad = RecordDescriptorBuilder { descriptor: ok }
            .merge_by("count", MergePolicy::Max)
            .build();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn metric_without_bucket_identity_must_keep_first_or_last_bucket() {
        let traffic = || {
            RecordDescriptor::builder("traffic", RecordKind::Metric)
                .tag("name", SemanticType::String)
                .identity(&["name"])
        };
        assert!(traffic().build().validate().is_err());
        traffic()
            .merge_by(TIME_BUCKET, MergePolicy::Min)
            .build()
            .validate()
            .unwrap();
    }
}
