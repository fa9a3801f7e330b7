//! Generic records and merging

use super::data_table::DataTable;
use super::descriptor::{ColumnDescriptor, MergePolicy, RecordDescriptor, RecordKind, ID_CONNECTOR, TIME_BUCKET};
use super::value::{ComplexObject, Value};
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Backend-neutral record: column values plus the id derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_name: String,
    pub id: String,
    pub values: BTreeMap<String, Value>,
}

impl Record {
    pub fn builder(descriptor: &RecordDescriptor) -> RecordBuilder<'_> {
        RecordBuilder {
            descriptor,
            values: BTreeMap::new(),
        }
    }

    /// Builds a record and derives its id from the identity columns.
    pub fn from_values(
        descriptor: &RecordDescriptor,
        values: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let id = derive_id(descriptor, &values)?;
        Ok(Self {
            type_name: descriptor.name.clone(),
            id,
            values,
        })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn time_bucket(&self) -> Option<i64> {
        self.values.get(TIME_BUCKET).and_then(Value::as_i64)
    }

    fn require(&self, column: &str) -> Result<&Value> {
        self.values.get(column).ok_or_else(|| Error::Decode {
            column: column.to_string(),
            reason: format!("missing from {} record {}", self.type_name, self.id),
        })
    }

    fn shape(&self, column: &str, expected: &str) -> Error {
        let actual = self.values.get(column).map(Value::kind).unwrap_or("nothing");
        Error::Decode {
            column: column.to_string(),
            reason: format!("expected {}, found {}", expected, actual),
        }
    }

    pub fn get_str(&self, column: &str) -> Result<&str> {
        match self.require(column)? {
            Value::Str(s) => Ok(s),
            _ => Err(self.shape(column, "string")),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.require(column)? {
            Value::Long(v) => Ok(*v),
            _ => Err(self.shape(column, "long")),
        }
    }

    pub fn get_i32(&self, column: &str) -> Result<i32> {
        match self.require(column)? {
            Value::Int(v) => Ok(*v),
            _ => Err(self.shape(column, "int")),
        }
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.require(column)? {
            Value::Double(v) => Ok(*v),
            _ => Err(self.shape(column, "double")),
        }
    }

    pub fn get_bytes(&self, column: &str) -> Result<&[u8]> {
        match self.require(column)? {
            Value::Binary(b) => Ok(b),
            _ => Err(self.shape(column, "binary")),
        }
    }

    pub fn get_list(&self, column: &str) -> Result<&[String]> {
        match self.require(column)? {
            Value::List(l) => Ok(l),
            _ => Err(self.shape(column, "list")),
        }
    }

    pub fn get_complex<T: ComplexObject>(&self, column: &str) -> Result<T> {
        match self.require(column)? {
            Value::Complex(s) => T::from_storage_form(s),
            _ => Err(self.shape(column, "complex")),
        }
    }

    /// Folds `other` into `self` following each column's merge policy.
    ///
    /// Every policy is associative and commutative, so metrics can be merged
    /// in any grouping and order and land on the same record. (Summed doubles
    /// are subject to the usual floating point rounding.)
    pub fn merge(&mut self, other: &Record, descriptor: &RecordDescriptor) -> Result<()> {
        if descriptor.kind != RecordKind::Metric {
            return Err(Error::Merge(format!(
                "{} records are append-only",
                descriptor.name
            )));
        }
        if self.type_name != descriptor.name || other.type_name != descriptor.name {
            return Err(Error::Merge(format!(
                "cannot merge {} into {} using the {} descriptor",
                other.type_name, self.type_name, descriptor.name
            )));
        }
        if self.id != other.id {
            return Err(Error::Merge(format!(
                "ids differ: {} vs {}",
                self.id, other.id
            )));
        }
        for record in [&*self, other] {
            if let Some(column) = record
                .values
                .keys()
                .find(|k| descriptor.column(k).map_or(true, ColumnDescriptor::is_virtual))
            {
                return Err(Error::UnknownColumn {
                    record_type: descriptor.name.clone(),
                    column: column.clone(),
                });
            }
        }

        let left = &self.values;
        let right = &other.values;
        let mut merged = BTreeMap::new();
        for column in &descriptor.columns {
            if column.is_virtual() || matches!(column.merge, MergePolicy::MeanOf { .. }) {
                continue;
            }
            if let Some(v) = merge_column(column, left, right)? {
                merged.insert(column.name.clone(), v);
            }
        }

        for column in &descriptor.columns {
            if let MergePolicy::MeanOf { sum, count } = &column.merge {
                let sum = merged.get(sum).and_then(Value::as_i64);
                let count = merged.get(count).and_then(Value::as_i64);
                if let (Some(sum), Some(count)) = (sum, count) {
                    let mean = if count == 0 { 0 } else { sum / count };
                    merged.insert(column.name.clone(), Value::Long(mean));
                }
            }
        }

        self.values = merged;
        Ok(())
    }
}

fn merge_column(
    column: &ColumnDescriptor,
    left: &BTreeMap<String, Value>,
    right: &BTreeMap<String, Value>,
) -> Result<Option<Value>> {
    let name = column.name.as_str();
    let (l, r) = match (left.get(name), right.get(name)) {
        (None, None) => return Ok(None),
        (Some(v), None) | (None, Some(v)) if !matches!(column.merge, MergePolicy::LatestBy(_)) => {
            return Ok(Some(v.clone()))
        }
        (l, r) => (l, r),
    };

    let mismatch = |l: &Value, r: &Value| {
        Error::Merge(format!(
            "column {} holds {} and {}",
            name,
            l.kind(),
            r.kind()
        ))
    };

    let merged = match &column.merge {
        MergePolicy::Identity => {
            let (l, r) = both(l, r)?;
            if l != r {
                return Err(Error::Merge(format!(
                    "dimension {} differs: {:?} vs {:?}",
                    name, l, r
                )));
            }
            l.clone()
        }
        MergePolicy::Sum => {
            let (l, r) = both(l, r)?;
            match (l, r) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
                (Value::Long(a), Value::Long(b)) => Value::Long(a.wrapping_add(*b)),
                (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
                (l, r) => return Err(mismatch(l, r)),
            }
        }
        MergePolicy::Max | MergePolicy::Min => {
            let (l, r) = both(l, r)?;
            if l.kind() != r.kind() {
                return Err(mismatch(l, r));
            }
            let ord = l.total_cmp(r);
            let take_left = match column.merge {
                MergePolicy::Max => ord != Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            if take_left { l.clone() } else { r.clone() }
        }
        MergePolicy::LatestBy(by) => {
            // argmax over (by, value), absent sorting lowest
            let lk = (left.get(by.as_str()), l);
            let rk = (right.get(by.as_str()), r);
            match cmp_opt(lk.0, rk.0).then_with(|| cmp_opt(lk.1, rk.1)) {
                Ordering::Less => return Ok(r.cloned()),
                _ => return Ok(l.cloned()),
            }
        }
        MergePolicy::DataTableSum => {
            let (l, r) = both(l, r)?;
            match (l, r) {
                (Value::Complex(a), Value::Complex(b)) => {
                    let mut table = DataTable::from_storage_form(a)?;
                    table.append(&DataTable::from_storage_form(b)?);
                    Value::Complex(table.to_storage_form())
                }
                (l, r) => return Err(mismatch(l, r)),
            }
        }
        MergePolicy::MeanOf { .. } => return Ok(None),
    };
    Ok(Some(merged))
}

fn both<'a>(l: Option<&'a Value>, r: Option<&'a Value>) -> Result<(&'a Value, &'a Value)> {
    match (l, r) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(Error::Internal("merge reached with a missing side".to_string())),
    }
}

fn cmp_opt(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.total_cmp(b),
    }
}

/// Joins the identity columns' values with `_`.
pub fn derive_id(descriptor: &RecordDescriptor, values: &BTreeMap<String, Value>) -> Result<String> {
    let mut parts = Vec::with_capacity(descriptor.identity.len());
    for column in &descriptor.identity {
        let fragment = values
            .get(column)
            .and_then(Value::identity_fragment)
            .ok_or_else(|| Error::MissingValue {
                record_type: descriptor.name.clone(),
                column: column.clone(),
            })?;
        parts.push(fragment);
    }
    Ok(parts.join(ID_CONNECTOR))
}

/// Incremental construction of a [`Record`].
pub struct RecordBuilder<'a> {
    descriptor: &'a RecordDescriptor,
    values: BTreeMap<String, Value>,
}

impl RecordBuilder<'_> {
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }

    pub fn with_complex<T: ComplexObject>(mut self, column: &str, value: &T) -> Self {
        self.values
            .insert(column.to_string(), Value::Complex(value.to_storage_form()));
        self
    }

    pub fn build(self) -> Result<Record> {
        Record::from_values(self.descriptor, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SemanticType;

    fn latency() -> RecordDescriptor {
        RecordDescriptor::builder("latency", RecordKind::Metric)
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
            .merged("peak", SemanticType::Long, MergePolicy::Max)
            .merged("histogram", SemanticType::ComplexObject, MergePolicy::DataTableSum)
            .identity(&[TIME_BUCKET, "entity_id"])
            .build()
    }

    fn sample(d: &RecordDescriptor, total: i64, count: i64, peak: i64, bucket: &str) -> Record {
        let mut h = DataTable::new();
        h.value_accumulation(bucket, 1);
        Record::builder(d)
            .with(TIME_BUCKET, 202401010000i64)
            .with("entity_id", "svc")
            .with("total", total)
            .with("count", count)
            .with("value", total / count)
            .with("peak", peak)
            .with_complex("histogram", &h)
            .build()
            .unwrap()
    }

    #[test]
    fn id_joins_identity_columns() {
        let d = latency();
        let r = sample(&d, 10, 1, 10, "0");
        assert_eq!(r.id, "202401010000_svc");
    }

    #[test]
    fn missing_identity_value_is_reported() {
        let d = latency();
        let err = Record::builder(&d).with("entity_id", "svc").build().unwrap_err();
        assert!(matches!(err, Error::MissingValue { column, .. } if column == TIME_BUCKET));
    }

    #[test]
    fn merge_applies_policies() {
        let d = latency();
        let mut a = sample(&d, 100, 2, 70, "100");
        let b = sample(&d, 50, 3, 40, "0");
        a.merge(&b, &d).unwrap();
        assert_eq!(a.get_i64("total").unwrap(), 150);
        assert_eq!(a.get_i64("count").unwrap(), 5);
        assert_eq!(a.get_i64("value").unwrap(), 30);
        assert_eq!(a.get_i64("peak").unwrap(), 70);
        let h: DataTable = a.get_complex("histogram").unwrap();
        assert_eq!(h.get("0"), Some(1));
        assert_eq!(h.get("100"), Some(1));
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let d = latency();
        let a = sample(&d, 100, 2, 70, "100");
        let b = sample(&d, 50, 3, 40, "0");
        let c = sample(&d, 7, 1, 90, "100");

        let mut ab_c = a.clone();
        ab_c.merge(&b, &d).unwrap();
        ab_c.merge(&c, &d).unwrap();

        let mut bc = b.clone();
        bc.merge(&c, &d).unwrap();
        let mut a_bc = a.clone();
        a_bc.merge(&bc, &d).unwrap();

        let mut cba = c.clone();
        cba.merge(&b, &d).unwrap();
        cba.merge(&a, &d).unwrap();

        assert_eq!(ab_c, a_bc);
        assert_eq!(ab_c, cba);
    }

    #[test]
    fn latest_by_follows_the_ordering_column() {
        let d = RecordDescriptor::builder("traffic", RecordKind::Metric)
            .tag("name", SemanticType::String)
            .merged("last_ping", SemanticType::Long, MergePolicy::Max)
            .merged(
                "properties",
                SemanticType::String,
                MergePolicy::LatestBy("last_ping".into()),
            )
            .identity(&["name"])
            .build();
        d.validate().unwrap();
        let rec = |ping: i64, props: &str| {
            Record::builder(&d)
                .with(TIME_BUCKET, 202401010000i64)
                .with("name", "inst")
                .with("last_ping", ping)
                .with("properties", props)
                .build()
                .unwrap()
        };

        let mut newer_first = rec(20, "new");
        newer_first.merge(&rec(10, "old"), &d).unwrap();
        let mut older_first = rec(10, "old");
        older_first.merge(&rec(20, "new"), &d).unwrap();

        assert_eq!(newer_first, older_first);
        assert_eq!(older_first.get_str("properties").unwrap(), "new");
        assert_eq!(older_first.get_i64("last_ping").unwrap(), 20);

        // the later side wins whole, even when it carries no value
        let bare = Record::builder(&d)
            .with(TIME_BUCKET, 202401010000i64)
            .with("name", "inst")
            .with("last_ping", 30i64)
            .build()
            .unwrap();
        let mut stored_first = rec(20, "new");
        stored_first.merge(&bare, &d).unwrap();
        let mut bare_first = bare.clone();
        bare_first.merge(&rec(20, "new"), &d).unwrap();

        assert_eq!(stored_first, bare_first);
        assert_eq!(stored_first.get("properties"), None);
        assert_eq!(stored_first.get_i64("last_ping").unwrap(), 30);
    }

    #[test]
    fn differing_dimensions_do_not_merge() {
        let d = latency();
        let mut a = sample(&d, 1, 1, 1, "0");
        let mut b = sample(&d, 1, 1, 1, "0");
        b.id = a.id.clone();
        a.values.insert("entity_id".into(), Value::from("svc"));
        b.values.insert("entity_id".into(), Value::from("other"));
        assert!(matches!(a.merge(&b, &d), Err(Error::Merge(_))));
    }

    #[test]
    fn append_only_records_do_not_merge() {
        let d = RecordDescriptor::builder("event", RecordKind::AppendOnly)
            .tag("seq", SemanticType::Long)
            .identity(&["seq"])
            .build();
        let mut a = Record::builder(&d)
            .with(TIME_BUCKET, 20240101i64)
            .with("seq", 1i64)
            .build()
            .unwrap();
        let b = a.clone();
        assert!(a.merge(&b, &d).is_err());
    }
}
