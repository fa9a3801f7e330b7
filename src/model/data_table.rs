//! Keyed counters persisted as a single complex column

use super::value::ComplexObject;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Ordered `key -> count` table, e.g. latency histogram buckets.
///
/// Storage form is `key,value|key,value` with keys in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTable {
    data: BTreeMap<String, i64>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.data.get(key).copied()
    }

    /// Adds `delta` to the counter stored under `key`.
    pub fn value_accumulation(&mut self, key: impl Into<String>, delta: i64) {
        *self.data.entry(key.into()).or_insert(0) += delta;
    }

    /// Per-key sum of both tables.
    pub fn append(&mut self, other: &DataTable) {
        for (k, v) in &other.data {
            self.value_accumulation(k.clone(), *v);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ComplexObject for DataTable {
    fn to_storage_form(&self) -> String {
        self.data
            .iter()
            .map(|(k, v)| format!("{},{}", k, v))
            .collect::<Vec<_>>()
            .join("|")
    }

    fn from_storage_form(data: &str) -> Result<Self> {
        let mut table = DataTable::new();
        for entry in data.split('|').filter(|e| !e.is_empty()) {
            let (key, value) = entry.rsplit_once(',').ok_or_else(|| Error::Decode {
                column: "data_table".to_string(),
                reason: format!("entry '{}' is not key,value", entry),
            })?;
            let value = value.parse::<i64>().map_err(|e| Error::Decode {
                column: "data_table".to_string(),
                reason: format!("entry '{}': {}", entry, e),
            })?;
            table.value_accumulation(key, value);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_form_is_sorted_and_parseable() {
        let mut t = DataTable::new();
        t.value_accumulation("200", 3);
        t.value_accumulation("100", 1);
        assert_eq!(t.to_storage_form(), "100,1|200,3");
        assert_eq!(DataTable::from_storage_form("100,1|200,3").unwrap(), t);
    }

    #[test]
    fn empty_storage_form() {
        assert!(DataTable::from_storage_form("").unwrap().is_empty());
    }

    #[test]
    fn append_sums_per_key() {
        let mut a = DataTable::from_storage_form("0,1|100,2").unwrap();
        let b = DataTable::from_storage_form("100,5|200,1").unwrap();
        a.append(&b);
        assert_eq!(a.to_storage_form(), "0,1|100,7|200,1");
    }

    #[test]
    fn malformed_entry_is_a_decode_error() {
        assert!(matches!(
            DataTable::from_storage_form("100;1"),
            Err(Error::Decode { .. })
        ));
    }
}
