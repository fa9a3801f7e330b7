//! Write-once schema registry

use super::Schema;
use crate::model::RecordDescriptor;
use crate::{BackendKind, Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Per-backend registry of record schemas.
///
/// Record types register while the storage provider starts. `publish`
/// freezes the set into an immutable map which is then read without locks.
pub struct SchemaRegistry {
    backend: BackendKind,
    staged: Mutex<HashMap<String, Arc<Schema>>>,
    published: OnceLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            staged: Mutex::new(HashMap::new()),
            published: OnceLock::new(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Registers a record type and returns its schema.
    ///
    /// Registering the same descriptor again returns the cached schema. A
    /// different descriptor under a known name fails with `SchemaConflict`.
    pub fn register(&self, descriptor: &RecordDescriptor) -> Result<Arc<Schema>> {
        if let Some(published) = self.published.get() {
            return Self::lookup_existing(published, descriptor)?
                .ok_or_else(|| Error::RegistrySealed(descriptor.name.clone()));
        }

        descriptor.validate()?;

        let mut staged = self.staged.lock();
        // publish() may have won the race while we validated
        if let Some(published) = self.published.get() {
            return Self::lookup_existing(published, descriptor)?
                .ok_or_else(|| Error::RegistrySealed(descriptor.name.clone()));
        }
        if let Some(existing) = Self::lookup_existing(&staged, descriptor)? {
            return Ok(existing);
        }

        let schema = Arc::new(Schema::build(descriptor.clone(), self.backend));
        staged.insert(descriptor.name.clone(), schema.clone());
        debug!(
            record_type = %descriptor.name,
            backend = self.backend.as_str(),
            columns = schema.columns().len(),
            "Registered schema"
        );
        Ok(schema)
    }

    fn lookup_existing(
        map: &HashMap<String, Arc<Schema>>,
        descriptor: &RecordDescriptor,
    ) -> Result<Option<Arc<Schema>>> {
        match map.get(&descriptor.name) {
            Some(existing) if existing.descriptor() == descriptor => Ok(Some(existing.clone())),
            Some(_) => Err(Error::SchemaConflict(descriptor.name.clone())),
            None => Ok(None),
        }
    }

    /// Freezes the registry. Later calls are no-ops.
    pub fn publish(&self) {
        let mut staged = self.staged.lock();
        if self.published.get().is_some() {
            return;
        }
        let schemas = std::mem::take(&mut *staged);
        let count = schemas.len();
        if self.published.set(schemas).is_ok() {
            info!(
                backend = self.backend.as_str(),
                schemas = count,
                "Schema registry published"
            );
        }
    }

    pub fn is_published(&self) -> bool {
        self.published.get().is_some()
    }

    pub fn get_schema(&self, record_type: &str) -> Result<Arc<Schema>> {
        let found = match self.published.get() {
            Some(published) => published.get(record_type).cloned(),
            None => self.staged.lock().get(record_type).cloned(),
        };
        found.ok_or_else(|| Error::SchemaNotFound(record_type.to_string()))
    }

    /// Registered record type names, sorted.
    pub fn record_types(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.published.get() {
            Some(published) => published.keys().cloned().collect(),
            None => self.staged.lock().keys().cloned().collect(),
        };
        names.sort();
        names
    }
}
