//! In-process module boundary
//!
//! Modules publish services by type; other modules find them by module name
//! and service type. Services are stored as `Arc<S>` for any `S`, including
//! trait objects such as `Arc<dyn StorageDao>`.

use crate::{Error, Result};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::debug;

/// Module holding configuration services.
pub const CORE: &str = "core";
/// Module holding the storage DAOs and schema registry.
pub const STORAGE: &str = "storage";
/// Module holding metrics creators.
pub const TELEMETRY: &str = "telemetry";

/// Services published by one module.
#[derive(Default)]
pub struct ModuleProvider {
    name: String,
    services: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ModuleProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes a service, replacing any earlier one of the same type.
    pub fn register_service<S>(&self, service: Arc<S>)
    where
        S: ?Sized + Send + Sync + 'static,
    {
        debug!(module = %self.name, service = std::any::type_name::<S>(), "Registered service");
        self.services
            .insert(TypeId::of::<Arc<S>>(), Box::new(service));
    }

    pub fn get_service<S>(&self) -> Result<Arc<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.services
            .get(&TypeId::of::<Arc<S>>())
            .and_then(|entry| entry.value().downcast_ref::<Arc<S>>().cloned())
            .ok_or_else(|| {
                Error::Module(format!(
                    "module {} provides no {}",
                    self.name,
                    std::any::type_name::<S>()
                ))
            })
    }
}

/// Registry of modules by name.
#[derive(Default)]
pub struct ModuleManager {
    modules: DashMap<String, Arc<ModuleProvider>>,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the module named `name`, creating it when absent.
    pub fn register_module(&self, name: &str) -> Arc<ModuleProvider> {
        self.modules
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ModuleProvider::new(name)))
            .clone()
    }

    pub fn find(&self, name: &str) -> Result<Arc<ModuleProvider>> {
        self.modules
            .get(name)
            .map(|m| m.value().clone())
            .ok_or_else(|| Error::Module(format!("module {} is not registered", name)))
    }
}
