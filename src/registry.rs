//! Bundle registry.
//!
//! Built once at startup from the `[bundles.*]` sections of the config
//! file. Each entry pairs an immutable [`EntityDescriptor`] with optional
//! [`BundleHooks`] that embedding code can install before the first run.
//!
//! Construction validates the reference graph:
//!
//! - every referenced bundle must be registered;
//! - references must form a DAG (self references are cycles too).
//!
//! [`BundleRegistry::dependency_order`] walks that graph depth-first so the
//! orchestrator can resolve the leaves before the bundles embedding them.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::descriptor::EntityDescriptor;
use crate::error::{IndexerError, Result};
use crate::models::Document;

/// Hook run on a row or document of one bundle.
pub type DocumentHook = Arc<dyn Fn(&mut Document) + Send + Sync>;

/// Hook producing the index mapping of a bundle.
pub type MappingHook = Arc<dyn Fn(&EntityDescriptor) -> Value + Send + Sync>;

/// Per-bundle customization points.
#[derive(Clone, Default)]
pub struct BundleHooks {
    /// Runs on the raw row before any decoding.
    pub pre_transform: Option<DocumentHook>,
    /// Runs on the finished document.
    pub post_transform: Option<DocumentHook>,
    /// Replaces the mapping derived from the descriptor.
    pub mapping: Option<MappingHook>,
}

impl std::fmt::Debug for BundleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleHooks")
            .field("pre_transform", &self.pre_transform.is_some())
            .field("post_transform", &self.post_transform.is_some())
            .field("mapping", &self.mapping.is_some())
            .finish()
    }
}

/// A registered bundle.
#[derive(Debug, Clone)]
pub struct RegisteredBundle {
    pub descriptor: EntityDescriptor,
    pub hooks: BundleHooks,
}

/// All bundles known to this process.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    bundles: BTreeMap<String, RegisteredBundle>,
}

impl BundleRegistry {
    /// Build the registry from the `[bundles.*]` config sections.
    pub fn from_config(config: &Config) -> Result<Self> {
        let descriptors = config
            .bundles
            .iter()
            .map(|(name, bundle)| EntityDescriptor::from_config(name, bundle))
            .collect::<Result<Vec<_>>>()?;
        Self::from_descriptors(descriptors)
    }

    /// Build the registry from already validated descriptors.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Result<Self> {
        let mut bundles = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.bundle.clone();
            let entry = RegisteredBundle {
                descriptor,
                hooks: BundleHooks::default(),
            };
            if bundles.insert(name.clone(), entry).is_some() {
                return Err(IndexerError::config(format!("Bundle '{}' is declared twice", name)));
            }
        }

        let registry = Self { bundles };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        for (name, bundle) in &self.bundles {
            for dep in bundle.descriptor.dependencies() {
                if !self.bundles.contains_key(dep) {
                    return Err(IndexerError::config(format!(
                        "Bundle '{}' references unknown bundle '{}'",
                        name, dep
                    )));
                }
            }
        }
        for name in self.bundles.keys() {
            self.dependency_order(name)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&RegisteredBundle> {
        self.bundles
            .get(name)
            .ok_or_else(|| IndexerError::UnknownBundle(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Result<&EntityDescriptor> {
        self.get(name).map(|b| &b.descriptor)
    }

    /// Install hooks for a registered bundle.
    pub fn set_hooks(&mut self, name: &str, hooks: BundleHooks) -> Result<()> {
        let bundle = self
            .bundles
            .get_mut(name)
            .ok_or_else(|| IndexerError::UnknownBundle(name.to_string()))?;
        bundle.hooks = hooks;
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Bundles `name` depends on, transitively, leaves first. `name` itself
    /// is not included.
    pub fn dependency_order(&self, name: &str) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut path = Vec::new();
        self.visit(name, &mut path, &mut order)?;
        order.pop();
        Ok(order)
    }

    fn visit(&self, name: &str, path: &mut Vec<String>, order: &mut Vec<String>) -> Result<()> {
        if path.iter().any(|p| p == name) {
            path.push(name.to_string());
            return Err(IndexerError::config(format!(
                "Cyclic bundle references: {}",
                path.join(" -> ")
            )));
        }
        if order.iter().any(|o| o == name) {
            return Ok(());
        }

        let descriptor = self.descriptor(name)?;
        path.push(name.to_string());
        for dep in descriptor.dependencies() {
            self.visit(dep, path, order)?;
        }
        path.pop();
        order.push(name.to_string());
        Ok(())
    }
}
