//! Named script resources and their on-disk materialization
//!
//! Scripts and their helpers are addressed by relative, path-like names
//! (`bash/setup.sh`). A [`ResourceSet`] searches an ordered list of
//! [`ResourceProvider`]s; the first provider that has a name wins, always in
//! the same order. [`ResourceCache`] writes resolved bytes to disk.

pub mod cache;
pub mod provider;

pub use cache::ResourceCache;
pub use provider::{DirectoryProvider, MemoryProvider};

use std::collections::BTreeSet;
use std::path::{Component, Path};

use crate::error::{Error, Result};

/// A read-only source of named resources
pub trait ResourceProvider: Send + Sync {
    /// Human-readable provider name, used in error messages
    fn name(&self) -> String;

    /// Fetch the bytes of `name`, or `None` if this provider lacks it
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// All names this provider exposes
    fn names(&self) -> Result<Vec<String>>;
}

/// Ordered collection of providers with first-match lookup
#[derive(Default)]
pub struct ResourceSet {
    providers: Vec<Box<dyn ResourceProvider>>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider; it is searched after every provider added before it
    pub fn with_provider(mut self, provider: impl ResourceProvider + 'static) -> Self {
        self.push(Box::new(provider));
        self
    }

    pub fn push(&mut self, provider: Box<dyn ResourceProvider>) {
        self.providers.push(provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Look up `name` in provider order
    pub fn lookup(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;

        for provider in &self.providers {
            if let Some(bytes) = provider.get(name)? {
                tracing::trace!(resource = name, provider = %provider.name(), "resource resolved");
                return Ok(bytes);
            }
        }

        Err(Error::ResourceNotFound {
            name: name.to_string(),
            searched: self.providers.iter().map(|p| p.name()).collect(),
        })
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        match self.lookup(name) {
            Ok(_) => Ok(true),
            Err(Error::ResourceNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Sorted union of the names of every provider
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for provider in &self.providers {
            names.extend(provider.names()?);
        }
        Ok(names.into_iter().collect())
    }
}

/// Resource names are relative and may not escape their root
pub fn validate_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidResourceName(name.to_string()))
    }
}
