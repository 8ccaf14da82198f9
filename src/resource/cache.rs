//! On-disk materialization of resources
//!
//! The cache directory is written only through [`ResourceCache::materialize`].
//! Every call rewrites the file, so a cached script is never stale.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::ResourceSet;
use crate::error::{Error, Result};
use crate::logging::{operations, status};
use crate::storage::write_atomic;

#[derive(Clone)]
pub struct ResourceCache {
    resources: Arc<ResourceSet>,
    cache_dir: PathBuf,
}

impl ResourceCache {
    pub fn new(resources: Arc<ResourceSet>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            resources,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where `name` lands inside the cache directory
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// Write resource `name` to `cache_dir/name` and return its absolute path
    pub fn materialize(&self, name: &str) -> Result<PathBuf> {
        let bytes = self.resources.lookup(name).inspect_err(|e| {
            if matches!(e, Error::ResourceNotFound { .. }) {
                debug!(
                    operation = operations::MATERIALIZE,
                    status = status::NOT_FOUND,
                    resource = name,
                    "resource missing"
                );
            }
        })?;

        let target = self.path_for(name);
        write_atomic(&target, &bytes)?;

        let absolute = std::path::absolute(&target).map_err(|e| Error::io(&target, e))?;

        debug!(
            operation = operations::MATERIALIZE,
            status = status::SUCCESS,
            resource = name,
            path = %absolute.display(),
            size_bytes = bytes.len(),
            "resource materialized"
        );

        Ok(absolute)
    }
}
