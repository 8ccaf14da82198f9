use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{FixtureConfig, Project, MANIFEST_FILE};

/// Discovers the manifest by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(MANIFEST_FILE);
        if config_path.is_file() {
            return Ok(Some(config_path));
        }

        // Try to go up one level
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(None)
}

/// Locate the manifest to use
///
/// An explicit path may name the manifest itself or a directory holding
/// `fixturegen.toml`. Without one, the manifest is discovered from the
/// current directory upwards.
pub fn locate_config(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        let path = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        if !path.is_file() {
            bail!("Manifest not found: {}", path.display());
        }
        return Ok(path);
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;

    match discover_config(&current_dir)? {
        Some(path) => Ok(path),
        None => bail!(
            "No {} found in {} or any parent directory (run `fixturegen init` to create one)",
            MANIFEST_FILE,
            current_dir.display()
        ),
    }
}

/// Loads the manifest with auto-discovery support and builds its graph
///
/// Relative paths in the manifest are resolved against its directory.
pub fn load_project(explicit_path: Option<&Path>) -> Result<Project> {
    let path = locate_config(explicit_path)?;
    let path = std::path::absolute(&path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    tracing::debug!(path = %path.display(), "using manifest");

    let config = FixtureConfig::from_file(&path)?;
    let project = config
        .into_project(&root)
        .with_context(|| format!("Invalid manifest: {}", path.display()))?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_config_finds_nearest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        // Create nested structure
        let project = root.join("project");
        let subdir = project.join("subdir");
        fs::create_dir_all(&subdir).unwrap();

        let config_path = project.join(MANIFEST_FILE);
        fs::write(&config_path, "# test manifest").unwrap();

        // Search from subdir should find project manifest
        let found = discover_config(&subdir).unwrap();
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_discover_config_ignores_directories_named_like_manifest() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(MANIFEST_FILE)).unwrap();

        let found = discover_config(temp.path()).unwrap();
        assert_ne!(found, Some(temp.path().join(MANIFEST_FILE)));
    }

    #[test]
    fn test_locate_config_accepts_directory() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(MANIFEST_FILE);
        fs::write(&config_path, "").unwrap();

        assert_eq!(locate_config(Some(temp.path())).unwrap(), config_path);
        assert!(locate_config(Some(&temp.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_load_project_resolves_against_manifest_dir() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(MANIFEST_FILE);
        fs::write(
            &config_path,
            "resources = [\"scripts\"]\n\n[[scenario]]\nname = \"make_a\"\n",
        )
        .unwrap();

        let project = load_project(Some(&config_path)).unwrap();
        let root = std::path::absolute(temp.path()).unwrap();
        assert_eq!(project.root, root);
        assert!(project.graph.contains("make_a"));
    }

    #[test]
    #[serial]
    fn test_load_project_discovers_from_current_dir() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("fixtures/svn");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            temp.path().join(MANIFEST_FILE),
            "[[scenario]]\nname = \"empty\"\n",
        )
        .unwrap();

        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(&nested).unwrap();
        let result = load_project(None);
        std::env::set_current_dir(original).unwrap();

        let project = result.unwrap();
        assert!(project.graph.contains("empty"));
        assert_eq!(
            fs::canonicalize(&project.root).unwrap(),
            fs::canonicalize(temp.path()).unwrap()
        );
    }
}
