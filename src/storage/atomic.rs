//! Atomic file writes
//!
//! Every file this crate produces is written to a temporary file in the
//! destination directory and renamed into place, so readers never observe a
//! partially written file and a failed writer leaves the previous content.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// A temporary file that replaces `target` on [`StagedFile::commit`].
///
/// Dropping it without committing deletes the temporary file.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Create the parent directories of `target` and a temporary file next to it
    pub fn new(target: &Path) -> Result<Self> {
        let parent = match target.parent() {
            Some(parent) if parent != Path::new("") => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| Error::io(&parent, e))?;

        let temp = tempfile::Builder::new()
            .prefix(".fixturegen-")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| Error::io(&parent, e))?;

        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }

    /// A second handle to the temporary file, e.g. for a child's stdout
    pub fn handle(&self) -> Result<File> {
        self.temp
            .as_file()
            .try_clone()
            .map_err(|e| Error::io(self.temp.path(), e))
    }

    /// Flush and rename the temporary file onto the target
    pub fn commit(self) -> Result<()> {
        self.temp
            .as_file()
            .sync_all()
            .map_err(|e| Error::io(self.temp.path(), e))?;
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| Error::io(&target, e.error))?;
        Ok(())
    }
}

/// Write `data` to `path` atomically, creating parent directories
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut staged = StagedFile::new(path)?;
    staged
        .file_mut()
        .write_all(data)
        .map_err(|e| Error::io(path, e))?;
    staged.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents_and_overwrites() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/c.txt");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_dropped_stage_leaves_no_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.dump");

        {
            let mut staged = StagedFile::new(&path).unwrap();
            staged.file_mut().write_all(b"partial").unwrap();
        }

        assert!(!path.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_dropped_stage_keeps_previous_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.dump");
        fs::write(&path, b"good").unwrap();

        {
            let mut staged = StagedFile::new(&path).unwrap();
            staged.file_mut().write_all(b"bad").unwrap();
        }

        assert_eq!(fs::read(&path).unwrap(), b"good");
    }
}
