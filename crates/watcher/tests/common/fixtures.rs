//! Temporary directory trees

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch tree that is removed on drop
pub struct TestTree {
    _dir: TempDir,
    root: PathBuf,
}

impl TestTree {
    /// An empty tree
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp dir")?;
        let root = fs::canonicalize(dir.path())?;
        Ok(Self { _dir: dir, root })
    }

    /// The standard three-file fixture:
    ///
    /// ```text
    /// foo/bar.ts
    /// foo/bar/index.js
    /// foo/bar/baz/index.ts
    /// ```
    pub fn with_fixture() -> Result<Self> {
        let tree = Self::new()?;
        tree.write("foo/bar.ts", "export {}")?;
        tree.write("foo/bar/index.js", "module.exports = {}")?;
        tree.write("foo/bar/baz/index.ts", "export {}")?;
        Ok(tree)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write a file, creating parent directories
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.abs(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("Failed to write {rel}"))?;
        Ok(path)
    }

    pub fn mkdir(&self, rel: &str) -> Result<PathBuf> {
        let path = self.abs(rel);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove a file or a whole directory
    pub fn remove(&self, rel: &str) -> Result<()> {
        let path = self.abs(rel);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.abs(from), self.abs(to))?;
        Ok(())
    }

    #[cfg(unix)]
    pub fn set_mode(&self, rel: &str, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(self.abs(rel), fs::Permissions::from_mode(mode))?;
        Ok(())
    }
}
