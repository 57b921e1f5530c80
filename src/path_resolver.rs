//! Sandboxing of client supplied file names.
//!
//! Every file name that reaches the server is resolved against the configured
//! files directory. The check is lexical: the joined path is normalized
//! (`.` dropped, `..` popped) and must still lie under the root afterwards.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{ReaderError, Result};

/// Absolute, normalized path that is known to lie inside the files directory.
///
/// Only [`PathResolver::resolve`] hands these out, so holding one is proof the
/// sandbox check has passed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalPath(PathBuf);

impl CanonicalPath {
    #[cfg(test)]
    pub(crate) fn new_unchecked(path: impl Into<PathBuf>) -> Self {
        CanonicalPath(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Resolves client file names relative to a root directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for `root`. Relative roots are made absolute against
    /// the current directory; the directory itself does not have to exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let absolute = std::path::absolute(root.as_ref())?;
        Ok(Self {
            root: normalize(&absolute),
        })
    }

    /// The normalized absolute root every resolved path lies under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `requested` onto the root and verify the result stays inside it.
    pub fn resolve(&self, requested: &str) -> Result<CanonicalPath> {
        // Leading separators would otherwise make `join` replace the root.
        let trimmed = requested.trim_start_matches(['/', '\\']);
        let relative = Path::new(trimmed);

        if relative
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        {
            return Err(ReaderError::AccessDenied(requested.to_string()));
        }

        let full = normalize(&self.root.join(relative));
        if !full.starts_with(&self.root) {
            return Err(ReaderError::AccessDenied(requested.to_string()));
        }

        Ok(CanonicalPath(full))
    }
}

/// Collapse `.` and `..` segments without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
