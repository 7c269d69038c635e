//! # Workspace Confinement
//!
//! The session root plus the configured writable roots. Every path a tool call names, whether
//! a patch target or a command's working directory, is resolved here before it is used.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("{path} is outside the workspace {root}")]
    Outside { path: String, root: String },

    #[error("cannot resolve {path}: {source}")]
    Resolve {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    writable: Vec<PathBuf>,
}

impl Workspace {
    pub fn new(root: &Path, writable_roots: &[PathBuf]) -> Self {
        let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
        Self {
            root: canonical(root),
            writable: writable_roots.iter().map(|p| canonical(p)).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn writable_roots(&self) -> &[PathBuf] {
        &self.writable
    }

    /// Whether an already-resolved path lies under the root or a writable root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root) || self.writable.iter().any(|r| path.starts_with(r))
    }

    /// Resolves `path` against `base` and checks it stays inside the workspace.
    ///
    /// Symlinks in the existing prefix are followed before the check, so a link pointing out
    /// of the tree is rejected like a `..` would be.
    pub fn confine(&self, base: &Path, path: &Path) -> Result<PathBuf, WorkspaceError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };
        let resolved = canonicalize_lenient(&joined)?;
        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(WorkspaceError::Outside {
                path: path.display().to_string(),
                root: self.root.display().to_string(),
            })
        }
    }
}

/// Canonicalizes the nearest existing ancestor and re-appends the missing tail.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, WorkspaceError> {
    let resolve_error = |source| WorkspaceError::Resolve {
        path: path.display().to_string(),
        source,
    };

    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    while std::fs::symlink_metadata(&existing).is_err() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            // `..` or `.` as the last component has no file name
            _ => break,
        }
    }

    let mut resolved = std::fs::canonicalize(&existing).map_err(resolve_error)?;
    for name in missing.into_iter().rev() {
        match Path::new(&name).components().next() {
            Some(Component::Normal(part)) => resolved.push(part),
            _ => {
                return Err(resolve_error(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "relative component in a path that does not exist",
                )));
            }
        }
    }
    Ok(resolved)
}
