//! Workspace path confinement (§3 Workspace path, §4.2, §8 property 5).
//!
//! Every tool that touches the local filesystem resolves its path through
//! [`Workspace::resolve`], which canonicalizes the result and rejects
//! anything that escapes the configured root — the same check the upstream
//! filesystem tool performs before any read/write.

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub enum WorkspaceError {
    PathTraversal(String),
    Io(String),
}

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceError::PathTraversal(msg) => write!(f, "Path traversal attempt blocked: {msg}"),
            WorkspaceError::Io(msg) => write!(f, "Workspace I/O error: {msg}"),
        }
    }
}

impl std::error::Error for WorkspaceError {}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` against the workspace root and verify the real
    /// path stays under it. Accepts paths that do not yet exist (for
    /// writes/creates) by canonicalizing the nearest existing ancestor.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, WorkspaceError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| WorkspaceError::Io(format!("cannot create workspace root: {e}")))?;
        let root_canonical = self
            .root
            .canonicalize()
            .map_err(|e| WorkspaceError::Io(format!("cannot canonicalize root: {e}")))?;

        let candidate = self.root.join(relative.trim_start_matches('/'));

        let canonical_to_check = if candidate.exists() {
            candidate
                .canonicalize()
                .map_err(|e| WorkspaceError::Io(format!("cannot canonicalize path: {e}")))?
        } else {
            let mut ancestor = candidate.clone();
            loop {
                match ancestor.parent() {
                    Some(parent) if parent.exists() => {
                        let canonical_parent = parent
                            .canonicalize()
                            .map_err(|e| WorkspaceError::Io(format!("cannot canonicalize parent: {e}")))?;
                        let suffix = candidate.strip_prefix(parent).unwrap_or(&candidate);
                        break canonical_parent.join(suffix);
                    }
                    Some(parent) => {
                        ancestor = parent.to_path_buf();
                        continue;
                    }
                    None => break candidate.clone(),
                }
            }
        };

        if !canonical_to_check.starts_with(&root_canonical) {
            return Err(WorkspaceError::PathTraversal(format!(
                "{relative} resolves outside workspace root"
            )));
        }

        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_plain_relative_path_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let resolved = ws.resolve("report.txt").unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn rejects_parent_directory_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let err = ws.resolve("../../etc/passwd");
        assert!(matches!(err, Err(WorkspaceError::PathTraversal(_))));
    }
}
