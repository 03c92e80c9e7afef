//! Document, surface and generation identities.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stable identity of a trace document: its absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(Arc<Path>);

impl DocumentId {
    /// Build an identity for `path`.
    ///
    /// Existing files are canonicalized so that two spellings of the same
    /// file share one backend. Missing files are made absolute against the
    /// current directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let resolved = match std::fs::canonicalize(path) {
            Ok(canonical) => canonical,
            Err(_) if path.is_absolute() => path.to_path_buf(),
            Err(_) => std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf()),
        };
        Self(Arc::from(resolved))
    }

    /// Build an identity without touching the filesystem.
    #[must_use]
    pub fn from_raw(path: impl Into<PathBuf>) -> Self {
        Self(Arc::from(path.into()))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Final path component, or the whole path when there is none.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.display().to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Identity of one registered surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Spawn generation. Asynchronous callbacks carry the generation they were
/// created for; anything older than the document's current generation is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_become_absolute() {
        let doc = DocumentId::new("does-not-exist/trace.perfetto");
        assert!(doc.path().is_absolute());
        assert_eq!(doc.file_name(), "trace.perfetto");
    }

    #[test]
    fn existing_file_spellings_share_identity() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.trace");
        std::fs::write(&file, b"x").unwrap();
        let direct = DocumentId::new(&file);
        let dotted = DocumentId::new(dir.path().join(".").join("a.trace"));
        assert_eq!(direct, dotted);
    }

    #[test]
    fn generation_orders_and_advances() {
        let first = Generation::default().next();
        assert!(first.next() > first);
        assert_eq!(first.to_string(), "#1");
    }
}
