//! Sandboxed filesystem boundary
//!
//! All pipeline I/O goes through a `RootedFs` bound to a root directory.
//! Every path argument is normalized and checked to lie within that root
//! before any read, write, or existence check touches actual storage; an
//! attempted escape fails with `CoreError::PathEscape` and performs no I/O.
//!
//! Two construction modes exist:
//! - `RootedFs::strict` denies any access outside the root, including
//!   remote references.
//! - `RootedFs::remote_capable` additionally resolves remote base
//!   references through a [`RemoteFetcher`], while still rejecting local
//!   escapes.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{CoreError, Result};

/// Resolves remote base references for a remote-capable filesystem.
///
/// The production implementation performs HTTP(S) fetches; tests inject an
/// in-memory [`MockFetcher`].
pub trait RemoteFetcher: Send + Sync {
    /// Fetch the contents behind a remote reference.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// A filesystem handle confined to a root directory.
pub struct RootedFs {
    /// Canonicalized root; the prefix every resolved path must keep.
    root: PathBuf,
    /// Present only on remote-capable handles.
    fetcher: Option<Arc<dyn RemoteFetcher>>,
}

impl RootedFs {
    /// Create a strict handle: local files under `root` only.
    pub fn strict(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root: canonical_root(root.as_ref())?,
            fetcher: None,
        })
    }

    /// Create a remote-capable handle: local files under `root`, plus
    /// remote references resolved through `fetcher`.
    pub fn remote_capable(root: impl AsRef<Path>, fetcher: Arc<dyn RemoteFetcher>) -> Result<Self> {
        Ok(Self {
            root: canonical_root(root.as_ref())?,
            fetcher: Some(fetcher),
        })
    }

    /// The canonicalized sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether remote references may be resolved through this handle.
    pub fn allows_remote(&self) -> bool {
        self.fetcher.is_some()
    }

    /// Resolve `path` (absolute, or relative to the root) to an absolute
    /// path proven to lie within the root.
    ///
    /// Normalization is lexical (`.`/`..` components) followed by a symlink
    /// check: the longest existing prefix of the candidate is canonicalized
    /// and must still start with the root. Both checks must pass before any
    /// caller performs I/O on the result.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let normalized = lexical_normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(escape(path));
        }

        // A symlink under the root may still point outside it; canonicalize
        // the existing portion of the path to catch that.
        let mut existing = normalized.clone();
        while !existing.exists() {
            if !existing.pop() {
                return Err(escape(path));
            }
        }
        let canonical = existing.canonicalize()?;
        if !canonical.starts_with(&self.root) {
            return Err(escape(path));
        }

        Ok(normalized)
    }

    /// Whether `path` exists inside the root. Escaping paths report `false`.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Whether `path` is a directory inside the root.
    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    /// Read a file inside the root.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        Ok(std::fs::read(resolved)?)
    }

    /// Read a UTF-8 file inside the root.
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        let resolved = self.resolve(path)?;
        Ok(std::fs::read_to_string(resolved)?)
    }

    /// Write a file inside the root, replacing any existing contents.
    pub fn write(&self, path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
        let resolved = self.resolve(path)?;
        Ok(std::fs::write(resolved, contents)?)
    }

    /// Resolve a remote reference, if this handle permits it.
    pub fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        match &self.fetcher {
            Some(fetcher) => fetcher.fetch(url),
            None => Err(CoreError::RemoteRefused {
                url: url.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for RootedFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootedFs")
            .field("root", &self.root)
            .field("remote", &self.fetcher.is_some())
            .finish()
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    let canonical = root.canonicalize()?;
    if !canonical.is_dir() {
        return Err(CoreError::Io(io::Error::other(format!(
            "sandbox root '{}' is not a directory",
            root.display()
        ))));
    }
    Ok(canonical)
}

fn escape(path: &Path) -> CoreError {
    CoreError::PathEscape {
        path: path.display().to_string(),
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// In-memory fetcher for tests: serves pre-registered responses by URL.
#[derive(Debug, Default, Clone)]
pub struct MockFetcher {
    responses: HashMap<String, Vec<u8>>,
}

impl MockFetcher {
    /// Create an empty mock fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response body for a URL.
    pub fn with_response(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.to_string(), body.into());
        self
    }
}

impl RemoteFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| CoreError::RemoteFetch {
                url: url.to_string(),
                message: "no response registered".to_string(),
            })
    }
}
