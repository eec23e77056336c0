//! Serialized secure builds
//!
//! The merge engine mutates shared internal state and is not safe to run
//! concurrently, so every invocation in the process is serialized behind a
//! single lock. The engine has also been observed to panic on malformed or
//! self-contradictory resource data; the invocation runs inside a panic
//! boundary that converts any panic into a [`BuildError::PanicRecovered`]
//! and guarantees the lock is released, so the next build always runs.
//!
//! Only the engine call is inside the critical section. Scanning and
//! descriptor synthesis for different target directories proceed in
//! parallel. A remote-base fetch during a locked build inherits the lock
//! scope: a pathological fetch hang blocks all builds process-wide, a known
//! limitation rather than a contract.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use overpack_core::fs::{RemoteFetcher, RootedFs};
use overpack_engine::{BuildOptions, Engine, HttpFetcher, ResolvedSet};

use crate::error::{BuildError, Result};

/// Process-wide engine lock; not per root or per call.
static ENGINE_LOCK: Mutex<()> = Mutex::new(());

/// Build the overlay at `target_dir` against the sandbox `root`.
///
/// `allow_remote_bases` selects the filesystem boundary variant;
/// `legacy_resource_sort` selects the legacy fixed output ordering instead
/// of the engine's default order.
pub fn secure_build(
    root: impl AsRef<Path>,
    target_dir: impl AsRef<Path>,
    allow_remote_bases: bool,
    legacy_resource_sort: bool,
) -> Result<ResolvedSet> {
    if allow_remote_bases {
        secure_build_with_fetcher(
            root,
            target_dir,
            Arc::new(HttpFetcher::new()),
            legacy_resource_sort,
        )
    } else {
        let fs = RootedFs::strict(root)?;
        build_locked(&fs, target_dir.as_ref(), legacy_resource_sort)
    }
}

/// [`secure_build`] with remote bases resolved through `fetcher` instead of
/// the HTTP client. The injection seam hermetic tests rely on.
pub fn secure_build_with_fetcher(
    root: impl AsRef<Path>,
    target_dir: impl AsRef<Path>,
    fetcher: Arc<dyn RemoteFetcher>,
    legacy_resource_sort: bool,
) -> Result<ResolvedSet> {
    let fs = RootedFs::remote_capable(root, fetcher)?;
    build_locked(&fs, target_dir.as_ref(), legacy_resource_sort)
}

fn build_locked(fs: &RootedFs, target_dir: &Path, legacy_resource_sort: bool) -> Result<ResolvedSet> {
    let engine = Engine::new(BuildOptions {
        legacy_sort: legacy_resource_sort,
    });
    let outcome = run_serialized(|| engine.run(fs, target_dir))?;
    Ok(outcome?)
}

/// Run `f` inside the engine's critical section, converting a panic into an
/// error.
///
/// The panic is caught before the guard goes out of scope, so the unwind
/// never crosses the lock and the lock is released normally on every exit
/// path. Acquisition tolerates poisoning for the same reason: even if a
/// panic did poison the lock, the next build must proceed.
fn run_serialized<T>(f: impl FnOnce() -> T) -> Result<T> {
    let _guard = ENGINE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!("recovered from engine build panic: {message}");
            Err(BuildError::PanicRecovered { message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_panic_becomes_error_and_lock_is_released() {
        let err = run_serialized(|| -> usize { panic!("engine blew up") }).unwrap_err();
        match &err {
            BuildError::PanicRecovered { message } => {
                assert!(message.contains("engine blew up"));
            }
            other => panic!("expected PanicRecovered, got {other:?}"),
        }

        // the lock must be observably released: this call completes
        let value = run_serialized(|| 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_panic_payload_string_preserved() {
        let err = run_serialized(|| -> () { panic!("bad replica count: {}", -1) }).unwrap_err();
        assert!(err.to_string().contains("bad replica count: -1"));
    }

    #[test]
    fn test_invocations_are_serialized() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlap_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let active = Arc::clone(&active);
                let overlap_seen = Arc::clone(&overlap_seen);
                thread::spawn(move || {
                    run_serialized(|| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        overlap_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlap_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_build_after_panic_runs_to_completion() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("overlay.yaml"),
            "resources:\n  - ./cm.yaml\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("cm.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
        )
        .unwrap();

        let _ = run_serialized(|| -> usize { panic!("poisoning attempt") });

        let set = secure_build(temp.path(), temp.path(), false, false).unwrap();
        assert_eq!(set.len(), 1);
    }
}
