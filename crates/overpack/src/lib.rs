//! Overpack - a secure overlay build pipeline
//!
//! Given a sandboxed root directory and a target subdirectory inside it,
//! the pipeline discovers declarative resource files, synthesizes or
//! augments the overlay descriptor describing how they are combined and
//! patched, and drives the overlay-merge engine to produce a single
//! ordered set of resolved resources.
//!
//! Three guarantees hold across every call:
//! - no read or write ever escapes the sandbox root
//! - engine invocations are serialized process-wide
//! - an engine panic is converted into an error; it never takes the
//!   process down and never leaves the engine lock held
//!
//! The two entry points are [`generate_or_update_descriptor`] and
//! [`secure_build`]; both are safe to call concurrently from independent
//! reconciliation workers.

pub mod builder;
pub mod error;
pub mod generator;
pub mod overrides;

pub use builder::{secure_build, secure_build_with_fetcher};
pub use error::{BuildError, Result};
pub use generator::DescriptorGenerator;
pub use overrides::{ImageOverride, InlinePatch, OperationsPatch, OverrideSpec, Selector};

pub use overpack_core::descriptor::Descriptor;
pub use overpack_engine::ResolvedSet;

use std::path::Path;

/// Ensure the descriptor at `target_dir` exists and reflects `spec`.
///
/// Returns the synthesized descriptor value; the on-disk file is the
/// artifact the engine and external consumers of the directory read.
pub fn generate_or_update_descriptor(
    root: impl AsRef<Path>,
    target_dir: impl AsRef<Path>,
    spec: &OverrideSpec,
) -> Result<Descriptor> {
    DescriptorGenerator::new(root.as_ref(), spec.clone()).write_file(target_dir)
}
