//! Overpack Core - shared types for the overlay build pipeline
//!
//! This crate provides the foundational pieces used throughout Overpack:
//! - `RootedFs`: a sandboxed filesystem boundary confined to a root directory
//! - `Resource`: a Kubernetes-style manifest object decoded from YAML
//! - `Descriptor`: the on-disk overlay descriptor consumed by the merge engine
//! - `CoreError`: the shared error taxonomy

pub mod descriptor;
pub mod error;
pub mod fs;
pub mod resource;

pub use descriptor::{Descriptor, Image, OpKind, Patch, PatchOp, Selector};
pub use error::{CoreError, Result};
pub use fs::{MockFetcher, RemoteFetcher, RootedFs};
pub use resource::{ResId, Resource, decode_all};
