//! Overpack Engine - resolves an overlay descriptor into an ordered resource set
//!
//! The engine reads the descriptor in a target directory, accumulates the
//! resources it references (plain files, nested overlay directories built
//! recursively, remote bases when the filesystem boundary permits them),
//! applies the descriptor's transformations, and returns a [`ResolvedSet`].
//!
//! All I/O goes through the caller's [`RootedFs`]: entries may point outside
//! the descriptor's own directory but never outside the sandbox root.

pub mod error;
mod fetch;
mod patch;
mod sort;
mod transform;

pub use error::{EngineError, Result};
pub use fetch::{HttpFetcher, is_remote_ref};

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use overpack_core::descriptor::{self, Descriptor};
use overpack_core::fs::RootedFs;
use overpack_core::resource::{self, ResId, Resource};

/// Options for a single engine invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Apply the legacy fixed ordering (namespaces first, webhook
    /// configurations last) instead of accumulation order.
    pub legacy_sort: bool,
}

/// The overlay-merge engine.
pub struct Engine {
    options: BuildOptions,
}

impl Engine {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    /// Resolve the descriptor in `target_dir` into an ordered resource set.
    pub fn run(&self, fs: &RootedFs, target_dir: impl AsRef<Path>) -> Result<ResolvedSet> {
        let dir = fs.resolve(target_dir)?;
        let mut in_flight = Vec::new();
        let mut resources = self.build_dir(fs, &dir, &mut in_flight)?;
        if self.options.legacy_sort {
            sort::legacy_sort(&mut resources);
        }
        ResolvedSet::from_resources(resources)
    }

    fn build_dir(
        &self,
        fs: &RootedFs,
        dir: &Path,
        in_flight: &mut Vec<PathBuf>,
    ) -> Result<Vec<Resource>> {
        if in_flight.iter().any(|d| d == dir) {
            return Err(EngineError::ResourceCycle {
                path: dir.display().to_string(),
            });
        }
        in_flight.push(dir.to_path_buf());
        let result = self.build_dir_inner(fs, dir, in_flight);
        in_flight.pop();
        result
    }

    fn build_dir_inner(
        &self,
        fs: &RootedFs,
        dir: &Path,
        in_flight: &mut Vec<PathBuf>,
    ) -> Result<Vec<Resource>> {
        let descriptor = read_descriptor(fs, dir)?;
        let mut accumulated: IndexMap<ResId, Resource> = IndexMap::new();

        for entry in &descriptor.resources {
            if fetch::is_remote_ref(entry) {
                let data = fs.fetch_remote(entry)?;
                for res in resource::decode_all(&data, entry)? {
                    insert_resource(&mut accumulated, res)?;
                }
                continue;
            }

            let path = fs.resolve(dir.join(entry))?;
            if fs.is_dir(&path) {
                // A directory entry is a nested build unit with its own
                // descriptor; its resolved output joins this accumulation.
                for res in self.build_dir(fs, &path, in_flight)? {
                    insert_resource(&mut accumulated, res)?;
                }
            } else {
                let data = fs.read(&path)?;
                for res in resource::decode_all(&data, &path.display().to_string())? {
                    insert_resource(&mut accumulated, res)?;
                }
            }
        }

        let mut resources: Vec<Resource> = accumulated.into_values().collect();
        self.apply_transforms(&descriptor, &mut resources)?;
        Ok(resources)
    }

    /// Transformation order: namespace, strategic-merge patches, JSON6902
    /// patches, inline patches, images.
    fn apply_transforms(
        &self,
        descriptor: &Descriptor,
        resources: &mut Vec<Resource>,
    ) -> Result<()> {
        if let Some(namespace) = &descriptor.namespace {
            transform::set_namespace(resources, namespace);
        }

        for raw in &descriptor.patches_strategic_merge {
            let body: serde_json::Value =
                serde_yaml::from_str(raw).map_err(|e| EngineError::InvalidPatch {
                    message: format!("invalid strategic-merge patch: {e}"),
                })?;
            patch::apply_strategic_merge(resources, &body)?;
        }

        for entry in &descriptor.patches_json6902 {
            let ops = patch::parse_operations(&entry.patch)?;
            let target = entry.target.as_ref().ok_or_else(|| EngineError::InvalidPatch {
                message: "json6902 patch requires a target".to_string(),
            })?;
            patch::apply_operations_to_targets(resources, &ops, target)?;
        }

        for entry in &descriptor.patches {
            match patch::parse_inline(&entry.patch)? {
                patch::InlinePatch::StrategicMerge(body) => match &entry.target {
                    Some(target) => {
                        patch::apply_strategic_merge_to_targets(resources, &body, target)?;
                    }
                    None => patch::apply_strategic_merge(resources, &body)?,
                },
                patch::InlinePatch::Operations(ops) => {
                    let target =
                        entry.target.as_ref().ok_or_else(|| EngineError::InvalidPatch {
                            message: "an operation-list patch requires a target".to_string(),
                        })?;
                    patch::apply_operations_to_targets(resources, &ops, target)?;
                }
            }
        }

        if !descriptor.images.is_empty() {
            transform::apply_images(resources, &descriptor.images);
        }
        Ok(())
    }
}

fn read_descriptor(fs: &RootedFs, dir: &Path) -> Result<Descriptor> {
    for name in descriptor::RECOGNIZED_FILENAMES {
        let candidate = dir.join(name);
        if fs.exists(&candidate) && !fs.is_dir(&candidate) {
            let text = fs.read_to_string(&candidate)?;
            return Ok(Descriptor::from_yaml(&text)?);
        }
    }
    Err(EngineError::MissingDescriptor {
        path: dir.display().to_string(),
    })
}

fn insert_resource(map: &mut IndexMap<ResId, Resource>, resource: Resource) -> Result<()> {
    let id = resource.id();
    if map.insert(id.clone(), resource).is_some() {
        return Err(EngineError::DuplicateResource { id: id.to_string() });
    }
    Ok(())
}

/// The ordered, fully-merged output of a successful build.
///
/// Read-only to callers; iteration order is the build order (or the legacy
/// ordering when requested).
#[derive(Debug)]
pub struct ResolvedSet {
    resources: IndexMap<ResId, Resource>,
}

impl ResolvedSet {
    fn from_resources(resources: Vec<Resource>) -> Result<Self> {
        let mut map = IndexMap::with_capacity(resources.len());
        for resource in resources {
            let id = resource.id();
            if map.insert(id.clone(), resource).is_some() {
                return Err(EngineError::DuplicateResource { id: id.to_string() });
            }
        }
        Ok(Self { resources: map })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResId> {
        self.resources.keys()
    }

    pub fn get(&self, id: &ResId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Render the set as a multi-document YAML stream.
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for (index, resource) in self.iter().enumerate() {
            if index > 0 {
                out.push_str("---\n");
            }
            out.push_str(&serde_yaml::to_string(resource.value())?);
        }
        Ok(out)
    }
}
