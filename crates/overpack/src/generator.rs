//! Descriptor synthesis: resource scanning and override application
//!
//! The generator makes sure the target directory carries an overlay
//! descriptor that reflects both the resources on disk and the caller's
//! override spec. When no descriptor exists one is synthesized from a scan;
//! an existing descriptor is left as-is by that step. The override spec is
//! then applied on top and the file is written back whole.

use std::path::{Path, PathBuf};

use overpack_core::descriptor::{
    DEFAULT_FILENAME, Descriptor, Image, Patch, RECOGNIZED_FILENAMES, Selector,
};
use overpack_core::error::CoreError;
use overpack_core::fs::RootedFs;
use overpack_core::resource;
use walkdir::WalkDir;

use crate::error::{BuildError, Result};
use crate::overrides::{self, OverrideSpec};

/// Synthesizes the overlay descriptor for one build call.
pub struct DescriptorGenerator {
    root: PathBuf,
    spec: OverrideSpec,
}

impl DescriptorGenerator {
    pub fn new(root: impl Into<PathBuf>, spec: OverrideSpec) -> Self {
        Self {
            root: root.into(),
            spec,
        }
    }

    /// Ensure `target_dir` carries a descriptor reflecting the override
    /// spec, and return the synthesized value.
    ///
    /// The write replaces the file contents entirely. There is no rollback:
    /// a failed write may leave partial state behind, and the call reports
    /// the failure.
    pub fn write_file(&self, target_dir: impl AsRef<Path>) -> Result<Descriptor> {
        let fs = RootedFs::strict(&self.root)?;
        let dir = fs.resolve(target_dir)?;

        self.ensure_descriptor(&fs, &dir)?;

        // Freshly generated or pre-existing, a recognized filename is
        // present now.
        let path = find_descriptor(&fs, &dir).ok_or_else(|| {
            CoreError::Io(std::io::Error::other(format!(
                "descriptor vanished from '{}'",
                dir.display()
            )))
        })?;

        let text = fs.read_to_string(&path)?;
        let mut desc = Descriptor::from_yaml(&text)?;
        self.apply_overrides(&mut desc)?;
        fs.write(&path, desc.to_yaml()?.as_bytes())?;
        Ok(desc)
    }

    /// Synthesize a descriptor from a scan, unless the directory already
    /// carries one (checked directly in the directory, not recursively).
    fn ensure_descriptor(&self, fs: &RootedFs, dir: &Path) -> Result<()> {
        if find_descriptor(fs, dir).is_some() {
            return Ok(());
        }

        let files = scan_resources(fs, dir)?;
        let mut resources = Vec::with_capacity(files.len());
        for file in &files {
            let rel = file.strip_prefix(dir).map_err(|_| CoreError::PathEscape {
                path: file.display().to_string(),
            })?;
            resources.push(format!("./{}", rel.display()));
        }

        let mut desc = Descriptor::new();
        desc.resources = resources;
        fs.write(dir.join(DEFAULT_FILENAME), desc.to_yaml()?.as_bytes())?;
        tracing::debug!(
            dir = %dir.display(),
            resources = desc.resources.len(),
            "generated overlay descriptor"
        );
        Ok(())
    }

    /// Layer the override spec onto a decoded descriptor.
    fn apply_overrides(&self, desc: &mut Descriptor) -> Result<()> {
        if let Some(namespace) = &self.spec.target_namespace {
            desc.namespace = Some(namespace.clone());
        }

        for entry in &self.spec.patches {
            desc.patches.push(Patch {
                patch: entry.patch.clone(),
                target: entry.target.as_ref().map(adapt_selector),
            });
        }

        for raw in &self.spec.patches_strategic_merge {
            desc.patches_strategic_merge.push(raw.clone());
        }

        for entry in &self.spec.patches_json6902 {
            let ops = serde_json::to_string(&entry.patch).map_err(BuildError::PatchEncode)?;
            desc.patches_json6902.push(Patch {
                patch: ops,
                target: Some(adapt_selector(&entry.target)),
            });
        }

        for image in &self.spec.images {
            desc.upsert_image(Image {
                name: image.name.clone(),
                new_name: image.new_name.clone(),
                new_tag: image.new_tag.clone(),
                digest: image.digest.clone(),
            });
        }
        Ok(())
    }
}

/// The path of the recognized descriptor directly in `dir`, if any.
fn find_descriptor(fs: &RootedFs, dir: &Path) -> Option<PathBuf> {
    for name in RECOGNIZED_FILENAMES {
        let candidate = dir.join(name);
        if fs.exists(&candidate) && !fs.is_dir(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Walk `base` and collect the resource entries for a synthesized
/// descriptor.
///
/// Directories directly containing a recognized descriptor are recorded
/// once and not descended into; files are recorded when they carry a
/// structured-data extension and decode as a resource stream. A malformed
/// file fails the whole scan.
fn scan_resources(fs: &RootedFs, base: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut walker = WalkDir::new(base)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| CoreError::Io(e.into()))?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            // A nested build unit is opaque: record the directory itself
            // and do not descend.
            if find_descriptor(fs, path).is_some() {
                paths.push(path.to_path_buf());
                walker.skip_current_dir();
            }
            continue;
        }

        let extension = path.extension().and_then(|e| e.to_str());
        if !matches!(extension, Some("yaml") | Some("yml")) {
            continue;
        }

        let data = fs.read(path)?;
        resource::decode_all(&data, &path.display().to_string())?;
        paths.push(path.to_path_buf());
    }
    Ok(paths)
}

fn adapt_selector(selector: &overrides::Selector) -> Selector {
    Selector {
        group: selector.group.clone(),
        version: selector.version.clone(),
        kind: selector.kind.clone(),
        name: selector.name.clone(),
        namespace: selector.namespace.clone(),
        label_selector: selector.label_selector.clone(),
        annotation_selector: selector.annotation_selector.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::{ImageOverride, OperationsPatch};
    use overpack_core::descriptor::{OpKind, PatchOp};
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            stdfs::create_dir_all(parent).unwrap();
        }
        stdfs::write(path, content).unwrap();
    }

    fn manifest(kind: &str, name: &str) -> String {
        format!("apiVersion: v1\nkind: {kind}\nmetadata:\n  name: {name}\n")
    }

    fn generator(root: &Path) -> DescriptorGenerator {
        DescriptorGenerator::new(root, OverrideSpec::default())
    }

    #[test]
    fn test_generates_descriptor_with_relative_resources() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));
        write(temp.path(), "sub/b.yaml", &manifest("Service", "b"));

        let desc = generator(temp.path()).write_file(temp.path()).unwrap();
        assert_eq!(
            desc.resources,
            vec!["./a.yaml".to_string(), "./sub/b.yaml".to_string()]
        );
        assert!(temp.path().join(DEFAULT_FILENAME).exists());
    }

    #[test]
    fn test_skips_non_structured_extensions() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));
        write(temp.path(), "README.md", "# docs");
        write(temp.path(), "script.sh", "echo hi");

        let desc = generator(temp.path()).write_file(temp.path()).unwrap();
        assert_eq!(desc.resources, vec!["./a.yaml".to_string()]);
    }

    #[test]
    fn test_nested_descriptor_recorded_once_without_descending() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app.yaml", &manifest("Service", "app"));
        write(temp.path(), "base/overlay.yaml", "resources:\n  - ./cm.yaml\n");
        write(temp.path(), "base/cm.yaml", &manifest("ConfigMap", "cm"));

        let desc = generator(temp.path()).write_file(temp.path()).unwrap();
        assert_eq!(
            desc.resources,
            vec!["./app.yaml".to_string(), "./base".to_string()]
        );
    }

    #[test]
    fn test_malformed_file_fails_scan_without_writing() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "good.yaml", &manifest("ConfigMap", "ok"));
        write(temp.path(), "bad.yaml", "not: a\nresource: doc\n");

        let result = generator(temp.path()).write_file(temp.path());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
        assert!(!temp.path().join(DEFAULT_FILENAME).exists());
    }

    #[test]
    fn test_existing_descriptor_is_not_regenerated() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "overlay.yaml", "resources:\n  - ./only.yaml\n");
        write(temp.path(), "only.yaml", &manifest("ConfigMap", "kept"));
        write(temp.path(), "ignored.yaml", &manifest("Service", "ignored"));

        let desc = generator(temp.path()).write_file(temp.path()).unwrap();
        // the scan did not run; the hand-written resource list survives
        assert_eq!(desc.resources, vec!["./only.yaml".to_string()]);
    }

    #[test]
    fn test_existing_variant_filename_is_updated_in_place() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "overlay.yml", "resources:\n  - ./a.yaml\n");
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));

        let spec = OverrideSpec {
            target_namespace: Some("prod".to_string()),
            ..OverrideSpec::default()
        };
        let desc = DescriptorGenerator::new(temp.path(), spec)
            .write_file(temp.path())
            .unwrap();

        assert_eq!(desc.namespace.as_deref(), Some("prod"));
        assert!(!temp.path().join("overlay.yaml").exists());
        let text = stdfs::read_to_string(temp.path().join("overlay.yml")).unwrap();
        assert!(text.contains("namespace: prod"));
    }

    #[test]
    fn test_namespace_override_is_unconditional() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "overlay.yaml",
            "namespace: old\nresources:\n  - ./a.yaml\n",
        );
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));

        let spec = OverrideSpec {
            target_namespace: Some("new".to_string()),
            ..OverrideSpec::default()
        };
        let desc = DescriptorGenerator::new(temp.path(), spec)
            .write_file(temp.path())
            .unwrap();
        assert_eq!(desc.namespace.as_deref(), Some("new"));
    }

    #[test]
    fn test_operation_patches_serialized_with_selector() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));

        let spec = OverrideSpec {
            patches_json6902: vec![OperationsPatch {
                patch: vec![PatchOp {
                    op: OpKind::Replace,
                    path: "/data/key".to_string(),
                    from: None,
                    value: Some(serde_json::json!("v2")),
                }],
                target: overrides::Selector {
                    kind: "ConfigMap".to_string(),
                    name: "a".to_string(),
                    ..overrides::Selector::default()
                },
            }],
            ..OverrideSpec::default()
        };

        let desc = DescriptorGenerator::new(temp.path(), spec)
            .write_file(temp.path())
            .unwrap();

        assert_eq!(desc.patches_json6902.len(), 1);
        assert_eq!(
            desc.patches_json6902[0].patch,
            r#"[{"op":"replace","path":"/data/key","value":"v2"}]"#
        );
        let target = desc.patches_json6902[0].target.as_ref().unwrap();
        assert_eq!(target.kind, "ConfigMap");
        assert_eq!(target.name, "a");
    }

    #[test]
    fn test_image_override_replaces_existing_entry_in_place() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "overlay.yaml",
            "resources:\n  - ./a.yaml\nimages:\n  - name: nginx\n    newTag: \"1.0\"\n  - name: redis\n    newTag: \"7\"\n",
        );
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));

        let spec = OverrideSpec {
            images: vec![ImageOverride {
                name: "nginx".to_string(),
                new_name: None,
                new_tag: Some("2.0".to_string()),
                digest: None,
            }],
            ..OverrideSpec::default()
        };
        let desc = DescriptorGenerator::new(temp.path(), spec)
            .write_file(temp.path())
            .unwrap();

        assert_eq!(desc.images.len(), 2);
        assert_eq!(desc.images[0].name, "nginx");
        assert_eq!(desc.images[0].new_tag.as_deref(), Some("2.0"));
        assert_eq!(desc.images[1].name, "redis");
    }

    #[test]
    fn test_patches_appended_to_existing_lists() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "overlay.yaml",
            "resources:\n  - ./a.yaml\npatchesStrategicMerge:\n  - |\n    kind: ConfigMap\n    metadata:\n      name: a\n",
        );
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));

        let spec = OverrideSpec {
            patches_strategic_merge: vec!["kind: ConfigMap\nmetadata:\n  name: a\n  labels:\n    x: y\n".to_string()],
            ..OverrideSpec::default()
        };
        let desc = DescriptorGenerator::new(temp.path(), spec)
            .write_file(temp.path())
            .unwrap();
        assert_eq!(desc.patches_strategic_merge.len(), 2);
    }

    #[test]
    fn test_write_file_is_idempotent_for_generation() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.yaml", &manifest("ConfigMap", "a"));

        let first = generator(temp.path()).write_file(temp.path()).unwrap();
        let second = generator(temp.path()).write_file(temp.path()).unwrap();
        // the second run sees the generated descriptor and does not rescan
        // (the descriptor itself is not listed as a resource)
        assert_eq!(first.resources, second.resources);
    }

    #[test]
    fn test_target_dir_outside_root_is_rejected() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();

        let result = generator(temp.path()).write_file(outside.path());
        assert!(matches!(
            result,
            Err(BuildError::Core(CoreError::PathEscape { .. }))
        ));
    }
}
