//! The on-disk overlay descriptor
//!
//! The descriptor is the manifest the merge engine consumes: which resource
//! paths to combine, how to patch them, and which image references to
//! rewrite. It is both written by the synthesizer and read by the engine,
//! so the serde model here is the single source of truth for the file
//! format.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;

/// API version written into synthesized descriptors.
pub const API_VERSION: &str = "overpack.dev/v1alpha1";

/// Kind written into synthesized descriptors.
pub const KIND: &str = "Overlay";

/// Filenames recognized as an overlay descriptor, in lookup order.
pub const RECOGNIZED_FILENAMES: [&str; 2] = ["overlay.yaml", "overlay.yml"];

/// Filename used when synthesizing a new descriptor.
pub const DEFAULT_FILENAME: &str = "overlay.yaml";

/// The overlay descriptor file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    /// Namespace forced onto every namespaced resource in the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Resource entries, relative to the descriptor's directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    /// Inline patches: strategic-merge or JSON6902, detected by shape.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    /// Raw strategic-merge patch documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches_strategic_merge: Vec<String>,

    /// JSON6902 patches; `patch` holds the serialized operation list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches_json6902: Vec<Patch>,

    /// Image overrides, deduplicated by image name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Descriptor {
    /// An empty descriptor with the fixed apiVersion/kind constants.
    pub fn new() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            namespace: None,
            resources: Vec::new(),
            patches: Vec::new(),
            patches_strategic_merge: Vec::new(),
            patches_json6902: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Decode a descriptor, defaulting apiVersion/kind when missing.
    ///
    /// An empty file decodes as an empty descriptor, matching the
    /// zero-value behavior descriptors written by hand rely on.
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Insert or replace an image override.
    ///
    /// If an entry with the same image name exists it is overwritten at its
    /// existing position; otherwise the override is appended.
    pub fn upsert_image(&mut self, image: Image) {
        if let Some(existing) = self.images.iter_mut().find(|i| i.name == image.name) {
            *existing = image;
        } else {
            self.images.push(image);
        }
    }
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// A patch entry: the patch body plus an optional target selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub patch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Selector>,
}

/// Scopes a patch to matching resources.
///
/// Empty fields match anything; a fully empty selector matches every
/// resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_selector: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub annotation_selector: String,
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = [
            ("group", &self.group),
            ("version", &self.version),
            ("kind", &self.kind),
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("labels", &self.label_selector),
            ("annotations", &self.annotation_selector),
        ];
        let mut first = true;
        for (label, value) in fields {
            if value.is_empty() {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{label}={value}")?;
            first = false;
        }
        if first {
            write!(f, "<any>")?;
        }
        Ok(())
    }
}

/// An image override: rewrite references to `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Kind of a JSON6902 operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Copy,
    Move,
    Test,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// A single JSON6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,

    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}
