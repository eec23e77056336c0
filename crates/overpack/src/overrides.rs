//! Caller-supplied override spec
//!
//! The override spec is owned by the caller (typically decoded from a
//! declarative API object) and layered onto whatever descriptor exists in
//! the target directory. It is immutable for the duration of one build
//! call. The types here deliberately mirror but do not reuse the descriptor
//! types: the two are separate API surfaces, adapted during synthesis.

use overpack_core::descriptor::PatchOp;
use serde::{Deserialize, Serialize};

/// Declarative overrides layered onto a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSpec {
    /// Namespace forced onto the build's namespaced resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Inline patches (strategic-merge or JSON6902, detected by shape).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<InlinePatch>,

    /// Raw strategic-merge patch documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches_strategic_merge: Vec<String>,

    /// Structured patches with explicit operation lists.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "patchesJSON6902"
    )]
    pub patches_json6902: Vec<OperationsPatch>,

    /// Image overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageOverride>,
}

/// An inline patch body with an optional target selector.
///
/// A missing selector means the patch applies to the single target it
/// declares itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinePatch {
    pub patch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Selector>,
}

/// A structured patch: ordered operations plus the selector scoping them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsPatch {
    pub patch: Vec<PatchOp>,

    #[serde(default)]
    pub target: Selector,
}

/// Scopes a patch to matching resources.
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

/// An image override: rewrite references to `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOverride {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use overpack_core::descriptor::OpKind;

    #[test]
    fn test_decode_from_yaml() {
        let spec: OverrideSpec = serde_yaml::from_str(
            r#"
targetNamespace: prod
patchesJSON6902:
  - target:
      kind: Deployment
      name: web
    patch:
      - op: replace
        path: /spec/replicas
        value: 3
images:
  - name: nginx
    newTag: "1.25"
"#,
        )
        .unwrap();

        assert_eq!(spec.target_namespace.as_deref(), Some("prod"));
        assert_eq!(spec.patches_json6902.len(), 1);
        assert_eq!(spec.patches_json6902[0].patch[0].op, OpKind::Replace);
        assert_eq!(spec.patches_json6902[0].target.kind, "Deployment");
        assert_eq!(spec.images[0].new_tag.as_deref(), Some("1.25"));
    }

    #[test]
    fn test_empty_spec_decodes() {
        let spec: OverrideSpec = serde_yaml::from_str("{}").unwrap();
        assert!(spec.target_namespace.is_none());
        assert!(spec.patches.is_empty());
        assert!(spec.images.is_empty());
    }
}
