//! Namespace and image transformations

use overpack_core::descriptor::Image;
use overpack_core::resource::Resource;
use serde_json::Value as JsonValue;

/// Kinds that never receive a namespace override.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PriorityClass",
    "IngressClass",
    "RuntimeClass",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// Force `namespace` onto every namespaced resource.
pub fn set_namespace(resources: &mut [Resource], namespace: &str) {
    for resource in resources.iter_mut() {
        if CLUSTER_SCOPED_KINDS.contains(&resource.kind()) {
            continue;
        }
        resource.set_namespace(namespace);
    }
}

/// Rewrite image references matching any of the overrides.
pub fn apply_images(resources: &mut [Resource], images: &[Image]) {
    for resource in resources.iter_mut() {
        rewrite_images(resource.value_mut(), images);
    }
}

/// Walk the document and rewrite every string `image` field whose name
/// component matches an override.
fn rewrite_images(value: &mut JsonValue, images: &[Image]) {
    match value {
        JsonValue::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if key.as_str() == "image" {
                    if let JsonValue::String(current) = entry {
                        if let Some(rewritten) = rewrite_ref(current, images) {
                            *entry = JsonValue::String(rewritten);
                            continue;
                        }
                    }
                }
                rewrite_images(entry, images);
            }
        }
        JsonValue::Array(items) => {
            for item in items.iter_mut() {
                rewrite_images(item, images);
            }
        }
        _ => {}
    }
}

fn rewrite_ref(current: &str, images: &[Image]) -> Option<String> {
    let (name, tag, digest) = split_image_ref(current);
    let image = images.iter().find(|i| i.name == name)?;

    let new_name = image.new_name.as_deref().unwrap_or(name);
    let new_tag = image.new_tag.as_deref().or(tag);
    let new_digest = image.digest.as_deref().or(digest);

    let mut out = new_name.to_string();
    if let Some(tag) = new_tag {
        out.push(':');
        out.push_str(tag);
    }
    if let Some(digest) = new_digest {
        out.push('@');
        out.push_str(digest);
    }
    Some(out)
}

/// Split `name[:tag][@digest]`; a `:` inside a registry host:port prefix is
/// not a tag separator.
fn split_image_ref(reference: &str) -> (&str, Option<&str>, Option<&str>) {
    let (base, digest) = match reference.split_once('@') {
        Some((base, digest)) => (base, Some(digest)),
        None => (reference, None),
    };
    let tag_start = base.rfind('/').map_or(0, |i| i + 1);
    match base[tag_start..].rfind(':') {
        Some(i) => {
            let split = tag_start + i;
            (&base[..split], Some(&base[split + 1..]), digest)
        }
        None => (base, None, digest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, new_name: Option<&str>, new_tag: Option<&str>, digest: Option<&str>) -> Image {
        Image {
            name: name.to_string(),
            new_name: new_name.map(String::from),
            new_tag: new_tag.map(String::from),
            digest: digest.map(String::from),
        }
    }

    #[test]
    fn test_split_image_ref() {
        assert_eq!(split_image_ref("nginx"), ("nginx", None, None));
        assert_eq!(split_image_ref("nginx:1.25"), ("nginx", Some("1.25"), None));
        assert_eq!(
            split_image_ref("registry.local:5000/team/app:v1"),
            ("registry.local:5000/team/app", Some("v1"), None)
        );
        assert_eq!(
            split_image_ref("nginx@sha256:abc"),
            ("nginx", None, Some("sha256:abc"))
        );
    }

    #[test]
    fn test_rewrite_tag() {
        let images = [image("nginx", None, Some("1.25"), None)];
        assert_eq!(rewrite_ref("nginx:1.0", &images).as_deref(), Some("nginx:1.25"));
    }

    #[test]
    fn test_rewrite_name_and_digest() {
        let images = [image("nginx", Some("mirror.local/nginx"), None, Some("sha256:def"))];
        assert_eq!(
            rewrite_ref("nginx:1.0", &images).as_deref(),
            Some("mirror.local/nginx:1.0@sha256:def")
        );
    }

    #[test]
    fn test_rewrite_ignores_other_names() {
        let images = [image("nginx", None, Some("2"), None)];
        assert_eq!(rewrite_ref("redis:7", &images), None);
    }

    #[test]
    fn test_set_namespace_skips_cluster_scoped() {
        let mut resources = vec![
            Resource::from_yaml(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
                "cm.yaml",
            )
            .unwrap(),
            Resource::from_yaml(
                "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: prod\n",
                "ns.yaml",
            )
            .unwrap(),
        ];

        set_namespace(&mut resources, "prod");
        assert_eq!(resources[0].namespace(), Some("prod"));
        assert_eq!(resources[1].namespace(), None);
    }

    #[test]
    fn test_apply_images_reaches_nested_containers() {
        let mut resources = vec![Resource::from_yaml(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      initContainers:
        - name: setup
          image: busybox:1.36
      containers:
        - name: app
          image: nginx:1.0
"#,
            "deploy.yaml",
        )
        .unwrap()];

        let images = [
            image("nginx", None, Some("1.25"), None),
            image("busybox", Some("mirror.local/busybox"), None, None),
        ];
        apply_images(&mut resources, &images);

        let value = resources[0].value();
        assert_eq!(
            value.pointer("/spec/template/spec/containers/0/image"),
            Some(&serde_json::json!("nginx:1.25"))
        );
        assert_eq!(
            value.pointer("/spec/template/spec/initContainers/0/image"),
            Some(&serde_json::json!("mirror.local/busybox:1.36"))
        );
    }
}
