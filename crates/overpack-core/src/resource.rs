//! Typed resource objects decoded from manifest streams

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// Identity of a resource: group, version, kind, namespace, name.
///
/// Used for duplicate detection and as the ordering key of a resolved set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResId {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Empty for cluster-scoped or not-yet-namespaced resources.
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)?;
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)?;
        }
        if !self.namespace.is_empty() {
            write!(f, "/{}", self.namespace)?;
        }
        write!(f, "/{}", self.name)
    }
}

/// A single Kubernetes-style manifest object.
///
/// The object is held as a `serde_json::Value`; accessors derive identity
/// fields on demand so patches that rewrite metadata are always reflected.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource(JsonValue);

impl Resource {
    /// Validate a decoded document as a resource object.
    ///
    /// The document must be a mapping carrying non-empty `apiVersion` and
    /// `kind` fields; `origin` names the offending file in errors.
    pub fn from_value(value: JsonValue, origin: &str) -> Result<Self> {
        if !value.is_object() {
            return Err(decode_error(origin, "document is not a mapping"));
        }
        let resource = Self(value);
        if resource.api_version().is_empty() {
            return Err(decode_error(origin, "document has no apiVersion"));
        }
        if resource.kind().is_empty() {
            return Err(decode_error(origin, "document has no kind"));
        }
        Ok(resource)
    }

    /// Parse a resource from a single YAML document.
    pub fn from_yaml(yaml: &str, origin: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)
            .map_err(|e| decode_error(origin, &e.to_string()))?;
        Self::from_value(value, origin)
    }

    pub fn api_version(&self) -> &str {
        self.0
            .get("apiVersion")
            .and_then(JsonValue::as_str)
            .unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(JsonValue::as_str).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.0
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(JsonValue::as_str)
            .unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(JsonValue::as_str)
    }

    /// `(group, version)` split of `apiVersion`; core-group resources have
    /// an empty group.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version().split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version()),
        }
    }

    pub fn id(&self) -> ResId {
        let (group, version) = self.group_version();
        ResId {
            group: group.to_string(),
            version: version.to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().unwrap_or("").to_string(),
            name: self.name().to_string(),
        }
    }

    /// Set `metadata.namespace`, creating the metadata mapping if absent.
    pub fn set_namespace(&mut self, namespace: &str) {
        if let Some(obj) = self.0.as_object_mut() {
            let metadata = obj
                .entry("metadata")
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            if let Some(metadata) = metadata.as_object_mut() {
                metadata.insert(
                    "namespace".to_string(),
                    JsonValue::String(namespace.to_string()),
                );
            }
        }
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("labels")
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map("annotations")
    }

    fn string_map(&self, field: &str) -> BTreeMap<String, String> {
        self.0
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(JsonValue::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn value(&self) -> &JsonValue {
        &self.0
    }

    pub fn value_mut(&mut self) -> &mut JsonValue {
        &mut self.0
    }

    pub fn into_value(self) -> JsonValue {
        self.0
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

/// Decode a multi-document YAML stream into resources.
///
/// Empty documents are skipped; any document that fails to parse or is not
/// a resource object fails the whole decode, naming `origin`.
pub fn decode_all(data: &[u8], origin: &str) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(data) {
        let value = JsonValue::deserialize(document)
            .map_err(|e| decode_error(origin, &e.to_string()))?;
        if value.is_null() {
            continue;
        }
        resources.push(Resource::from_value(value, origin)?);
    }
    Ok(resources)
}

fn decode_error(origin: &str, message: &str) -> CoreError {
    CoreError::ResourceDecode {
        path: origin.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: prod
  labels:
    app: web
"#;

    #[test]
    fn test_parse_resource_fields() {
        let resource = Resource::from_yaml(DEPLOYMENT, "deploy.yaml").unwrap();

        assert_eq!(resource.api_version(), "apps/v1");
        assert_eq!(resource.kind(), "Deployment");
        assert_eq!(resource.name(), "web");
        assert_eq!(resource.namespace(), Some("prod"));
        assert_eq!(resource.group_version(), ("apps", "v1"));
        assert_eq!(resource.labels().get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_core_group_has_empty_group() {
        let resource =
            Resource::from_yaml("apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n", "s.yaml")
                .unwrap();
        assert_eq!(resource.group_version(), ("", "v1"));
        assert_eq!(resource.id().to_string(), "v1/Service/svc");
    }

    #[test]
    fn test_id_includes_namespace() {
        let resource = Resource::from_yaml(DEPLOYMENT, "deploy.yaml").unwrap();
        assert_eq!(resource.id().to_string(), "apps/v1/Deployment/prod/web");
    }

    #[test]
    fn test_set_namespace_creates_metadata() {
        let mut resource =
            Resource::from_yaml("apiVersion: v1\nkind: ConfigMap\n", "cm.yaml").unwrap();
        resource.set_namespace("staging");
        assert_eq!(resource.namespace(), Some("staging"));
    }

    #[test]
    fn test_decode_all_multi_document() {
        let stream = b"apiVersion: v1\nkind: Service\nmetadata:\n  name: a\n---\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let resources = decode_all(stream, "multi.yaml").unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].kind(), "Service");
        assert_eq!(resources[1].kind(), "ConfigMap");
    }

    #[test]
    fn test_decode_all_rejects_non_resource() {
        let result = decode_all(b"just: data\n", "values.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, CoreError::ResourceDecode { .. }));
        assert!(err.to_string().contains("values.yaml"));
    }

    #[test]
    fn test_decode_all_rejects_scalar_document() {
        let result = decode_all(b"plain text", "notes.yaml");
        assert!(matches!(result, Err(CoreError::ResourceDecode { .. })));
    }

    #[test]
    fn test_decode_all_rejects_invalid_yaml() {
        let result = decode_all(b"kind: [unclosed\n", "broken.yaml");
        assert!(matches!(result, Err(CoreError::ResourceDecode { .. })));
    }
}
