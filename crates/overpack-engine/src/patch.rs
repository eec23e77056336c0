//! Patch application: selector matching, strategic merge, JSON6902 operations

use overpack_core::descriptor::{OpKind, PatchOp, Selector};
use overpack_core::resource::Resource;
use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result};

/// An inline patch, classified by shape.
#[derive(Debug)]
pub enum InlinePatch {
    /// A mapping: merged into its target.
    StrategicMerge(JsonValue),
    /// A sequence: an ordered operation list.
    Operations(Vec<PatchOp>),
}

/// Classify an inline patch body.
///
/// A mapping is a strategic-merge patch; a sequence is a JSON6902 operation
/// list. YAML is a superset of JSON, so both notations are accepted.
pub fn parse_inline(patch: &str) -> Result<InlinePatch> {
    let value: JsonValue = serde_yaml::from_str(patch).map_err(|e| EngineError::InvalidPatch {
        message: format!("patch is not valid YAML: {e}"),
    })?;
    match value {
        JsonValue::Array(_) => {
            let ops: Vec<PatchOp> =
                serde_json::from_value(value).map_err(|e| EngineError::InvalidPatch {
                    message: format!("invalid operation list: {e}"),
                })?;
            Ok(InlinePatch::Operations(ops))
        }
        JsonValue::Object(_) => Ok(InlinePatch::StrategicMerge(value)),
        _ => Err(EngineError::InvalidPatch {
            message: "patch must be a mapping or an operation list".to_string(),
        }),
    }
}

/// Parse a serialized JSON6902 operation list (JSON or YAML notation).
pub fn parse_operations(text: &str) -> Result<Vec<PatchOp>> {
    serde_yaml::from_str(text).map_err(|e| EngineError::InvalidPatch {
        message: format!("invalid operation list: {e}"),
    })
}

/// Whether `resource` is selected by `selector`. Empty fields match anything.
pub fn selector_matches(resource: &Resource, selector: &Selector) -> bool {
    let (group, version) = resource.group_version();
    if !selector.group.is_empty() && selector.group != group {
        return false;
    }
    if !selector.version.is_empty() && selector.version != version {
        return false;
    }
    if !selector.kind.is_empty() && selector.kind != resource.kind() {
        return false;
    }
    if !selector.name.is_empty() && selector.name != resource.name() {
        return false;
    }
    if !selector.namespace.is_empty()
        && resource.namespace() != Some(selector.namespace.as_str())
    {
        return false;
    }
    matches_expr(&selector.label_selector, &resource.labels())
        && matches_expr(&selector.annotation_selector, &resource.annotations())
}

/// Evaluate an equality-term expression (`k=v`, `k!=v`, bare key for
/// existence; terms joined by commas must all hold).
fn matches_expr(expr: &str, entries: &std::collections::BTreeMap<String, String>) -> bool {
    if expr.is_empty() {
        return true;
    }
    expr.split(',').all(|term| {
        let term = term.trim();
        // `!=` must be tried before `=`
        if let Some((key, value)) = term.split_once("!=") {
            entries.get(key.trim()).map(String::as_str) != Some(value.trim())
        } else if let Some((key, value)) = term.split_once('=') {
            entries.get(key.trim()).map(String::as_str) == Some(value.trim())
        } else {
            entries.contains_key(term)
        }
    })
}

/// Apply a self-identifying strategic-merge patch.
///
/// The patch targets the resources matching its own kind and
/// `metadata.name` (and apiVersion/namespace when it declares them).
pub fn apply_strategic_merge(resources: &mut [Resource], patch: &JsonValue) -> Result<()> {
    let kind = patch.get("kind").and_then(JsonValue::as_str).unwrap_or("");
    let metadata = patch.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(JsonValue::as_str)
        .unwrap_or("");
    if kind.is_empty() || name.is_empty() {
        return Err(EngineError::InvalidPatch {
            message: "strategic-merge patch must declare kind and metadata.name".to_string(),
        });
    }
    let api_version = patch.get("apiVersion").and_then(JsonValue::as_str);
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(JsonValue::as_str);

    let mut matched = false;
    for resource in resources.iter_mut() {
        if resource.kind() != kind || resource.name() != name {
            continue;
        }
        if let Some(api) = api_version {
            if resource.api_version() != api {
                continue;
            }
        }
        if let Some(ns) = namespace {
            if resource.namespace() != Some(ns) {
                continue;
            }
        }
        matched = true;
        merge_value(resource.value_mut(), patch);
    }
    if matched {
        Ok(())
    } else {
        Err(EngineError::PatchTargetNotFound {
            target: format!("{kind}/{name}"),
        })
    }
}

/// Merge a strategic-merge patch into every resource selected by `selector`.
pub fn apply_strategic_merge_to_targets(
    resources: &mut [Resource],
    patch: &JsonValue,
    selector: &Selector,
) -> Result<()> {
    let mut matched = false;
    for resource in resources.iter_mut() {
        if !selector_matches(resource, selector) {
            continue;
        }
        matched = true;
        merge_value(resource.value_mut(), patch);
    }
    if matched {
        Ok(())
    } else {
        Err(EngineError::PatchTargetNotFound {
            target: selector.to_string(),
        })
    }
}

/// Apply an operation list to every resource selected by `selector`.
pub fn apply_operations_to_targets(
    resources: &mut [Resource],
    ops: &[PatchOp],
    selector: &Selector,
) -> Result<()> {
    let mut matched = false;
    for resource in resources.iter_mut() {
        if !selector_matches(resource, selector) {
            continue;
        }
        matched = true;
        apply_operations(resource.value_mut(), ops)?;
    }
    if matched {
        Ok(())
    } else {
        Err(EngineError::PatchTargetNotFound {
            target: selector.to_string(),
        })
    }
}

/// Deep merge in strategic-merge style.
///
/// Rules:
/// - Mappings: recursive merge; a null overlay value deletes the key
/// - Lists whose items all carry a string `name`: merged per item by name
/// - Everything else: overlay replaces base
fn merge_value(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(base_value) => merge_value(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (JsonValue::Array(base_items), JsonValue::Array(overlay_items)) => {
            if named_list(base_items) && named_list(overlay_items) {
                for item in overlay_items {
                    let name = item.get("name");
                    match base_items
                        .iter_mut()
                        .find(|existing| existing.get("name") == name)
                    {
                        Some(existing) => merge_value(existing, item),
                        None => base_items.push(item.clone()),
                    }
                }
            } else {
                *base_items = overlay_items.clone();
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn named_list(items: &[JsonValue]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| item.get("name").and_then(JsonValue::as_str).is_some())
}

/// Apply JSON6902 operations in order to a document.
pub fn apply_operations(doc: &mut JsonValue, ops: &[PatchOp]) -> Result<()> {
    for op in ops {
        apply_operation(doc, op)?;
    }
    Ok(())
}

fn apply_operation(doc: &mut JsonValue, op: &PatchOp) -> Result<()> {
    match op.op {
        OpKind::Add => {
            let value = required_value(op)?.clone();
            insert_at(doc, &op.path, value)
        }
        OpKind::Replace => {
            let value = required_value(op)?.clone();
            let slot = doc
                .pointer_mut(&op.path)
                .ok_or_else(|| missing_path(&op.path))?;
            *slot = value;
            Ok(())
        }
        OpKind::Remove => remove_at(doc, &op.path).map(|_| ()),
        OpKind::Test => {
            let expected = required_value(op)?;
            if doc.pointer(&op.path) == Some(expected) {
                Ok(())
            } else {
                Err(EngineError::InvalidPatch {
                    message: format!("test failed at '{}'", op.path),
                })
            }
        }
        OpKind::Copy => {
            let from = required_from(op)?;
            let value = doc.pointer(from).ok_or_else(|| missing_path(from))?.clone();
            insert_at(doc, &op.path, value)
        }
        OpKind::Move => {
            let from = required_from(op)?;
            let value = remove_at(doc, from)?;
            insert_at(doc, &op.path, value)
        }
    }
}

fn required_value(op: &PatchOp) -> Result<&JsonValue> {
    op.value.as_ref().ok_or_else(|| EngineError::InvalidPatch {
        message: format!("'{}' operation requires a value", op.op),
    })
}

fn required_from(op: &PatchOp) -> Result<&str> {
    op.from.as_deref().ok_or_else(|| EngineError::InvalidPatch {
        message: format!("'{}' operation requires a 'from' path", op.op),
    })
}

fn missing_path(path: &str) -> EngineError {
    EngineError::InvalidPatch {
        message: format!("no value at path '{path}'"),
    }
}

/// Insert `value` at a JSON-pointer path, per RFC 6902 `add` semantics.
fn insert_at(doc: &mut JsonValue, path: &str, value: JsonValue) -> Result<()> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent_path, token) = split_pointer(path)?;
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| missing_path(path))?;
    match parent {
        JsonValue::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        JsonValue::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(&token, items.len() + 1)?;
            items.insert(index, value);
            Ok(())
        }
        _ => Err(EngineError::InvalidPatch {
            message: format!("cannot add into scalar at '{parent_path}'"),
        }),
    }
}

/// Remove and return the value at a JSON-pointer path.
fn remove_at(doc: &mut JsonValue, path: &str) -> Result<JsonValue> {
    let (parent_path, token) = split_pointer(path)?;
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| missing_path(path))?;
    match parent {
        JsonValue::Object(map) => map.remove(&token).ok_or_else(|| missing_path(path)),
        JsonValue::Array(items) => {
            let index = parse_index(&token, items.len())?;
            Ok(items.remove(index))
        }
        _ => Err(EngineError::InvalidPatch {
            message: format!("cannot remove from scalar at '{parent_path}'"),
        }),
    }
}

/// Split a pointer into its parent pointer and final (unescaped) token.
fn split_pointer(path: &str) -> Result<(&str, String)> {
    if !path.starts_with('/') {
        return Err(EngineError::InvalidPatch {
            message: format!("pointer '{path}' must start with '/'"),
        });
    }
    match path.rfind('/') {
        Some(idx) => Ok((&path[..idx], unescape(&path[idx + 1..]))),
        None => Err(EngineError::InvalidPatch {
            message: format!("pointer '{path}' has no token"),
        }),
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn parse_index(token: &str, limit: usize) -> Result<usize> {
    let index: usize = token.parse().map_err(|_| EngineError::InvalidPatch {
        message: format!("'{token}' is not an array index"),
    })?;
    if index >= limit {
        return Err(EngineError::InvalidPatch {
            message: format!("array index {index} out of bounds"),
        });
    }
    Ok(index)
}
