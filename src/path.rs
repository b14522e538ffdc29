//! Path addressing inside JSON payloads.
//!
//! A path is an ordered list of [`PathStep`]s. Resolution walks every step
//! except the last one and lands on the *wrapping object*: the object or array
//! that directly holds the addressed value. Reads and writes then operate on
//! the final step only, so a path that cannot be walked is rejected before
//! anything is written.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// One step of an [`ObjectPath`]: a field name or an array index.
///
/// On the wire a path is a plain JSON array mixing strings and integers, so
/// the enum is untagged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    Index(usize),
    Key(String),
}

pub type ObjectPath = Vec<PathStep>;

/// Builds an [`ObjectPath`] from a mix of string and integer steps.
///
/// ```
/// use treesync::object_path;
/// use treesync::path::PathStep;
///
/// let path = object_path!["children", 0, "data"];
/// assert_eq!(path[1], PathStep::Index(0));
/// ```
#[macro_export]
macro_rules! object_path {
    ($($step:expr),* $(,)?) => {
        vec![$($crate::path::PathStep::from($step)),*]
    };
}

impl PathStep {
    /// Reads the step as an array index. Keys qualify only when they are the
    /// canonical decimal form of an unsigned integer.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathStep::Index(index) => Some(*index),
            PathStep::Key(key) => key
                .parse::<usize>()
                .ok()
                .filter(|index| index.to_string() == *key),
        }
    }

    /// Reads the step as an object key. Indices use their decimal form.
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            PathStep::Index(index) => Cow::Owned(index.to_string()),
            PathStep::Key(key) => Cow::Borrowed(key),
        }
    }

    pub fn is_key(&self, key: &str) -> bool {
        matches!(self, PathStep::Key(own) if own == key)
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Index(index) => write!(f, "{index}"),
            PathStep::Key(key) => write!(f, "{key:?}"),
        }
    }
}

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

impl From<&str> for PathStep {
    fn from(key: &str) -> Self {
        PathStep::Key(key.to_string())
    }
}

impl From<String> for PathStep {
    fn from(key: String) -> Self {
        PathStep::Key(key)
    }
}

/// Traversal failures. Both variants mean "the provided path could not be
/// traversed"; they only differ in what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("the provided path could not be traversed: the path is empty")]
    EmptyPath,
    /// `depth` is the number of steps consumed when traversal stopped.
    #[error("the provided path could not be traversed (stopped after {depth} steps)")]
    NotTraversable { depth: usize },
}

impl PathError {
    /// Shifts the reported depth, for errors raised on a sub-path.
    pub fn offset(self, steps: usize) -> Self {
        match self {
            PathError::NotTraversable { depth } => PathError::NotTraversable {
                depth: depth + steps,
            },
            other => other,
        }
    }
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn ensure_structured(value: &Value, depth: usize) -> Result<(), PathError> {
    if is_structured(value) {
        Ok(())
    } else {
        Err(PathError::NotTraversable { depth })
    }
}

fn step_into<'a>(value: &'a Value, step: &PathStep) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(step.as_key().as_ref()),
        Value::Array(items) => step.as_index().and_then(|index| items.get(index)),
        _ => None,
    }
}

fn step_into_mut<'a>(value: &'a mut Value, step: &PathStep) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(step.as_key().as_ref()),
        Value::Array(items) => step.as_index().and_then(|index| items.get_mut(index)),
        _ => None,
    }
}

/// Walks all but the last step of `path` and returns the structured value
/// holding the final step. An empty path yields `container` itself.
pub fn find_wrapping_object<'a>(
    container: &'a Value,
    path: &[PathStep],
) -> Result<&'a Value, PathError> {
    let walk = path.len().saturating_sub(1);
    let mut current = container;
    ensure_structured(current, 0)?;
    for (depth, step) in path[..walk].iter().enumerate() {
        current = step_into(current, step).ok_or(PathError::NotTraversable { depth })?;
        ensure_structured(current, depth + 1)?;
    }
    Ok(current)
}

/// Mutable counterpart of [`find_wrapping_object`].
pub fn find_wrapping_object_mut<'a>(
    container: &'a mut Value,
    path: &[PathStep],
) -> Result<&'a mut Value, PathError> {
    let walk = path.len().saturating_sub(1);
    let mut current = container;
    ensure_structured(current, 0)?;
    for (depth, step) in path[..walk].iter().enumerate() {
        current = step_into_mut(current, step).ok_or(PathError::NotTraversable { depth })?;
        ensure_structured(current, depth + 1)?;
    }
    Ok(current)
}

/// Returns the value at the end of `path`, or `None` when the wrapping object
/// exists but lacks the final key.
pub fn find_value<'a>(container: &'a Value, path: &[PathStep]) -> Result<Option<&'a Value>, PathError> {
    let last = path.last().ok_or(PathError::EmptyPath)?;
    let wrapping = find_wrapping_object(container, path)?;
    Ok(step_into(wrapping, last))
}

/// Writes `value` at the end of `path`.
///
/// Object keys are inserted or overwritten. Array indices overwrite an
/// existing element; an index at or past the length pads the array with
/// `null` up to it and then writes. Non-index steps into an array are
/// rejected.
pub fn apply_value(container: &mut Value, path: &[PathStep], value: Value) -> Result<(), PathError> {
    let last = path.last().ok_or(PathError::EmptyPath)?;
    let depth = path.len() - 1;
    match find_wrapping_object_mut(container, path)? {
        Value::Object(map) => {
            map.insert(last.as_key().into_owned(), value);
        }
        Value::Array(items) => match last.as_index() {
            Some(index) => {
                if index >= items.len() {
                    let len = index.checked_add(1).ok_or(PathError::NotTraversable { depth })?;
                    items.resize(len, Value::Null);
                }
                items[index] = value;
            }
            None => return Err(PathError::NotTraversable { depth }),
        },
        _ => return Err(PathError::NotTraversable { depth }),
    }
    Ok(())
}

/// Removes the value at the end of `path` and returns it.
///
/// Array elements are spliced out, shifting later indices down; object keys
/// are dropped. A final step that addresses nothing is a no-op.
pub fn remove_value(container: &mut Value, path: &[PathStep]) -> Result<Option<Value>, PathError> {
    let last = path.last().ok_or(PathError::EmptyPath)?;
    let removed = match find_wrapping_object_mut(container, path)? {
        Value::Object(map) => map.remove(last.as_key().as_ref()),
        Value::Array(items) => match last.as_index() {
            Some(index) if index < items.len() => Some(items.remove(index)),
            _ => None,
        },
        _ => None,
    };
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Value {
        json!({ "test": ["test_index_1", "test_index_2"] })
    }

    #[test]
    fn test_apply_value_updates_array_element() {
        let mut doc = fixture();
        apply_value(&mut doc, &object_path!["test", 1], json!("Test")).unwrap();
        assert_eq!(doc["test"][1], json!("Test"));
    }

    #[test]
    fn test_apply_value_rejects_missing_intermediate() {
        let mut doc = fixture();
        let err = apply_value(&mut doc, &object_path!["foobar", 1], json!("Test")).unwrap_err();
        assert_eq!(err, PathError::NotTraversable { depth: 0 });
        assert_eq!(doc, fixture());
    }

    #[test]
    fn test_apply_value_rejects_primitive_intermediate() {
        let mut doc = json!({ "test": "now with primitive" });
        let err = apply_value(&mut doc, &object_path!["test", 1], json!("Test")).unwrap_err();
        assert_eq!(err, PathError::NotTraversable { depth: 1 });
    }

    #[test]
    fn test_empty_path_is_rejected_for_reads_and_writes() {
        let mut doc = fixture();
        assert_eq!(
            apply_value(&mut doc, &[], json!("Test")),
            Err(PathError::EmptyPath)
        );
        assert_eq!(find_value(&doc, &[]), Err(PathError::EmptyPath));
    }

    #[test]
    fn test_find_wrapping_object_on_empty_path_returns_container() {
        let doc = fixture();
        let found = find_wrapping_object(&doc, &[]).unwrap();
        assert!(std::ptr::eq(found, &doc));
    }

    #[test]
    fn test_numeric_key_steps() {
        let doc = json!({ "list": [10, 20], "map": { "3": "three" } });
        assert_eq!(
            find_value(&doc, &object_path!["list", "1"]).unwrap(),
            Some(&json!(20))
        );
        assert_eq!(
            find_value(&doc, &object_path!["map", 3]).unwrap(),
            Some(&json!("three"))
        );
        assert_eq!(find_value(&doc, &object_path!["list", "01"]).unwrap(), None);
    }

    #[test]
    fn test_apply_value_past_the_end_pads_with_null() {
        let mut doc = json!({ "list": [1] });
        apply_value(&mut doc, &object_path!["list", 1], json!(2)).unwrap();
        assert_eq!(doc, json!({ "list": [1, 2] }));

        let mut doc = json!({ "list": [1] });
        apply_value(&mut doc, &object_path!["list", 3], json!(9)).unwrap();
        assert_eq!(doc, json!({ "list": [1, null, null, 9] }));
    }

    #[test]
    fn test_apply_value_rejects_named_step_into_array() {
        let mut doc = json!({ "list": [1] });
        let err = apply_value(&mut doc, &object_path!["list", "name"], json!(2)).unwrap_err();
        assert_eq!(err, PathError::NotTraversable { depth: 1 });
        assert_eq!(doc, json!({ "list": [1] }));
    }

    #[test]
    fn test_remove_value_splices_arrays_and_drops_keys() {
        let mut doc = json!({ "list": ["a", "b", "c"], "flag": true });
        let removed = remove_value(&mut doc, &object_path!["list", 0]).unwrap();
        assert_eq!(removed, Some(json!("a")));
        assert_eq!(doc["list"], json!(["b", "c"]));

        remove_value(&mut doc, &object_path!["flag"]).unwrap();
        assert!(doc.get("flag").is_none());

        assert_eq!(remove_value(&mut doc, &object_path!["list", 9]).unwrap(), None);
    }

    #[test]
    fn test_path_steps_use_mixed_wire_form() {
        let path: ObjectPath = serde_json::from_str(r#"["children", 0, "data"]"#).unwrap();
        assert_eq!(path, object_path!["children", 0, "data"]);
        assert_eq!(serde_json::to_string(&path).unwrap(), r#"["children",0,"data"]"#);
    }
}
