use crate::app::ports::HierarchicalStore;
use crate::error::{ArchiveError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory tree store for local runs and tests.
///
/// Mirrors realtime-database semantics: empty objects vanish, absent paths
/// read as `None`, integer keys order numerically before string keys.
#[derive(Clone)]
pub struct MemoryTreeStore {
    root: Arc<Mutex<Value>>,
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(root: Value) -> Self {
        Self {
            root: Arc::new(Mutex::new(root)),
        }
    }

    /// Seed from a JSON export of the whole database
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::Config(format!(
                "Failed to read store seed file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let root: Value = serde_json::from_str(&content)?;
        Ok(Self::from_value(root))
    }

    /// Write `value` at `path`, creating intermediate objects
    pub async fn set(&self, path: &str, value: Value) {
        let segments = split_path(path);
        let mut root = self.root.lock().await;
        let Some((last, parents)) = segments.split_last() else {
            *root = value;
            return;
        };
        let mut node = &mut *root;
        for segment in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(map) => map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                _ => return,
            };
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            map.insert(last.to_string(), value);
        }
    }

    /// Copy of the whole tree
    pub async fn snapshot(&self) -> Value {
        self.root.lock().await.clone()
    }
}

#[async_trait]
impl HierarchicalStore for MemoryTreeStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let root = self.root.lock().await;
        Ok(lookup(&root, &split_path(path))
            .filter(|v| !v.is_null())
            .cloned())
    }

    async fn get_range(
        &self,
        path: &str,
        order_field: &str,
        start_value: &Value,
    ) -> Result<Option<Value>> {
        let root = self.root.lock().await;
        let Some(node) = lookup(&root, &split_path(path)) else {
            return Ok(None);
        };
        let Value::Object(children) = node else {
            return Ok(None);
        };

        let selected: Map<String, Value> = children
            .iter()
            .filter(|(key, child)| {
                if order_field == "$key" {
                    compare_keys(key, &value_as_key(start_value)) != Ordering::Less
                } else {
                    child
                        .get(order_field)
                        .and_then(|field| compare_values(field, start_value))
                        .map(|ord| ord != Ordering::Less)
                        .unwrap_or(false)
                }
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if selected.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Object(selected)))
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let segments = split_path(path);
        let mut root = self.root.lock().await;
        if segments.is_empty() {
            *root = Value::Object(Map::new());
            return Ok(());
        }
        if remove_and_prune(&mut root, &segments) {
            debug!("Deleted store path {}", path);
        }
        Ok(())
    }
}

/// Split a store path into non-empty segments
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Realtime-database key order: integer keys first (numerically), then strings
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn value_as_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn lookup<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(*segment))
}

/// Remove the node at `segments`; drop parents left empty. Returns whether anything was removed.
fn remove_and_prune(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Value::Object(map) = node else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(*first).is_some();
    }
    let Some(child) = map.get_mut(*first) else {
        return false;
    };
    let removed = remove_and_prune(child, rest);
    if removed && child.as_object().map(|m| m.is_empty()).unwrap_or(false) {
        map.remove(*first);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryTreeStore {
        MemoryTreeStore::from_value(json!({
            "metrics": {
                "c1": {
                    "u1": {
                        "urls": {
                            "1000": {"domain": "x.com"},
                            "3000": {"domain": "y.com"},
                            "200": {"domain": "z.com"},
                            "meta": {"version": 2}
                        }
                    }
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_get_missing_path_is_none() {
        let store = seeded();
        assert!(store.get("metrics/c2").await.unwrap().is_none());
        assert!(store.get("metrics/c1/u1/urls/1000").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_range_compares_numeric_keys_as_numbers() {
        let store = seeded();
        let range = store
            .get_range("metrics/c1/u1/urls", "$key", &json!("300"))
            .await
            .unwrap()
            .unwrap();
        let keys: Vec<&String> = range.as_object().unwrap().keys().collect();
        // "200" sorts after "1000" lexicographically but is numerically smaller
        assert!(!keys.contains(&&"200".to_string()));
        assert!(keys.contains(&&"1000".to_string()));
        assert!(keys.contains(&&"3000".to_string()));
        assert!(keys.contains(&&"meta".to_string()));
    }

    #[tokio::test]
    async fn test_get_range_by_child_field() {
        let store = MemoryTreeStore::from_value(json!({
            "events": {"a": {"at": 5}, "b": {"at": 15}, "c": {"label": "none"}}
        }));
        let range = store
            .get_range("events", "at", &json!(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(range, json!({"b": {"at": 15}}));
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_parents_and_is_idempotent() {
        let store = MemoryTreeStore::from_value(json!({
            "metrics": {"c1": {"u1": {"urls": {"1000": true}}}}
        }));
        store.delete("metrics/c1/u1/urls/1000").await.unwrap();
        assert!(store.get("metrics/c1").await.unwrap().is_none());
        store.delete("metrics/c1/u1/urls/1000").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_creates_intermediate_nodes() {
        let store = MemoryTreeStore::new();
        store
            .set("metrics/c9/u9/fileUploads/42", json!({"name": "a.pdf"}))
            .await;
        let keys = store.child_keys("metrics/c9/u9").await.unwrap();
        assert_eq!(keys, vec!["fileUploads".to_string()]);
    }

    #[test]
    fn test_compare_keys_orders_integers_first() {
        assert_eq!(compare_keys("200", "1000"), Ordering::Less);
        assert_eq!(compare_keys("1000", "meta"), Ordering::Less);
        assert_eq!(compare_keys("alpha", "beta"), Ordering::Less);
    }
}
