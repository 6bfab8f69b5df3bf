//! Memory engine: couples the vector index and the hypergraph store behind
//! a single atomic `store`/`retrieve`/`search` surface.
//!
//! Every stored value becomes a graph [`Node`]; an optional embedding also
//! lands in the vector index under the same id. A write that touches both
//! stores is two-phase: the vector insert happens first (cheap to undo) and
//! is rolled back if the graph commit that follows it fails.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{GodagentError, GodagentResult};
use crate::graph::GraphStore;
use crate::types::{Node, NodeType, SearchHit};
use crate::vector::VectorIndex;

/// Options accepted by [`MemoryEngine::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Namespace the node is created in. Defaults to `"default"`.
    pub namespace: Option<String>,
    /// Id of an existing node to link this one to. Required for any
    /// non-root namespace (the orphan-node invariant).
    pub link_to: Option<String>,
    /// Relation label recorded on the hyperedge created from `link_to`.
    pub relation: Option<String>,
    /// Precomputed embedding for this value, if any.
    pub embedding: Option<Vec<f32>>,
}

/// Options accepted by [`MemoryEngine::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Restrict results to this namespace; `None` searches every namespace.
    pub namespace: Option<String>,
    /// Maximum hits to return.
    pub limit: usize,
    /// Drop hits below this similarity score.
    pub min_score: Option<f64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { namespace: None, limit: 10, min_score: None }
    }
}

/// Validate a namespace string against `^[a-z][a-z0-9_-]*(/[a-z0-9_-]+)*$`.
pub fn validate_namespace(namespace: &str) -> GodagentResult<()> {
    let reject = |reason: &str| {
        Err(GodagentError::NamespaceValidation { namespace: namespace.to_string(), reason: reason.to_string() })
    };
    if namespace.is_empty() {
        return reject("namespace must not be empty");
    }
    for (i, segment) in namespace.split('/').enumerate() {
        let mut chars = segment.chars();
        let Some(first) = chars.next() else {
            return reject("namespace segments must not be empty");
        };
        if i == 0 && !first.is_ascii_lowercase() {
            return reject("root segment must start with a lowercase letter");
        }
        if i > 0 && !(first.is_ascii_lowercase() || first.is_ascii_digit() || first == '_' || first == '-') {
            return reject("non-root segments must start with [a-z0-9_-]");
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
            return reject("segments may only contain [a-z0-9_-]");
        }
    }
    Ok(())
}

/// Whether `namespace` is a root namespace (single segment, no `/`).
pub fn is_root_namespace(namespace: &str) -> bool {
    !namespace.contains('/')
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Couples a [`VectorIndex`] and [`GraphStore`] into a single keyed memory.
pub struct MemoryEngine {
    vector: Arc<VectorIndex>,
    graph: Arc<GraphStore>,
    /// `"{namespace}\0{key}"` -> node id, for O(1) `retrieve`.
    key_index: DashMap<String, String>,
}

impl MemoryEngine {
    /// Wrap an existing vector index and graph store.
    pub fn new(vector: Arc<VectorIndex>, graph: Arc<GraphStore>) -> Self {
        Self { vector, graph, key_index: DashMap::new() }
    }

    fn index_key(namespace: &str, key: &str) -> String {
        format!("{namespace}\0{key}")
    }

    /// Store `value` under `key`, optionally embedding and linking it into
    /// the hypergraph. Returns the backing node id.
    pub fn store(&self, key: &str, value: &[u8], opts: StoreOptions) -> GodagentResult<String> {
        let namespace = opts.namespace.unwrap_or_else(|| "default".to_string());
        validate_namespace(&namespace)?;
        if !is_root_namespace(&namespace) && opts.link_to.is_none() {
            return Err(GodagentError::OrphanNode);
        }

        let node_id = uuid::Uuid::new_v4().to_string();

        let vector_id = if let Some(embedding) = opts.embedding {
            self.vector.insert(node_id.clone(), embedding)?;
            Some(node_id.clone())
        } else {
            None
        };

        let mut properties = serde_json::Map::new();
        properties.insert("key".into(), serde_json::Value::String(key.to_string()));
        properties.insert(
            "valueB64".into(),
            serde_json::Value::String(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, value)),
        );

        let has_vector = vector_id.is_some();

        let node = Node {
            id: node_id.clone(),
            node_type: NodeType::State,
            label: key.to_string(),
            namespace: namespace.clone(),
            vector_id,
            created_at: now(),
            updated_at: now(),
            properties,
        };

        let commit = self.graph.add_node(node).and_then(|_| {
            if let Some(target) = &opts.link_to {
                let mut metadata = serde_json::Map::new();
                if let Some(relation) = &opts.relation {
                    metadata.insert("relation".into(), serde_json::Value::String(relation.clone()));
                }
                self.graph
                    .add_hyperedge(vec![target.clone()], vec![node_id.clone()], 1.0, 1.0, metadata)
                    .map(|_| ())
            } else {
                Ok(())
            }
        });

        if let Err(err) = commit {
            if has_vector {
                self.vector.delete(&node_id);
            }
            self.graph.delete_node(&node_id).ok();
            return Err(err);
        }

        self.key_index.insert(Self::index_key(&namespace, key), node_id.clone());
        Ok(node_id)
    }

    /// Fetch a previously stored value by key. When `namespace` is `None`,
    /// every namespace is searched (first match wins, undefined order).
    pub fn retrieve(&self, key: &str, namespace: Option<&str>) -> Option<(String, Vec<u8>, String)> {
        let node_id = if let Some(ns) = namespace {
            self.key_index.get(&Self::index_key(ns, key)).map(|e| e.clone())
        } else {
            self.key_index.iter().find(|e| e.key().ends_with(&format!("\0{key}"))).map(|e| e.value().clone())
        }?;
        let node = self.graph.get_node(&node_id)?;
        let encoded = node.properties.get("valueB64")?.as_str()?;
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
        Some((node_id, bytes, node.namespace))
    }

    /// Vector search, optionally restricted to a namespace. Defaults to all
    /// namespaces when `opts.namespace` is `None`.
    pub fn search(&self, query: &[f32], opts: SearchOptions) -> GodagentResult<Vec<SearchHit>> {
        let hits = self.vector.search(query, opts.limit.max(1) * 4, false)?;
        let mut out = Vec::new();
        for hit in hits {
            if let Some(min) = opts.min_score {
                if hit.similarity < min {
                    continue;
                }
            }
            let Some(node) = self.graph.get_node(&hit.id) else { continue };
            if let Some(ns) = &opts.namespace {
                if &node.namespace != ns {
                    continue;
                }
            }
            let key = node.properties.get("key").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let value = node
                .properties
                .get("valueB64")
                .and_then(|v| v.as_str())
                .and_then(|b64| base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64).ok())
                .map(|bytes| decode_value(&bytes))
                .unwrap_or_default();
            out.push(SearchHit { key, value, namespace: node.namespace, score: hit.similarity, node_id: hit.id });
            if out.len() >= opts.limit {
                break;
            }
        }
        Ok(out)
    }

    /// Delete a stored value by key. Returns whether a matching entry was
    /// removed. Refused (leaving the entry intact) if the backing node is
    /// still referenced by a hyperedge.
    pub fn delete(&self, key: &str, namespace: Option<&str>) -> GodagentResult<bool> {
        let ns = namespace.unwrap_or("default");
        let index_key = Self::index_key(ns, key);
        let Some(node_id) = self.key_index.get(&index_key).map(|e| e.clone()) else {
            return Ok(false);
        };
        self.graph.delete_node(&node_id)?;
        self.vector.delete(&node_id);
        self.key_index.remove(&index_key);
        Ok(true)
    }

    /// Wipe every stored key, vector, and node. Irreversible.
    pub fn clear(&self) {
        self.key_index.clear();
        self.vector.clear();
        self.graph.clear();
    }

    /// Total number of stored keys.
    pub fn count(&self) -> usize {
        self.key_index.len()
    }

    /// Expose the underlying stores for subsystems that need direct access
    /// (context composition pulls episodes straight from the graph).
    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    /// Expose the underlying vector index.
    pub fn vector(&self) -> &Arc<VectorIndex> {
        &self.vector
    }

    /// Snapshot of all known keys by namespace, for diagnostics.
    pub fn keys_by_namespace(&self) -> HashMap<String, Vec<String>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for entry in self.key_index.iter() {
            if let Some((ns, key)) = entry.key().split_once('\0') {
                out.entry(ns.to_string()).or_default().push(key.to_string());
            }
        }
        out
    }
}

fn decode_value(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec())
        .unwrap_or_else(|_| base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorConfig;

    fn engine() -> MemoryEngine {
        let vector = Arc::new(VectorIndex::new(VectorConfig { dimensions: 4, ..VectorConfig::default() }));
        let graph = Arc::new(GraphStore::new());
        MemoryEngine::new(vector, graph)
    }

    #[test]
    fn test_validate_namespace_accepts_nested() {
        assert!(validate_namespace("project/phase-1/sub_task").is_ok());
        assert!(validate_namespace("project").is_ok());
    }

    #[test]
    fn test_validate_namespace_rejects_bad_grammar() {
        assert!(validate_namespace("Project").is_err());
        assert!(validate_namespace("/leading").is_err());
        assert!(validate_namespace("trailing/").is_err());
        assert!(validate_namespace("").is_err());
    }

    #[test]
    fn test_store_in_root_namespace_without_link() {
        let engine = engine();
        let id = engine.store("greeting", b"hello", StoreOptions::default()).unwrap();
        let (retrieved_id, bytes, ns) = engine.retrieve("greeting", None).unwrap();
        assert_eq!(retrieved_id, id);
        assert_eq!(bytes, b"hello");
        assert_eq!(ns, "default");
    }

    #[test]
    fn test_store_non_root_namespace_requires_link() {
        let engine = engine();
        let err = engine
            .store(
                "child",
                b"v",
                StoreOptions { namespace: Some("project/child".into()), ..Default::default() },
            )
            .unwrap_err();
        assert!(matches!(err, GodagentError::OrphanNode));
    }

    #[test]
    fn test_store_with_link_succeeds() {
        let engine = engine();
        let root = engine
            .store("root", b"v0", StoreOptions { namespace: Some("project".into()), ..Default::default() })
            .unwrap();
        let child = engine
            .store(
                "child",
                b"v1",
                StoreOptions {
                    namespace: Some("project/child".into()),
                    link_to: Some(root.clone()),
                    relation: Some("contains".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_ne!(root, child);
        assert_eq!(engine.graph.edge_count(), 1);
    }

    #[test]
    fn test_store_rolls_back_vector_on_graph_failure() {
        let engine = engine();
        let err = engine
            .store(
                "orphanish",
                b"v",
                StoreOptions {
                    namespace: Some("project/child".into()),
                    link_to: Some("does-not-exist".into()),
                    embedding: Some(vec![1.0, 0.0, 0.0, 0.0]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, GodagentError::NotFound { .. }));
        assert_eq!(engine.vector.len(), 0);
    }

    #[test]
    fn test_search_defaults_to_all_namespaces() {
        let engine = engine();
        engine
            .store(
                "a",
                b"v",
                StoreOptions { embedding: Some(vec![1.0, 0.0, 0.0, 0.0]), ..Default::default() },
            )
            .unwrap();
        let hits = engine.search(&[1.0, 0.0, 0.0, 0.0], SearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value, "v");
    }

    #[test]
    fn test_delete_removes_key_and_vector() {
        let engine = engine();
        engine
            .store("a", b"v", StoreOptions { embedding: Some(vec![1.0, 0.0, 0.0, 0.0]), ..Default::default() })
            .unwrap();
        assert_eq!(engine.count(), 1);
        assert!(engine.delete("a", None).unwrap());
        assert!(engine.retrieve("a", None).is_none());
        assert_eq!(engine.vector.len(), 0);
        assert!(!engine.delete("a", None).unwrap());
    }

    #[test]
    fn test_delete_refused_when_node_referenced() {
        let engine = engine();
        let root = engine
            .store("root", b"v0", StoreOptions { namespace: Some("project".into()), ..Default::default() })
            .unwrap();
        engine
            .store(
                "child",
                b"v1",
                StoreOptions { namespace: Some("project/child".into()), link_to: Some(root), ..Default::default() },
            )
            .unwrap();
        assert!(engine.delete("root", Some("project")).is_err());
    }

    #[test]
    fn test_clear_wipes_everything() {
        let engine = engine();
        engine
            .store("a", b"v", StoreOptions { embedding: Some(vec![1.0, 0.0, 0.0, 0.0]), ..Default::default() })
            .unwrap();
        engine.clear();
        assert_eq!(engine.count(), 0);
        assert_eq!(engine.vector.len(), 0);
        assert_eq!(engine.graph.node_count(), 0);
    }
}
