//! Dual-backend approximate nearest-neighbor vector index.
//!
//! Below [`VectorConfig::hnsw_threshold`] vectors, search is brute-force
//! (`O(n*D)`, exact). At or above the threshold, an HNSW-style single-layer
//! navigable graph is built lazily on the next search after any mutation.
//! Vectors are pre-normalized so cosine similarity collapses to a dot
//! product; no runtime norm division is needed at query time.

use std::io::{Read, Write};
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::VectorConfig;
use crate::error::{GodagentError, GodagentResult};
use crate::types::VectorId;

/// L2-normalize a vector in place. No-op on an already-zero vector.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f64 = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm > 0.0 {
        #[allow(clippy::cast_possible_truncation)]
        let norm_f32 = norm as f32;
        for x in v.iter_mut() {
            *x /= norm_f32;
        }
    }
}

/// Validate a vector against the dimension/finiteness/normalization invariants.
pub fn validate(v: &[f32], expected_dim: usize, epsilon: f64) -> GodagentResult<()> {
    if v.len() != expected_dim {
        return Err(GodagentError::VectorDimensionMismatch {
            expected: expected_dim,
            actual: v.len(),
        });
    }
    for (i, x) in v.iter().enumerate() {
        if !x.is_finite() {
            return Err(GodagentError::VectorNotFinite { index: i });
        }
    }
    let norm: f64 = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if (norm - 1.0).abs() > epsilon {
        return Err(GodagentError::VectorNotNormalized { norm, epsilon });
    }
    Ok(())
}

/// A single hit returned from [`VectorIndex::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// The matched vector's id.
    pub id: VectorId,
    /// Cosine similarity (higher is better), in `[-1, 1]`.
    pub similarity: f64,
    /// The stored vector, if `include_vectors` was set.
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
struct ScoredCandidate {
    similarity: f64,
    id: VectorId,
}

impl Eq for ScoredCandidate {}
impl Ord for ScoredCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.similarity
            .partial_cmp(&other.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for ScoredCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A single-layer navigable small-world graph, the "HNSW-style" backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NswGraph {
    /// Adjacency list: id -> neighbor ids (up to `m` per node).
    neighbors: std::collections::HashMap<VectorId, Vec<VectorId>>,
    /// Entry point for greedy search.
    entry_point: Option<VectorId>,
}

impl NswGraph {
    fn rebuild(vectors: &DashMap<VectorId, Vec<f32>>, m: usize, ef_construction: usize) -> Self {
        let mut graph = Self::default();
        let ids: Vec<VectorId> = vectors.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return graph;
        }
        graph.entry_point = Some(ids[0].clone());

        for id in &ids {
            let v = vectors.get(id).map(|e| e.value().clone()).unwrap_or_default();
            let mut candidates: Vec<ScoredCandidate> = Vec::new();
            for other_id in &ids {
                if other_id == id {
                    continue;
                }
                let ov = vectors.get(other_id).map(|e| e.value().clone()).unwrap_or_default();
                candidates.push(ScoredCandidate {
                    similarity: dot(&v, &ov),
                    id: other_id.clone(),
                });
            }
            candidates.sort_by(|a, b| b.cmp(a));
            candidates.truncate(ef_construction.max(m));
            candidates.truncate(m);
            graph.neighbors.insert(id.clone(), candidates.into_iter().map(|c| c.id).collect());
        }
        graph
    }

    fn search(
        &self,
        query: &[f32],
        vectors: &DashMap<VectorId, Vec<f32>>,
        k: usize,
        ef_search: usize,
    ) -> Vec<(VectorId, f64)> {
        let Some(entry) = self.entry_point.clone() else {
            return Vec::new();
        };

        let mut visited = std::collections::HashSet::new();
        let mut frontier: Vec<VectorId> = vec![entry];
        let mut best: Vec<(VectorId, f64)> = Vec::new();

        while let Some(current) = frontier.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(cv) = vectors.get(&current).map(|e| e.value().clone()) else {
                continue;
            };
            best.push((current.clone(), dot(query, &cv)));

            if let Some(neighbors) = self.neighbors.get(&current) {
                for n in neighbors {
                    if !visited.contains(n) {
                        frontier.push(n.clone());
                    }
                }
            }
            if visited.len() >= ef_search.max(k) {
                break;
            }
        }

        best.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        best.truncate(k);
        best
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

/// Which backend currently serves search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    BruteForce,
    Hnsw,
}

/// Fixed-dimension, dual-backend vector index.
pub struct VectorIndex {
    config: VectorConfig,
    vectors: DashMap<VectorId, Vec<f32>>,
    graph: parking_lot::RwLock<NswGraph>,
    backend: parking_lot::RwLock<Backend>,
    dirty: std::sync::atomic::AtomicBool,
}

impl VectorIndex {
    /// Create a new, empty vector index.
    pub fn new(config: VectorConfig) -> Self {
        Self {
            config,
            vectors: DashMap::new(),
            graph: parking_lot::RwLock::new(NswGraph::default()),
            backend: parking_lot::RwLock::new(Backend::BruteForce),
            dirty: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Configured dimensionality.
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Insert (or overwrite) a vector under `id`. Canonical duplicate-id
    /// policy: overwrite.
    pub fn insert(&self, id: VectorId, v: Vec<f32>) -> GodagentResult<()> {
        validate(&v, self.config.dimensions, self.config.epsilon)?;
        self.vectors.insert(id, v);
        self.dirty.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    /// Remove a vector by id. Returns whether it was present.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.vectors.remove(id).is_some();
        if removed {
            self.dirty.store(true, std::sync::atomic::Ordering::Release);
        }
        removed
    }

    /// Remove all vectors.
    pub fn clear(&self) {
        self.vectors.clear();
        *self.graph.write() = NswGraph::default();
        *self.backend.write() = Backend::BruteForce;
        self.dirty.store(false, std::sync::atomic::Ordering::Release);
    }

    /// Search for the `k` nearest neighbors of `query` by cosine similarity.
    pub fn search(&self, query: &[f32], k: usize, include_vectors: bool) -> GodagentResult<Vec<Hit>> {
        validate(query, self.config.dimensions, self.config.epsilon)?;
        self.maybe_rebuild();

        let results = if *self.backend.read() == Backend::Hnsw {
            self.graph.read().search(query, &self.vectors, k, self.config.ef_search)
        } else {
            let mut all: Vec<(VectorId, f64)> = self
                .vectors
                .iter()
                .map(|e| (e.key().clone(), dot(query, e.value())))
                .collect();
            all.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            all.truncate(k);
            all
        };

        Ok(results
            .into_iter()
            .map(|(id, sim)| Hit {
                vector: include_vectors.then(|| self.vectors.get(&id).map(|e| e.value().clone())).flatten(),
                id,
                similarity: sim,
            })
            .collect())
    }

    /// Rebuild the HNSW graph if the index is dirty and above the threshold.
    /// No-op below the threshold (brute-force stays authoritative).
    fn maybe_rebuild(&self) {
        if !self.dirty.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        if self.vectors.len() >= self.config.hnsw_threshold {
            let graph = NswGraph::rebuild(&self.vectors, self.config.hnsw_m, self.config.ef_construction);
            *self.graph.write() = graph;
            *self.backend.write() = Backend::Hnsw;
        } else {
            *self.backend.write() = Backend::BruteForce;
        }
        self.dirty.store(false, std::sync::atomic::Ordering::Release);
    }

    /// Persist to disk. Uses the v1 binary format while on the brute-force
    /// backend, v2 JSON otherwise.
    pub fn save(&self, path: &Path) -> GodagentResult<()> {
        self.maybe_rebuild();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if *self.backend.read() == Backend::Hnsw {
            self.save_v2(path)
        } else {
            self.save_v1(path)
        }
    }

    fn save_v1(&self, path: &Path) -> GodagentResult<()> {
        #[derive(Serialize)]
        struct V1 {
            version: u32,
            dim: u32,
            vectors: Vec<(VectorId, Vec<f32>)>,
        }
        let doc = V1 {
            version: 1,
            dim: self.config.dimensions as u32,
            vectors: self.vectors.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
        };
        let bytes = bincode::serialize(&doc)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn save_v2(&self, path: &Path) -> GodagentResult<()> {
        #[derive(Serialize)]
        struct V2<'a> {
            version: u32,
            dim: usize,
            vectors: std::collections::HashMap<VectorId, Vec<f32>>,
            graph: &'a NswGraph,
        }
        let vectors: std::collections::HashMap<VectorId, Vec<f32>> =
            self.vectors.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let doc = V2 {
            version: 2,
            dim: self.config.dimensions,
            vectors,
            graph: &self.graph.read(),
        };
        let json = serde_json::to_vec(&doc)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load from disk, auto-detecting v1 (binary) vs v2 (JSON, starts with `{`).
    pub fn load(config: VectorConfig, path: &Path) -> GodagentResult<Self> {
        let mut bytes = Vec::new();
        std::fs::File::open(path)?.read_to_end(&mut bytes)?;

        if bytes.first() == Some(&b'{') {
            Self::load_v2(config, &bytes, path)
        } else {
            Self::load_v1(config, &bytes, path)
        }
    }

    fn load_v1(config: VectorConfig, bytes: &[u8], path: &Path) -> GodagentResult<Self> {
        #[derive(Deserialize)]
        struct V1 {
            #[allow(dead_code)]
            version: u32,
            #[allow(dead_code)]
            dim: u32,
            vectors: Vec<(VectorId, Vec<f32>)>,
        }
        let doc: V1 = bincode::deserialize(bytes).map_err(|e| GodagentError::CorruptSnapshot {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let index = Self::new(config);
        for (id, v) in doc.vectors {
            index.vectors.insert(id, v);
        }
        index.dirty.store(true, std::sync::atomic::Ordering::Release);
        Ok(index)
    }

    fn load_v2(config: VectorConfig, bytes: &[u8], path: &Path) -> GodagentResult<Self> {
        #[derive(Deserialize)]
        struct V2 {
            vectors: std::collections::HashMap<VectorId, Vec<f32>>,
            graph: NswGraph,
        }
        let doc: V2 = serde_json::from_slice(bytes).map_err(|e| GodagentError::CorruptSnapshot {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let index = Self::new(config);
        for (id, v) in doc.vectors {
            index.vectors.insert(id, v);
        }
        *index.graph.write() = doc.graph;
        *index.backend.write() = Backend::Hnsw;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vector(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_insert_and_search_single_vector() {
        let index = VectorIndex::new(VectorConfig { dimensions: 4, ..VectorConfig::default() });
        let v = unit_vector(4, 0);
        index.insert("a".into(), v.clone()).unwrap();
        let hits = index.search(&v, 5, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = VectorIndex::new(VectorConfig { dimensions: 4, ..VectorConfig::default() });
        let err = index.insert("a".into(), vec![1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, GodagentError::VectorDimensionMismatch { .. }));
    }

    #[test]
    fn test_non_normalized_vector_rejected() {
        let index = VectorIndex::new(VectorConfig { dimensions: 4, ..VectorConfig::default() });
        let err = index.insert("a".into(), vec![2.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, GodagentError::VectorNotNormalized { .. }));
    }

    #[test]
    fn test_non_finite_vector_rejected() {
        let index = VectorIndex::new(VectorConfig { dimensions: 4, ..VectorConfig::default() });
        let err = index.insert("a".into(), vec![f32::NAN, 0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, GodagentError::VectorNotFinite { .. }));
    }

    #[test]
    fn test_overwrite_duplicate_id() {
        let index = VectorIndex::new(VectorConfig { dimensions: 4, ..VectorConfig::default() });
        index.insert("a".into(), unit_vector(4, 0)).unwrap();
        index.insert("a".into(), unit_vector(4, 1)).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search(&unit_vector(4, 1), 1, false).unwrap();
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_delete() {
        let index = VectorIndex::new(VectorConfig { dimensions: 4, ..VectorConfig::default() });
        index.insert("a".into(), unit_vector(4, 0)).unwrap();
        assert!(index.delete("a"));
        assert!(!index.delete("a"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_rebuild_into_hnsw_above_threshold() {
        let config = VectorConfig {
            dimensions: 8,
            hnsw_threshold: 4,
            ..VectorConfig::default()
        };
        let index = VectorIndex::new(config);
        for i in 0..5 {
            index.insert(format!("v{i}"), unit_vector(8, i)).unwrap();
        }
        let hits = index.search(&unit_vector(8, 2), 1, false).unwrap();
        assert_eq!(hits[0].id, "v2");
        assert_eq!(*index.backend.read(), Backend::Hnsw);
    }

    #[test]
    fn test_save_load_v1_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let config = VectorConfig { dimensions: 4, ..VectorConfig::default() };
        let index = VectorIndex::new(config.clone());
        index.insert("a".into(), unit_vector(4, 0)).unwrap();
        index.insert("b".into(), unit_vector(4, 1)).unwrap();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(config, &path).unwrap();
        assert_eq!(loaded.len(), 2);
        let hits = loaded.search(&unit_vector(4, 1), 1, false).unwrap();
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn test_save_load_v2_roundtrip_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let config = VectorConfig {
            dimensions: 8,
            hnsw_threshold: 2,
            ..VectorConfig::default()
        };
        let index = VectorIndex::new(config.clone());
        for i in 0..3 {
            index.insert(format!("v{i}"), unit_vector(8, i)).unwrap();
        }
        index.save(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.first(), Some(&b'{'));

        let loaded = VectorIndex::load(config, &path).unwrap();
        assert_eq!(loaded.len(), 3);
        let hits = loaded.search(&unit_vector(8, 1), 1, false).unwrap();
        assert_eq!(hits[0].id, "v1");
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0f32, 4.0, 0.0, 0.0];
        l2_normalize(&mut v);
        let norm: f64 = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
