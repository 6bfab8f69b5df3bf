//! Hypergraph store: nodes and n-ary causes-to-effects hyperedges, built on
//! petgraph the same way the dependency graph this module replaced used it.
//!
//! A hyperedge is represented as an auxiliary graph node (`Item::Edge`) with
//! an arc from every cause node to it and an arc from it to every effect
//! node. This lets petgraph's ordinary traversal and cycle algorithms serve
//! an n-ary relation without a second graph crate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction as PetDirection;

use crate::error::{GodagentError, GodagentResult};
use crate::types::{Chain, ChainStep, Direction, Hyperedge, Node};

#[derive(Debug, Clone)]
enum Item {
    Node(Node),
    Edge(Hyperedge),
}

/// Parameters for [`GraphStore::traverse`].
#[derive(Debug, Clone)]
pub struct TraverseQuery {
    /// Node ids to start from.
    pub start_set: Vec<String>,
    /// Traversal direction.
    pub direction: Direction,
    /// Maximum number of hyperedge hops per chain.
    pub max_depth: usize,
    /// Minimum combined confidence to keep a chain.
    pub min_confidence: f64,
    /// Maximum number of chains to return.
    pub max_chains: usize,
}

impl Default for TraverseQuery {
    fn default() -> Self {
        Self {
            start_set: Vec::new(),
            direction: Direction::Out,
            max_depth: 5,
            min_confidence: 0.0,
            max_chains: 100,
        }
    }
}

struct GraphInner {
    // A stable graph leaves a hole on `remove_node` instead of swap-relocating
    // the last node into the freed slot, so `node_index`/`edge_index` entries
    // for every other node stay valid across a delete.
    graph: StableDiGraph<Item, ()>,
    node_index: HashMap<String, NodeIndex>,
    edge_index: HashMap<String, NodeIndex>,
}

/// Thread-safe hypergraph store.
pub struct GraphStore {
    inner: parking_lot::RwLock<GraphInner>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Create a new, empty hypergraph store.
    pub fn new() -> Self {
        Self {
            inner: parking_lot::RwLock::new(GraphInner {
                graph: StableDiGraph::new(),
                node_index: HashMap::new(),
                edge_index: HashMap::new(),
            }),
        }
    }

    /// Insert a node, assigning an id via UUIDv4 if `node.id` is empty.
    pub fn add_node(&self, mut node: Node) -> GodagentResult<String> {
        if node.id.is_empty() {
            node.id = uuid::Uuid::new_v4().to_string();
        }
        let id = node.id.clone();
        let mut inner = self.inner.write();
        if let Some(&idx) = inner.node_index.get(&id) {
            inner.graph[idx] = Item::Node(node);
        } else {
            let idx = inner.graph.add_node(Item::Node(node));
            inner.node_index.insert(id.clone(), idx);
        }
        Ok(id)
    }

    /// Fetch a node by id.
    pub fn get_node(&self, id: &str) -> Option<Node> {
        let inner = self.inner.read();
        let idx = *inner.node_index.get(id)?;
        match &inner.graph[idx] {
            Item::Node(n) => Some(n.clone()),
            Item::Edge(_) => None,
        }
    }

    /// Delete a node. Refused (`NodeReferenced`) if any hyperedge still
    /// references it as a cause or effect.
    pub fn delete_node(&self, id: &str) -> GodagentResult<bool> {
        let mut inner = self.inner.write();
        let Some(&idx) = inner.node_index.get(id) else {
            return Ok(false);
        };
        let referencing: HashSet<NodeIndex> = inner
            .graph
            .neighbors_directed(idx, PetDirection::Outgoing)
            .chain(inner.graph.neighbors_directed(idx, PetDirection::Incoming))
            .filter(|&n| matches!(inner.graph[n], Item::Edge(_)))
            .collect();
        if !referencing.is_empty() {
            return Err(GodagentError::NodeReferenced {
                node_id: id.to_string(),
                edge_count: referencing.len(),
            });
        }
        inner.graph.remove_node(idx);
        inner.node_index.remove(id);
        Ok(true)
    }

    /// Add a hyperedge. Validates that all referenced nodes exist, that
    /// confidence/strength are finite in `[0,1]`, and that the edge does not
    /// introduce a cycle (forward traversal from every effect must not reach
    /// any cause).
    pub fn add_hyperedge(
        &self,
        causes: Vec<String>,
        effects: Vec<String>,
        confidence: f64,
        strength: f64,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> GodagentResult<String> {
        if causes.is_empty() || effects.is_empty() {
            return Err(GodagentError::MalformedRequest(
                "hyperedge requires at least one cause and one effect".into(),
            ));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(GodagentError::MalformedRequest(format!(
                "confidence must be finite in [0,1], got {confidence}"
            )));
        }
        if !strength.is_finite() || !(0.0..=1.0).contains(&strength) {
            return Err(GodagentError::MalformedRequest(format!(
                "strength must be finite in [0,1], got {strength}"
            )));
        }

        let mut inner = self.inner.write();
        for id in causes.iter().chain(effects.iter()) {
            if !inner.node_index.contains_key(id) {
                return Err(GodagentError::NotFound { entity: format!("node {id}") });
            }
        }

        // Cycle check: from every effect, can we forward-reach any cause?
        let cause_set: HashSet<&String> = causes.iter().collect();
        for effect in &effects {
            if Self::reaches_any(&inner, effect, &cause_set) {
                return Err(GodagentError::CycleDetected);
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let edge = Hyperedge {
            id: id.clone(),
            causes: causes.clone(),
            effects: effects.clone(),
            confidence,
            strength,
            created_at: now(),
            metadata,
        };
        let edge_idx = inner.graph.add_node(Item::Edge(edge));
        inner.edge_index.insert(id.clone(), edge_idx);
        for cause in &causes {
            let cause_idx = inner.node_index[cause];
            inner.graph.add_edge(cause_idx, edge_idx, ());
        }
        for effect in &effects {
            let effect_idx = inner.node_index[effect];
            inner.graph.add_edge(edge_idx, effect_idx, ());
        }
        Ok(id)
    }

    /// Forward-reachability check used for cycle prevention: BFS from `start`
    /// through edge-nodes' effects; true if any id in `targets` is reached.
    fn reaches_any(inner: &GraphInner, start: &str, targets: &HashSet<&String>) -> bool {
        let Some(&start_idx) = inner.node_index.get(start) else {
            return false;
        };
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start_idx);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Item::Node(n) = &inner.graph[current] {
                if targets.contains(&n.id) {
                    return true;
                }
            }
            for next in inner.graph.neighbors_directed(current, PetDirection::Outgoing) {
                queue.push_back(next);
            }
        }
        false
    }

    /// Fetch the hyperedges touching `node_id` in the given direction.
    pub fn get_edges(&self, node_id: &str, direction: Direction) -> Vec<Hyperedge> {
        let inner = self.inner.read();
        let Some(&idx) = inner.node_index.get(node_id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let dirs: &[PetDirection] = match direction {
            Direction::Out => &[PetDirection::Outgoing],
            Direction::In => &[PetDirection::Incoming],
            Direction::Both => &[PetDirection::Outgoing, PetDirection::Incoming],
        };
        for &d in dirs {
            for n in inner.graph.neighbors_directed(idx, d) {
                if let Item::Edge(e) = &inner.graph[n] {
                    out.push(e.clone());
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.dedup_by(|a, b| a.id == b.id);
        out
    }

    /// Traverse the hypergraph from `query.start_set`, producing chains of
    /// hyperedges bounded by `max_depth`/`max_chains`/`min_confidence`.
    /// Sorted by combined confidence descending, ties by shorter path, then
    /// lexicographic edge-id order.
    pub fn traverse(&self, query: &TraverseQuery) -> Vec<Chain> {
        let inner = self.inner.read();
        let mut chains: Vec<Chain> = Vec::new();

        for start in &query.start_set {
            let Some(&start_idx) = inner.node_index.get(start) else {
                continue;
            };
            let mut stack: Vec<(NodeIndex, Vec<ChainStep>, f64, HashSet<NodeIndex>)> =
                vec![(start_idx, Vec::new(), 1.0, HashSet::new())];

            while let Some((node_idx, steps, confidence, mut visited_edges)) = stack.pop() {
                if steps.len() >= query.max_depth {
                    continue;
                }
                let dir = match query.direction {
                    Direction::Out => PetDirection::Outgoing,
                    Direction::In => PetDirection::Incoming,
                    Direction::Both => PetDirection::Outgoing,
                };
                for edge_node in inner.graph.neighbors_directed(node_idx, dir) {
                    let Item::Edge(edge) = &inner.graph[edge_node] else { continue };
                    if visited_edges.contains(&edge_node) {
                        continue; // avoid revisiting the same hyperedge within one chain
                    }
                    let combined = confidence * edge.confidence;
                    if combined < query.min_confidence {
                        continue;
                    }
                    let mut next_steps = steps.clone();
                    next_steps.push(ChainStep { edge_id: edge.id.clone(), edge_confidence: edge.confidence });
                    chains.push(Chain { steps: next_steps.clone(), combined_confidence: combined });

                    let mut next_visited = visited_edges.clone();
                    next_visited.insert(edge_node);
                    let next_dir = match query.direction {
                        Direction::Out => PetDirection::Outgoing,
                        Direction::In => PetDirection::Incoming,
                        Direction::Both => PetDirection::Outgoing,
                    };
                    for next_node in inner.graph.neighbors_directed(edge_node, next_dir) {
                        stack.push((next_node, next_steps.clone(), combined, next_visited.clone()));
                    }
                    visited_edges = next_visited;
                }
                let _ = visited_edges;
            }
        }

        chains.sort_by(|a, b| {
            b.combined_confidence
                .partial_cmp(&a.combined_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.steps.len().cmp(&b.steps.len()))
                .then_with(|| {
                    let a_last = a.steps.last().map(|s| s.edge_id.as_str()).unwrap_or("");
                    let b_last = b.steps.last().map(|s| s.edge_id.as_str()).unwrap_or("");
                    a_last.cmp(b_last)
                })
        });
        chains.truncate(query.max_chains);
        chains
    }

    /// Total node count (memory nodes only, excluding hyperedge auxiliary nodes).
    pub fn node_count(&self) -> usize {
        self.inner.read().node_index.len()
    }

    /// Total hyperedge count.
    pub fn edge_count(&self) -> usize {
        self.inner.read().edge_index.len()
    }

    /// Remove all nodes and edges.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.graph.clear();
        inner.node_index.clear();
        inner.edge_index.clear();
    }

    /// Serialize the whole store to `path` via an advisory-locked temp file
    /// then atomic rename.
    pub fn save(&self, path: &Path) -> GodagentResult<()> {
        use fs2::FileExt;

        let inner = self.inner.read();
        let nodes: Vec<Node> = inner
            .node_index
            .values()
            .filter_map(|&idx| match &inner.graph[idx] {
                Item::Node(n) => Some(n.clone()),
                Item::Edge(_) => None,
            })
            .collect();
        let edges: Vec<Hyperedge> = inner
            .edge_index
            .values()
            .filter_map(|&idx| match &inner.graph[idx] {
                Item::Edge(e) => Some(e.clone()),
                Item::Node(_) => None,
            })
            .collect();
        drop(inner);

        #[derive(serde::Serialize)]
        struct OnDisk {
            nodes: Vec<Node>,
            edges: Vec<Hyperedge>,
        }
        let doc = OnDisk { nodes, edges };
        let json = serde_json::to_vec_pretty(&doc)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = lock_path_for(path);
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_file.lock_exclusive().map_err(|_| GodagentError::LockTimeout {
            path: lock_path.clone(),
            timeout_secs: 5,
        })?;

        let temp_path = temp_path_for(path);
        {
            let mut temp = std::fs::File::create(&temp_path)?;
            temp.write_all(&json)?;
            temp.sync_all()?;
        }
        std::fs::rename(&temp_path, path)?;
        fs2::FileExt::unlock(&lock_file).ok();
        Ok(())
    }

    /// Load a store previously written by [`GraphStore::save`]. If a stale
    /// temp file is found alongside a valid stable file, the stable file
    /// wins and the stale temp file is left for the caller to clean up.
    pub fn load(path: &Path) -> GodagentResult<Self> {
        #[derive(serde::Deserialize)]
        struct OnDisk {
            nodes: Vec<Node>,
            edges: Vec<Hyperedge>,
        }
        let bytes = std::fs::read(path)?;
        let doc: OnDisk = serde_json::from_slice(&bytes).map_err(|e| GodagentError::CorruptSnapshot {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for node in doc.nodes {
                let id = node.id.clone();
                let idx = inner.graph.add_node(Item::Node(node));
                inner.node_index.insert(id, idx);
            }
            for edge in doc.edges {
                let id = edge.id.clone();
                let edge_idx = inner.graph.add_node(Item::Edge(edge.clone()));
                inner.edge_index.insert(id, edge_idx);
                for cause in &edge.causes {
                    if let Some(&cause_idx) = inner.node_index.get(cause) {
                        inner.graph.add_edge(cause_idx, edge_idx, ());
                    }
                }
                for effect in &edge.effects {
                    if let Some(&effect_idx) = inner.node_index.get(effect) {
                        inner.graph.add_edge(edge_idx, effect_idx, ());
                    }
                }
            }
        }
        Ok(store)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
