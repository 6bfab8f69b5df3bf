//! Top-level coordinator wiring every subsystem together behind one handle
//! the daemon's JSON-RPC service layer calls into.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::compat::{self, CompatStats};
use crate::config::{Config, LEGACY_DIMENSIONS};
use crate::context::{ContextComposer, DependencyDag, PinManager, RollingWindow};
use crate::embedder::{EmbeddingProvider, HashEmbedder};
use crate::error::GodagentResult;
use crate::feedback::FeedbackQueue;
use crate::graph::{GraphStore, TraverseQuery};
use crate::memory::{MemoryEngine, SearchOptions, StoreOptions};
use crate::types::{ComposedContext, Episode, FeedbackQueueEntry, Hyperedge, Node, Pin, SearchHit, WindowEntry};
use crate::vector::VectorIndex;
use crate::workflow::{WorkflowRegistry, WorkflowTask};

/// Owns every long-lived subsystem for one daemon instance.
pub struct Engine {
    config: Config,
    memory: MemoryEngine,
    context: ContextComposer,
    pins: Mutex<PinManager>,
    window: Mutex<RollingWindow>,
    dependencies: Mutex<DependencyDag>,
    workflows: Mutex<WorkflowRegistry>,
    feedback: FeedbackQueue,
    compat_stats: CompatStats,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Engine {
    /// Build a fresh engine from `config`, loading any existing on-disk
    /// vector index / graph snapshot, falling back to empty stores.
    pub fn new(config: Config) -> GodagentResult<Self> {
        let vector = if config.vector_path().exists() {
            Arc::new(VectorIndex::load(config.vector.clone(), &config.vector_path())?)
        } else {
            Arc::new(VectorIndex::new(config.vector.clone()))
        };

        let default_graph_path = config.graphs_dir().join("default.json");
        let graph = if default_graph_path.exists() {
            Arc::new(GraphStore::load(&default_graph_path)?)
        } else {
            Arc::new(GraphStore::new())
        };

        let memory = MemoryEngine::new(vector, graph);
        let context = ContextComposer::new(8000);
        let window = RollingWindow::new(50);
        let pins = PinManager::new(config.context.max_pinned_tokens);
        let feedback = FeedbackQueue::new(config.feedback_queue_path(), config.feedback_failures_path())?;

        Ok(Self {
            embedder: Arc::new(HashEmbedder::new(config.vector.dimensions)),
            config,
            memory,
            context,
            pins: Mutex::new(pins),
            window: Mutex::new(window),
            dependencies: Mutex::new(DependencyDag::new()),
            workflows: Mutex::new(WorkflowRegistry::new()),
            feedback,
            compat_stats: CompatStats::default(),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the embedding provider (e.g. for tests or a richer provider).
    pub fn set_embedder(&mut self, embedder: Arc<dyn EmbeddingProvider>) {
        self.embedder = embedder;
    }

    /// Store a value, upgrading a legacy-dimension embedding transparently.
    pub fn store(&self, key: &str, value: &[u8], mut opts: StoreOptions, now: i64) -> GodagentResult<String> {
        if let Some(embedding) = opts.embedding.take() {
            let upgraded = if embedding.len() == LEGACY_DIMENSIONS {
                let upgraded = compat::upgrade(&embedding)?;
                if let Some(warning) = self.compat_stats.record(embedding.len(), now) {
                    tracing::warn!(%warning, "legacy-dimension embedding upgraded");
                }
                upgraded
            } else {
                self.compat_stats.record(embedding.len(), now);
                embedding
            };
            opts.embedding = Some(upgraded);
        }
        self.memory.store(key, value, opts)
    }

    /// Embed `text` with the configured provider and store it.
    pub fn store_with_auto_embed(
        &self,
        key: &str,
        value: &[u8],
        text: &str,
        mut opts: StoreOptions,
        now: i64,
    ) -> GodagentResult<String> {
        if opts.embedding.is_none() && self.embedder.is_available() {
            opts.embedding = Some(self.embedder.embed(text)?.0);
        }
        self.store(key, value, opts, now)
    }

    /// Fetch a stored value by key.
    pub fn retrieve(&self, key: &str, namespace: Option<&str>) -> Option<(String, Vec<u8>, String)> {
        self.memory.retrieve(key, namespace)
    }

    /// Vector search over stored memory.
    pub fn search(&self, query: &[f32], opts: SearchOptions) -> GodagentResult<Vec<SearchHit>> {
        self.memory.search(query, opts)
    }

    /// Delete a stored value by key. Refused if the backing node is still
    /// referenced by a hyperedge.
    pub fn delete(&self, key: &str, namespace: Option<&str>) -> GodagentResult<bool> {
        self.memory.delete(key, namespace)
    }

    /// Wipe every stored key, vector, and node.
    pub fn clear_memory(&self) {
        self.memory.clear()
    }

    /// Total number of stored keys.
    pub fn memory_count(&self) -> usize {
        self.memory.count()
    }

    /// Insert a standalone hypergraph node (not backed by `store`).
    pub fn add_node(&self, node: Node) -> GodagentResult<String> {
        self.memory.graph().add_node(node)
    }

    /// Fetch a hypergraph node by id.
    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.memory.graph().get_node(id)
    }

    /// Delete a hypergraph node. Refused if any hyperedge still references it.
    pub fn delete_node(&self, id: &str) -> GodagentResult<bool> {
        self.memory.graph().delete_node(id)
    }

    /// Insert a hyperedge.
    pub fn add_hyperedge(
        &self,
        causes: Vec<String>,
        effects: Vec<String>,
        confidence: f64,
        strength: f64,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> GodagentResult<String> {
        self.memory.graph().add_hyperedge(causes, effects, confidence, strength, metadata)
    }

    /// List hyperedges touching a node.
    pub fn get_edges(&self, node_id: &str, direction: crate::types::Direction) -> Vec<Hyperedge> {
        self.memory.graph().get_edges(node_id, direction)
    }

    /// Traverse causal chains from a set of starting nodes.
    pub fn traverse(&self, query: &TraverseQuery) -> Vec<crate::types::Chain> {
        self.memory.graph().traverse(query)
    }

    /// Pin content for an agent, evicting the lowest-priority pin on overflow.
    pub fn pin(&self, pin: Pin) -> Vec<Pin> {
        self.pins.lock().add_pin(pin)
    }

    /// Push a new entry into the active rolling window.
    pub fn push_window_entry(&self, entry: WindowEntry) {
        self.window.lock().push(entry);
    }

    /// Record that `agent` depends on `depends_on`, for Tier 3 ordering.
    pub fn add_dependency(&self, agent: &str, depends_on: &str) {
        self.dependencies.lock().add_dependency(agent, depends_on);
    }

    /// Compose the four-tier context for `prior_solutions` under `budget`.
    /// When `target_agent` is given, Tier 3 orders its transitive
    /// dependencies ahead of everyone else.
    pub fn compose_context(
        &self,
        prior_solutions: &[Episode],
        budget: Option<u32>,
        target_agent: Option<&str>,
    ) -> GodagentResult<ComposedContext> {
        let pins = self.pins.lock().pins();
        let window = self.window.lock().entries();
        let archived = self.window.lock().archived_ids().to_vec();
        let dependencies = self.dependencies.lock();
        self.context.compose(&pins, prior_solutions, &window, &archived, budget, target_agent, &dependencies)
    }

    /// Register a workflow adapter.
    pub fn register_workflow(&self, adapter: Box<dyn crate::workflow::WorkflowAdapter>) {
        self.workflows.lock().register(adapter);
    }

    /// Select the best-fit workflow adapter for a task.
    pub fn select_workflow(&self, task: &WorkflowTask) -> Option<String> {
        self.workflows.lock().select(task).map(str::to_string)
    }

    /// Submit feedback to the durable retry queue.
    pub fn submit_feedback(&self, entry: FeedbackQueueEntry, now: i64) -> GodagentResult<()> {
        self.feedback.submit(entry, now)
    }

    /// Run one feedback-queue retry sweep.
    pub fn sweep_feedback(&self, sink: &dyn crate::feedback::FeedbackSink, now: i64) -> GodagentResult<usize> {
        self.feedback.sweep(sink, now)
    }

    /// Flush the vector index and default graph to disk.
    pub fn persist(&self) -> GodagentResult<()> {
        self.memory.vector().save(&self.config.vector_path())?;
        self.memory.graph().save(&self.config.graphs_dir().join("default.json"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::defaults();
        config.storage_dir = dir.path().to_path_buf();
        config.vector.dimensions = 8;
        let engine = Engine::new(config).unwrap();
        (engine, dir)
    }

    #[test]
    fn test_store_and_retrieve_roundtrip() {
        let (engine, _dir) = test_engine();
        engine.store("greeting", b"hello", StoreOptions::default(), 0).unwrap();
        let (_, bytes, _) = engine.retrieve("greeting", None).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_store_upgrades_legacy_embedding_before_validation() {
        // the 8-dim test index can't hold a canonical-width vector either way,
        // but the failure must come from the *post-upgrade* dimension check.
        let (engine, _dir) = test_engine();
        let legacy = vec![1.0f32; LEGACY_DIMENSIONS];
        let err = engine
            .store("legacy", b"v", StoreOptions { embedding: Some(legacy), ..Default::default() }, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::GodagentError::VectorDimensionMismatch { actual: crate::config::CANONICAL_DIMENSIONS, .. }
        ));
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::defaults();
        config.storage_dir = dir.path().to_path_buf();
        config.vector.dimensions = 4;
        let engine = Engine::new(config.clone()).unwrap();
        engine
            .store("k", b"v", StoreOptions { embedding: Some(vec![1.0, 0.0, 0.0, 0.0]), ..Default::default() }, 0)
            .unwrap();
        engine.persist().unwrap();

        let reloaded = Engine::new(config).unwrap();
        let (_, bytes, _) = reloaded.retrieve("k", None).unwrap();
        assert_eq!(bytes, b"v");
    }
}
