//! Core domain types shared across all godagent-core subsystems.
//!
//! These types form the API contract between the vector index, graph store,
//! memory engine, and context composer. Changing them requires updating all
//! consumers, so they should be stable and minimal.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

/// Opaque identifier for a stored vector. Caller-assigned or index-generated.
pub type VectorId = String;

/// A fixed-dimension, L2-normalized embedding.
///
/// Invariant: every component is finite and `|‖v‖ - 1| <= epsilon`. These
/// invariants are enforced at every insertion boundary by
/// [`crate::vector::validate`], never by this type's constructor alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vector(pub Vec<f32>);

impl Vector {
    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f64 {
        self.0.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt()
    }

    /// Dimension (component count).
    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

// ---------------------------------------------------------------------------
// Node / Hyperedge
// ---------------------------------------------------------------------------

/// The kind of a memory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// An abstract concept or fact.
    Concept,
    /// An action an agent took or could take.
    Action,
    /// A state of the world at a point in time.
    State,
}

/// A memory node: the unit of storage in the hypergraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Immutable node id.
    pub id: String,
    /// Node type.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Human-readable label.
    pub label: String,
    /// Namespace the node lives in; see the grammar in [`crate::memory::validate_namespace`].
    pub namespace: String,
    /// Associated vector id, if this node carries an embedding.
    pub vector_id: Option<VectorId>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last-update timestamp (Unix epoch seconds).
    pub updated_at: i64,
    /// Arbitrary mutable properties (e.g. `key`, `valueB64` for memory records).
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// An n-ary, directed, causes-to-effects hyperedge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperedge {
    /// Immutable edge id.
    pub id: String,
    /// Source node ids (non-empty).
    pub causes: Vec<String>,
    /// Target node ids (non-empty).
    pub effects: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Strength in `[0, 1]`.
    pub strength: f64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Arbitrary metadata (e.g. `relation`).
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Direction for edge traversal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges where the node is a cause.
    Out,
    /// Edges where the node is an effect.
    In,
    /// Both directions.
    Both,
}

/// One step of a traversal: the hyperedge walked and the confidence carried forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    /// The hyperedge id walked at this step.
    pub edge_id: String,
    /// That edge's own confidence.
    pub edge_confidence: f64,
}

/// A traversal result: an ordered sequence of edges and their combined confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    /// Ordered edge steps.
    pub steps: Vec<ChainStep>,
    /// Product of all step confidences.
    pub combined_confidence: f64,
}

// ---------------------------------------------------------------------------
// Memory records / episodes
// ---------------------------------------------------------------------------

/// A value returned from `memory.search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// The stored key.
    pub key: String,
    /// Decoded value bytes, represented as a UTF-8 string when valid, else base64.
    pub value: String,
    /// Namespace the hit was found in.
    pub namespace: String,
    /// Similarity score from the vector index.
    pub score: f64,
    /// Backing node id.
    pub node_id: String,
}

/// An episode: a timestamped memory record used by the context composer's DESC tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    /// Episode id (backing node id).
    pub id: String,
    /// Free-text content.
    pub content: String,
    /// Embedding vector id, if computed.
    pub vector_id: Option<VectorId>,
    /// Freeform tags.
    pub tags: Vec<String>,
    /// Owning session id.
    pub session_id: Option<String>,
    /// Quality score in `[0, 1]`.
    pub quality: f64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Context composition
// ---------------------------------------------------------------------------

/// An entry in the rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEntry {
    /// Owning agent id.
    pub agent_id: String,
    /// Entry content.
    pub content: String,
    /// Precomputed token count.
    pub token_count: u32,
    /// Phase label active when this entry was recorded.
    pub phase: String,
    /// Insertion timestamp (Unix epoch seconds); also used as a stable insertion-order key.
    pub timestamp: i64,
}

/// A pinned entry that survives window eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    /// Owning agent id.
    pub agent_id: String,
    /// Pinned content.
    pub content: String,
    /// Precomputed token count.
    pub token_count: u32,
    /// Why this was pinned.
    pub reason: String,
    /// Priority used to decide which pin to evict when over the cap.
    pub priority: i32,
    /// Pin timestamp (Unix epoch seconds).
    pub pinned_at: i64,
}

/// One tier of the composed context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 1: all current pins.
    Pinned,
    /// Tier 2: up to two prior-solution (DESC) hits.
    PriorSolutions,
    /// Tier 3: active rolling-window entries.
    Active,
    /// Tier 4: archived references only, zero tokens.
    Archived,
}

/// A single entry in a composed context, tagged with the tier it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedEntry {
    /// Which tier contributed this entry.
    pub tier: Tier,
    /// Owning agent id, if known.
    pub agent_id: Option<String>,
    /// Content; `None` for archived (reference-only) entries.
    pub content: Option<String>,
    /// Stable identifier (window/pin/episode/archive id).
    pub reference_id: String,
    /// Tokens charged against the budget for this entry (0 for archived).
    pub token_count: u32,
}

/// The output of [`crate::context::ContextComposer::compose`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedContext {
    /// Entries in tier order, then composition order within a tier.
    pub entries: Vec<ComposedEntry>,
    /// Total tokens per tier.
    pub tier_totals: std::collections::BTreeMap<String, u32>,
    /// Sum of all non-archived entry token counts.
    pub total_tokens: u32,
    /// `total_tokens / budget`.
    pub utilization: f64,
    /// `budget - total_tokens`.
    pub remaining_budget: u32,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Lifecycle status of a pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Actively running.
    Running,
    /// Paused, may resume.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with an unrecoverable error.
    Failed,
}

/// Persisted session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// UUIDv4 session id.
    pub session_id: String,
    /// Current status.
    pub status: SessionStatus,
    /// Current phase label.
    pub phase: String,
    /// Index of the currently running agent, if any.
    pub agent_index: Option<u32>,
    /// Agent ids that have completed.
    pub completed_agents: Vec<String>,
    /// Session start timestamp (Unix epoch seconds).
    pub start_time: i64,
    /// Last-activity timestamp (Unix epoch seconds); drives 24h expiry.
    pub last_activity_time: i64,
    /// Accumulated error messages.
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Feedback queue
// ---------------------------------------------------------------------------

/// Outcome classification of a feedback submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The trajectory succeeded.
    Positive,
    /// The trajectory failed.
    Negative,
    /// Neither clearly positive nor negative.
    Neutral,
}

/// An entry in the durable feedback retry queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackQueueEntry {
    /// Id of the trajectory this feedback is about.
    pub trajectory_id: String,
    /// Quality score in `[0, 1]`.
    pub quality: f64,
    /// Outcome classification.
    pub outcome: Outcome,
    /// Arbitrary submission metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Number of delivery attempts made so far.
    pub attempts: u32,
    /// Timestamp of the last attempt (Unix epoch seconds), if any.
    pub last_attempt_at: Option<i64>,
    /// Creation timestamp (Unix epoch seconds); drives 24h expiry to the failure log.
    pub created_at: i64,
}
