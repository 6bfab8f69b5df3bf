//! Error types for godagent-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on the
//! subsystem that failed. The daemon's service layer maps each variant to a
//! JSON-RPC error code; the taxonomy below mirrors that mapping so the two
//! stay in sync without duplicating match arms.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all godagent-core operations.
#[derive(Debug, Error)]
pub enum GodagentError {
    // ---- Validation ----
    /// A namespace string did not match the required grammar.
    #[error("invalid namespace {namespace:?}: {reason}")]
    NamespaceValidation {
        /// The offending namespace string.
        namespace: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A vector failed a dimension, finiteness, or normalization check.
    #[error("invalid vector: expected dim {expected}, got {actual}")]
    VectorDimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension observed.
        actual: usize,
    },

    /// A vector contained a non-finite component.
    #[error("vector contains non-finite component at index {index}")]
    VectorNotFinite {
        /// Index of the offending component.
        index: usize,
    },

    /// A vector's L2 norm was outside the tolerated range, or zero.
    #[error("vector norm {norm} outside tolerance of 1.0 (epsilon {epsilon})")]
    VectorNotNormalized {
        /// Observed norm.
        norm: f64,
        /// Allowed epsilon.
        epsilon: f64,
    },

    /// Malformed JSON-RPC input at the protocol boundary.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    // ---- Invariant violation ----
    /// A non-root-namespace node was created without `linkTo`.
    #[error("orphan node: linkTo required for non-root namespace")]
    OrphanNode,

    /// Adding a hyperedge would introduce a cycle.
    #[error("cycle detected: adding this hyperedge would create a cycle")]
    CycleDetected,

    /// A service was registered twice under the same name.
    #[error("service already registered: {name}")]
    DuplicateService {
        /// The conflicting service name.
        name: String,
    },

    /// A node is still referenced by one or more hyperedges and cannot be deleted directly.
    #[error("node {node_id} is referenced by {edge_count} hyperedge(s); delete those first")]
    NodeReferenced {
        /// The node that was requested for deletion.
        node_id: String,
        /// Number of hyperedges still referencing it.
        edge_count: usize,
    },

    // ---- Routing / not-found ----
    /// Requested node, edge, vector, or session was not found.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of what was not found.
        entity: String,
    },

    // ---- Storage ----
    /// The on-disk snapshot could not be parsed.
    #[error("corrupt snapshot at {path}: {message}")]
    CorruptSnapshot {
        /// Path to the corrupt file.
        path: PathBuf,
        /// Parse failure detail.
        message: String,
    },

    /// A stale temp file was found during atomic-write recovery.
    #[error("stale temp file at {path}")]
    StaleTempFile {
        /// Path to the stale temp file.
        path: PathBuf,
    },

    /// An advisory file lock could not be acquired within the timeout.
    #[error("lock timeout on {path} after {timeout_secs}s")]
    LockTimeout {
        /// Path the lock was attempted on.
        path: PathBuf,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// A session file failed validation on read.
    #[error("session corrupted: {session_id}")]
    SessionCorrupted {
        /// The session id whose file failed to parse.
        session_id: String,
    },

    /// A session file could not be written after retries.
    #[error("session persist failed for {session_id}: {message}")]
    SessionPersist {
        /// The session id that failed to persist.
        session_id: String,
        /// Underlying I/O failure detail.
        message: String,
    },

    // ---- Timeout ----
    /// A budget could not accommodate even the pinned tier.
    #[error("token budget {budget} exceeded by pinned tier alone ({pinned})")]
    BudgetExceeded {
        /// Requested total budget.
        budget: u32,
        /// Tokens required just for the pinned tier.
        pinned: u32,
    },

    // ---- Unrecoverable ----
    /// A required store failed to initialize at startup.
    #[error("initialization failed: {details}")]
    Init {
        /// What failed to initialize.
        details: String,
    },

    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    // ---- Wrapped external errors ----
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary (de)serialization error for the v1 vector index format.
    #[error("binary codec error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results in godagent-core.
pub type GodagentResult<T> = Result<T, GodagentError>;
