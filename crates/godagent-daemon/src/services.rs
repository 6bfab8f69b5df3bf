//! JSON-RPC service handlers wrapping a [`godagent_core::Engine`].
//!
//! Generalizes the teacher's `handle_status`/`handle_search`/... functions
//! (one per old code-search method) into one handler per service
//! (`memory`, `graph`, `context`, `workflow`, `feedback`, `session`), each
//! dispatching internally on the method name it was registered for.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Deserialize;

use godagent_core::graph::TraverseQuery;
use godagent_core::memory::{SearchOptions, StoreOptions};
use godagent_core::session::SessionStore;
use godagent_core::types::{Direction, Node, NodeType, Pin, WindowEntry};
use godagent_core::{Engine, GodagentResult};

use crate::protocol::{error_codes, rpc_error_for};
use crate::registry::ServiceRegistry;

type HandlerResult = Result<serde_json::Value, (i32, String)>;

fn invalid_params(e: impl std::fmt::Display) -> (i32, String) {
    (error_codes::INVALID_PARAMS, format!("invalid params: {e}"))
}

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, (i32, String)> {
    serde_json::from_value(params).map_err(invalid_params)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Register every non-built-in service. `health.*` is handled directly by
/// the server and never touches this registry.
pub fn register_all(registry: &ServiceRegistry) -> GodagentResult<()> {
    registry.register("memory", memory_dispatch, vec!["store", "retrieve", "search", "delete", "count", "clear"])?;
    registry.register("graph", graph_dispatch, vec!["addnode", "getnode", "deletenode", "addhyperedge", "getedges", "traverse"])?;
    registry.register("context", context_dispatch, vec!["pin", "pushwindow", "compose", "adddependency"])?;
    registry.register("workflow", workflow_dispatch, vec!["select"])?;
    registry.register("feedback", feedback_dispatch, vec!["submit"])?;
    registry.register("session", session_dispatch, vec!["create", "load", "list", "delete"])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// memory.*
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreParams {
    key: String,
    value: String,
    namespace: Option<String>,
    link_to: Option<String>,
    relation: Option<String>,
    embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveParams {
    key: String,
    namespace: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    query: Vec<f32>,
    namespace: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    min_score: Option<f64>,
}

fn default_limit() -> usize {
    10
}

fn memory_dispatch(method: &str, engine: Arc<Engine>, params: serde_json::Value) -> BoxFuture<'static, HandlerResult> {
    let method = method.to_string();
    Box::pin(async move {
        match method.as_str() {
            "store" => {
                let p: StoreParams = parse_params(params)?;
                let opts = StoreOptions {
                    namespace: p.namespace,
                    link_to: p.link_to,
                    relation: p.relation,
                    embedding: p.embedding,
                };
                // No client-supplied embedding falls through to the engine's
                // injectable provider, keyed off the same text being stored.
                let node_id = engine
                    .store_with_auto_embed(&p.key, p.value.as_bytes(), &p.value, opts, unix_now())
                    .map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::json!({"nodeId": node_id}))
            }
            "retrieve" => {
                let p: RetrieveParams = parse_params(params)?;
                match engine.retrieve(&p.key, p.namespace.as_deref()) {
                    Some((_, bytes, namespace)) => {
                        let value = String::from_utf8(bytes).unwrap_or_default();
                        Ok(serde_json::json!({"value": value, "namespace": namespace}))
                    }
                    None => Ok(serde_json::Value::Null),
                }
            }
            "search" => {
                let p: SearchParams = parse_params(params)?;
                let opts = SearchOptions { namespace: p.namespace, limit: p.limit, min_score: p.min_score };
                let hits = engine.search(&p.query, opts).map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::json!({"hits": hits}))
            }
            "delete" => {
                let p: RetrieveParams = parse_params(params)?;
                let removed = engine.delete(&p.key, p.namespace.as_deref()).map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::json!({"removed": removed}))
            }
            "count" => Ok(serde_json::json!({"count": engine.memory_count()})),
            "clear" => {
                engine.clear_memory();
                Ok(serde_json::json!({"cleared": true}))
            }
            other => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: memory.{other}"))),
        }
    })
}

// ---------------------------------------------------------------------------
// graph.*
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddNodeParams {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    label: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeIdParams {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddHyperedgeParams {
    causes: Vec<String>,
    effects: Vec<String>,
    confidence: f64,
    strength: f64,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetEdgesParams {
    node_id: String,
    #[serde(default)]
    direction: DirectionParam,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum DirectionParam {
    In,
    #[default]
    Out,
    Both,
}

impl From<DirectionParam> for Direction {
    fn from(d: DirectionParam) -> Self {
        match d {
            DirectionParam::In => Direction::In,
            DirectionParam::Out => Direction::Out,
            DirectionParam::Both => Direction::Both,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraverseParams {
    start_set: Vec<String>,
    #[serde(default)]
    direction: DirectionParam,
    max_depth: Option<usize>,
    min_confidence: Option<f64>,
    max_chains: Option<usize>,
}

fn graph_dispatch(method: &str, engine: Arc<Engine>, params: serde_json::Value) -> BoxFuture<'static, HandlerResult> {
    let method = method.to_string();
    Box::pin(async move {
        match method.as_str() {
            "addnode" => {
                let p: AddNodeParams = parse_params(params)?;
                let now = unix_now();
                let node = Node {
                    id: p.id,
                    node_type: p.node_type,
                    label: p.label,
                    namespace: p.namespace,
                    vector_id: None,
                    created_at: now,
                    updated_at: now,
                    properties: p.properties,
                };
                let id = engine.add_node(node).map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::json!({"id": id}))
            }
            "getnode" => {
                let p: NodeIdParams = parse_params(params)?;
                Ok(serde_json::to_value(engine.get_node(&p.id)).unwrap_or(serde_json::Value::Null))
            }
            "deletenode" => {
                let p: NodeIdParams = parse_params(params)?;
                let removed = engine.delete_node(&p.id).map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::json!({"removed": removed}))
            }
            "addhyperedge" => {
                let p: AddHyperedgeParams = parse_params(params)?;
                let id = engine
                    .add_hyperedge(p.causes, p.effects, p.confidence, p.strength, p.metadata)
                    .map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::json!({"id": id}))
            }
            "getedges" => {
                let p: GetEdgesParams = parse_params(params)?;
                let edges = engine.get_edges(&p.node_id, p.direction.into());
                Ok(serde_json::json!({"edges": edges}))
            }
            "traverse" => {
                let p: TraverseParams = parse_params(params)?;
                let mut query = TraverseQuery { start_set: p.start_set, direction: p.direction.into(), ..TraverseQuery::default() };
                if let Some(max_depth) = p.max_depth {
                    query.max_depth = max_depth;
                }
                if let Some(min_confidence) = p.min_confidence {
                    query.min_confidence = min_confidence;
                }
                if let Some(max_chains) = p.max_chains {
                    query.max_chains = max_chains;
                }
                let chains = engine.traverse(&query);
                Ok(serde_json::json!({"chains": chains}))
            }
            other => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: graph.{other}"))),
        }
    })
}

// ---------------------------------------------------------------------------
// context.*
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinParams {
    agent_id: String,
    content: String,
    token_count: u32,
    reason: String,
    #[serde(default)]
    priority: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushWindowParams {
    agent_id: String,
    content: String,
    token_count: u32,
    phase: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ComposeParams {
    #[serde(default)]
    prior_solutions: Vec<godagent_core::types::Episode>,
    budget: Option<u32>,
    target_agent: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddDependencyParams {
    agent: String,
    depends_on: String,
}

fn context_dispatch(method: &str, engine: Arc<Engine>, params: serde_json::Value) -> BoxFuture<'static, HandlerResult> {
    let method = method.to_string();
    Box::pin(async move {
        match method.as_str() {
            "pin" => {
                let p: PinParams = parse_params(params)?;
                let pin = Pin {
                    agent_id: p.agent_id,
                    content: p.content,
                    token_count: p.token_count,
                    reason: p.reason,
                    priority: p.priority,
                    pinned_at: unix_now(),
                };
                let pins = engine.pin(pin);
                Ok(serde_json::json!({"pins": pins}))
            }
            "pushwindow" => {
                let p: PushWindowParams = parse_params(params)?;
                engine.push_window_entry(WindowEntry {
                    agent_id: p.agent_id,
                    content: p.content,
                    token_count: p.token_count,
                    phase: p.phase,
                    timestamp: unix_now(),
                });
                Ok(serde_json::Value::Null)
            }
            "compose" => {
                let p: ComposeParams = parse_params(params)?;
                let composed = engine
                    .compose_context(&p.prior_solutions, p.budget, p.target_agent.as_deref())
                    .map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::to_value(composed).unwrap_or(serde_json::Value::Null))
            }
            "adddependency" => {
                let p: AddDependencyParams = parse_params(params)?;
                engine.add_dependency(&p.agent, &p.depends_on);
                Ok(serde_json::Value::Null)
            }
            other => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: context.{other}"))),
        }
    })
}

// ---------------------------------------------------------------------------
// workflow.*
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectParams {
    description: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn workflow_dispatch(method: &str, engine: Arc<Engine>, params: serde_json::Value) -> BoxFuture<'static, HandlerResult> {
    let method = method.to_string();
    Box::pin(async move {
        match method.as_str() {
            "select" => {
                let p: SelectParams = parse_params(params)?;
                let task = godagent_core::workflow::WorkflowTask { description: p.description, tags: p.tags };
                let selected = engine.select_workflow(&task);
                Ok(serde_json::json!({"adapter": selected}))
            }
            other => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: workflow.{other}"))),
        }
    })
}

// ---------------------------------------------------------------------------
// feedback.*
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitFeedbackParams {
    trajectory_id: String,
    quality: f64,
    outcome: godagent_core::types::Outcome,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

fn feedback_dispatch(method: &str, engine: Arc<Engine>, params: serde_json::Value) -> BoxFuture<'static, HandlerResult> {
    let method = method.to_string();
    Box::pin(async move {
        match method.as_str() {
            "submit" => {
                let p: SubmitFeedbackParams = parse_params(params)?;
                let now = unix_now();
                let entry = godagent_core::types::FeedbackQueueEntry {
                    trajectory_id: p.trajectory_id,
                    quality: p.quality,
                    outcome: p.outcome,
                    metadata: p.metadata,
                    attempts: 0,
                    last_attempt_at: None,
                    created_at: now,
                };
                engine.submit_feedback(entry, now).map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::Value::Null)
            }
            other => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: feedback.{other}"))),
        }
    })
}

// ---------------------------------------------------------------------------
// session.*
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadSessionParams {
    session_id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListSessionsParams {
    max_age_secs: Option<i64>,
}

fn session_dispatch(method: &str, engine: Arc<Engine>, params: serde_json::Value) -> BoxFuture<'static, HandlerResult> {
    let method = method.to_string();
    Box::pin(async move {
        let store = SessionStore::new(engine.config().sessions_dir());
        match method.as_str() {
            "create" => {
                let session = store.create().map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::to_value(session).unwrap_or(serde_json::Value::Null))
            }
            "load" => {
                let p: LoadSessionParams = parse_params(params)?;
                let session = store.load(&p.session_id).map_err(|e| rpc_error_for(&e))?;
                Ok(serde_json::to_value(session).unwrap_or(serde_json::Value::Null))
            }
            "list" => {
                let p: ListSessionsParams = parse_params(params)?;
                let sessions = store.list(p.max_age_secs);
                Ok(serde_json::json!({"sessions": sessions}))
            }
            "delete" => {
                let p: LoadSessionParams = parse_params(params)?;
                let removed = store.delete(&p.session_id);
                Ok(serde_json::json!({"removed": removed}))
            }
            other => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: session.{other}"))),
        }
    })
}
