//! Unix-socket server: accept loop, admission control, idle timeout, and
//! graceful shutdown.
//!
//! Generalizes the teacher's `serve_unix_socket`/`handle_client` pair into a
//! small lifecycle state machine with a client cap and a drain deadline, per
//! the daemon's operating contract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};

use godagent_core::{Config, Engine};

use crate::framer::Framer;
use crate::protocol::{self, error_codes, Incoming, ParseFailure, Response};
use crate::registry::ServiceRegistry;
use crate::metrics::PerformanceMetrics;

/// Daemon lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Shared state every connection handler reads from.
pub struct Server {
    pub engine: Arc<Engine>,
    pub registry: Arc<ServiceRegistry>,
    pub metrics: Arc<PerformanceMetrics>,
    pub config: Config,
    state: Mutex<State>,
    active_clients: AtomicUsize,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Build a server around an engine, service registry, and metrics sink.
    pub fn new(config: Config, engine: Engine, registry: ServiceRegistry, metrics: PerformanceMetrics) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            engine: Arc::new(engine),
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
            config,
            state: Mutex::new(State::Stopped),
            active_clients: AtomicUsize::new(0),
            shutdown_tx,
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> State {
        *self.state.lock().await
    }

    /// Number of currently connected clients.
    pub fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::Relaxed)
    }

    /// Bind the socket, accept connections until a shutdown is requested.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        *self.state.lock().await = State::Starting;

        let socket_path = &self.config.socket_path;
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        tracing::info!(socket = %socket_path.display(), "listening on unix socket");

        *self.state.lock().await = State::Running;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    self.clone().accept_connection(stream);
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        self.drain_and_stop().await;
        let _ = std::fs::remove_file(socket_path);
        Ok(())
    }

    /// Request graceful shutdown: stop accepting, notify clients, wait up to
    /// `server.shutdown_drain_secs` for them to disconnect.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn drain_and_stop(&self) {
        *self.state.lock().await = State::Stopping;
        let deadline = Duration::from_secs(self.config.server.shutdown_drain_secs);
        let start = std::time::Instant::now();
        while self.active_clients() > 0 && start.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if let Err(e) = self.engine.persist() {
            tracing::warn!(error = %e, "failed to persist stores during shutdown");
        }
        *self.state.lock().await = State::Stopped;
    }

    fn accept_connection(self: Arc<Self>, stream: UnixStream) {
        let cap = self.config.server.max_clients;
        if self.active_clients.load(Ordering::Relaxed) >= cap {
            tokio::spawn(async move {
                let mut stream = stream;
                let response = Response::error(
                    serde_json::Value::Null,
                    error_codes::SERVICE_UNAVAILABLE,
                    "connection limit reached",
                );
                let _ = write_response(&mut stream, &response).await;
            });
            return;
        }

        self.active_clients.fetch_add(1, Ordering::Relaxed);
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.handle_client(stream).await {
                tracing::warn!(error = %e, "client handler error");
            }
            server.active_clients.fetch_sub(1, Ordering::Relaxed);
        });
    }

    async fn handle_client(&self, mut stream: UnixStream) -> anyhow::Result<()> {
        let mut framer = Framer::new(self.config.server.max_message_bytes);
        let mut buf = [0u8; 8192];
        let idle_timeout = Duration::from_secs(self.config.server.idle_timeout_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let read = tokio::select! {
                result = tokio::time::timeout(idle_timeout, stream.read(&mut buf)) => {
                    match result {
                        Ok(Ok(0)) => break, // EOF
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => return Err(e.into()),
                        Err(_) => break, // idle timeout: disconnect silently
                    }
                }
                _ = shutdown_rx.recv() => {
                    let notice = serde_json::json!({"jsonrpc": "2.0", "method": "shutdown"});
                    let mut line = serde_json::to_vec(&notice)?;
                    line.push(b'\n');
                    let _ = stream.write_all(&line).await;
                    break;
                }
            };

            let (lines, oversized) = framer.push(&buf[..read]);
            if oversized {
                let response = Response::error(serde_json::Value::Null, error_codes::INVALID_REQUEST, "message too large");
                write_response(&mut stream, &response).await?;
            }
            for line in lines {
                if line.trim_ascii().is_empty() {
                    continue;
                }
                if let Some(responses) = self.process_line(&line).await {
                    for response in responses {
                        write_response(&mut stream, &response).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse and dispatch one line, returning the response(s) to write (if
    /// any -- notifications alone produce none).
    async fn process_line(&self, line: &[u8]) -> Option<Vec<Response>> {
        match Incoming::parse(line) {
            Err(ParseFailure::NotJson) => {
                Some(vec![Response::error(serde_json::Value::Null, error_codes::PARSE_ERROR, "Parse error")])
            }
            Err(ParseFailure::InvalidRequest { id }) => {
                Some(vec![Response::error(id, error_codes::INVALID_REQUEST, "Invalid Request")])
            }
            Ok(Incoming::Single(req)) => {
                let is_notification = req.is_notification();
                let response = self.dispatch_one(req).await;
                if is_notification {
                    None
                } else {
                    Some(vec![response])
                }
            }
            Ok(Incoming::Batch(reqs)) => {
                let mut responses = Vec::new();
                for req in reqs {
                    let is_notification = req.is_notification();
                    let response = self.dispatch_one(req).await;
                    if !is_notification {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(responses)
                }
            }
        }
    }

    async fn dispatch_one(&self, req: protocol::Request) -> Response {
        let id = req.id.clone().unwrap_or(serde_json::Value::Null);
        let start = std::time::Instant::now();
        let params = req.params.unwrap_or(serde_json::Value::Object(Default::default()));

        let result = match req.method.split_once('.') {
            Some(("health", method)) => self.handle_health(method).await,
            Some((service, method)) => self.registry.call(service, method, self.engine.clone(), params).await,
            None => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: {}", req.method))),
        };

        self.metrics.record_request_latency(start.elapsed());
        match result {
            Ok(value) => Response::success(id, value),
            Err((code, message)) => Response::error(id, code, message),
        }
    }

    /// Built-in `health.*` methods. These bypass the service registry.
    async fn handle_health(&self, method: &str) -> Result<serde_json::Value, (i32, String)> {
        match method {
            "ping" => Ok(serde_json::json!({"pong": true, "timestamp": unix_now()})),
            "status" => {
                let state = match self.state().await {
                    State::Stopped => "stopped",
                    State::Starting => "starting",
                    State::Running => "running",
                    State::Stopping => "stopping",
                };
                let services: Vec<serde_json::Value> = self
                    .registry
                    .metrics_snapshot()
                    .into_iter()
                    .map(|(name, calls, errors, total_duration_ms)| {
                        serde_json::json!({"name": name, "calls": calls, "errors": errors, "totalDurationMs": total_duration_ms})
                    })
                    .collect();
                Ok(serde_json::json!({
                    "state": state,
                    "uptime": self.metrics.uptime_secs(),
                    "activeConnections": self.active_clients(),
                    "totalRequests": self.metrics.get_total_requests(),
                    "services": services,
                }))
            }
            other => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method: health.{other}"))),
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn write_response(stream: &mut UnixStream, response: &Response) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> (Arc<Server>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::defaults();
        config.storage_dir = dir.path().to_path_buf();
        config.socket_path = dir.path().join("test.sock");
        config.vector.dimensions = 8;
        let engine = Engine::new(config.clone()).unwrap();
        let registry = ServiceRegistry::new();
        let server = Server::new(config, engine, registry, PerformanceMetrics::new(100));
        (server, dir)
    }

    #[tokio::test]
    async fn test_initial_state_is_stopped() {
        let (server, _dir) = test_server();
        assert_eq!(server.state().await, State::Stopped);
    }

    #[tokio::test]
    async fn test_process_line_parse_error() {
        let (server, _dir) = test_server();
        let responses = server.process_line(b"not json").await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].error.as_ref().unwrap().code, error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_process_line_notification_produces_no_response() {
        let (server, _dir) = test_server();
        let line = br#"{"jsonrpc":"2.0","method":"health.ping"}"#;
        assert!(server.process_line(line).await.is_none());
    }

    #[tokio::test]
    async fn test_process_line_request_dispatches() {
        let (server, _dir) = test_server();
        let line = br#"{"jsonrpc":"2.0","id":1,"method":"health.ping"}"#;
        let responses = server.process_line(line).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result.as_ref().unwrap()["pong"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_health_status_reports_state() {
        let (server, _dir) = test_server();
        let line = br#"{"jsonrpc":"2.0","id":1,"method":"health.status"}"#;
        let responses = server.process_line(line).await.unwrap();
        assert_eq!(responses[0].result.as_ref().unwrap()["state"], serde_json::json!("stopped"));
    }

    #[tokio::test]
    async fn test_unknown_service_yields_method_not_found() {
        let (server, _dir) = test_server();
        let line = br#"{"jsonrpc":"2.0","id":1,"method":"nope.anything"}"#;
        let responses = server.process_line(line).await.unwrap();
        assert_eq!(responses[0].error.as_ref().unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_process_line_batch_skips_notification() {
        let (server, _dir) = test_server();
        let line = br#"[{"jsonrpc":"2.0","method":"health.ping","id":1},{"jsonrpc":"2.0","method":"health.ping"}]"#;
        let responses = server.process_line(line).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, serde_json::json!(1));
    }
}
