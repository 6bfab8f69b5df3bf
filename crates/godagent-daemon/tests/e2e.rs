//! End-to-end tests driving the daemon over a real Unix socket, the same
//! way a client would: connect, write a newline-delimited JSON-RPC request,
//! read back a newline-delimited response.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use godagent_core::{Config, Engine};
use godagent_daemon::metrics::PerformanceMetrics;
use godagent_daemon::registry::ServiceRegistry;
use godagent_daemon::server::Server;
use godagent_daemon::services;

async fn spawn_test_server() -> (std::sync::Arc<Server>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::defaults();
    config.storage_dir = dir.path().to_path_buf();
    config.socket_path = dir.path().join("test.sock");
    config.vector.dimensions = 8;
    config.server.max_clients = 2;
    config.server.idle_timeout_secs = 2;
    config.server.max_message_bytes = 1024;

    let engine = Engine::new(config.clone()).unwrap();
    let registry = ServiceRegistry::new();
    services::register_all(&registry).unwrap();
    let server = Server::new(config, engine, registry, PerformanceMetrics::new(100));

    let run_server = server.clone();
    tokio::spawn(async move {
        let _ = run_server.run().await;
    });

    // give the accept loop a moment to bind before the first connection attempt
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, dir)
}

async fn roundtrip(socket_path: &std::path::Path, request: &serde_json::Value) -> serde_json::Value {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    let mut line = serde_json::to_vec(request).unwrap();
    line.push(b'\n');
    stream.write_all(&line).await.unwrap();

    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.unwrap();
    serde_json::from_str(&response_line).unwrap()
}

#[tokio::test]
async fn test_health_ping_over_socket() {
    let (server, _dir) = spawn_test_server().await;
    let request = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "health.ping"});
    let response = roundtrip(&server.config.socket_path, &request).await;
    assert_eq!(response["result"]["pong"], serde_json::json!(true));
    server.request_shutdown();
}

#[tokio::test]
async fn test_memory_store_and_retrieve_over_socket() {
    let (server, _dir) = spawn_test_server().await;
    let store_request = serde_json::json!({
        "jsonrpc": "2.0", "id": 1, "method": "memory.store",
        "params": {"key": "fact-1", "value": "hello"}
    });
    let response = roundtrip(&server.config.socket_path, &store_request).await;
    assert!(response.get("error").is_none(), "unexpected error: {response:?}");

    let retrieve_request = serde_json::json!({
        "jsonrpc": "2.0", "id": 2, "method": "memory.retrieve",
        "params": {"key": "fact-1"}
    });
    let response = roundtrip(&server.config.socket_path, &retrieve_request).await;
    assert_eq!(response["result"]["value"], serde_json::json!("hello"));
    server.request_shutdown();
}

#[tokio::test]
async fn test_orphan_node_rejected_with_internal_error() {
    let (server, _dir) = spawn_test_server().await;
    let request = serde_json::json!({
        "jsonrpc": "2.0", "id": 1, "method": "memory.store",
        "params": {"key": "child", "value": "v", "namespace": "team/alpha"}
    });
    let response = roundtrip(&server.config.socket_path, &request).await;
    assert_eq!(response["error"]["code"], serde_json::json!(-32603));
    server.request_shutdown();
}

#[tokio::test]
async fn test_batch_request_skips_response_for_notification() {
    let (server, _dir) = spawn_test_server().await;
    let mut stream = UnixStream::connect(&server.config.socket_path).await.unwrap();
    let batch = serde_json::json!([
        {"jsonrpc": "2.0", "id": 1, "method": "health.ping"},
        {"jsonrpc": "2.0", "method": "health.ping"}
    ]);
    let mut line = serde_json::to_vec(&batch).unwrap();
    line.push(b'\n');
    stream.write_all(&line).await.unwrap();

    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.unwrap();
    let responses: Vec<serde_json::Value> = serde_json::from_str(&response_line).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], serde_json::json!(1));
    server.request_shutdown();
}

#[tokio::test]
async fn test_malformed_json_yields_parse_error() {
    let (server, _dir) = spawn_test_server().await;
    let mut stream = UnixStream::connect(&server.config.socket_path).await.unwrap();
    stream.write_all(b"not json at all\n").await.unwrap();

    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.unwrap();
    let response: serde_json::Value = serde_json::from_str(&response_line).unwrap();
    assert_eq!(response["error"]["code"], serde_json::json!(-32700));
    server.request_shutdown();
}

#[tokio::test]
async fn test_connection_over_client_cap_rejected() {
    let (server, _dir) = spawn_test_server().await;

    // hold two connections open to saturate the cap of 2 before the third arrives
    let held_a = UnixStream::connect(&server.config.socket_path).await.unwrap();
    let held_b = UnixStream::connect(&server.config.socket_path).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let request = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "health.ping"});
    let response = roundtrip(&server.config.socket_path, &request).await;
    assert_eq!(response["error"]["code"], serde_json::json!(-32000));

    drop(held_a);
    drop(held_b);
    server.request_shutdown();
}

#[tokio::test]
async fn test_oversized_message_dropped_connection_stays_open() {
    let (server, _dir) = spawn_test_server().await;
    let mut stream = UnixStream::connect(&server.config.socket_path).await.unwrap();

    let oversized = vec![b'x'; 2048]; // no newline: one unterminated frame over the 1024-byte cap
    stream.write_all(&oversized).await.unwrap();

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.unwrap();
    let response: serde_json::Value = serde_json::from_str(&response_line).unwrap();
    assert_eq!(response["error"]["code"], serde_json::json!(-32600));

    // the connection survives the drop and can still process a normal request
    let mut line = serde_json::to_vec(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "health.ping"})).unwrap();
    line.push(b'\n');
    write_half.write_all(&line).await.unwrap();
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.unwrap();
    let response: serde_json::Value = serde_json::from_str(&response_line).unwrap();
    assert_eq!(response["result"]["pong"], serde_json::json!(true));

    server.request_shutdown();
}

#[tokio::test]
async fn test_graph_get_node_and_delete_over_socket() {
    let (server, _dir) = spawn_test_server().await;
    let add_request = serde_json::json!({
        "jsonrpc": "2.0", "id": 1, "method": "graph.addnode",
        "params": {"type": "concept", "label": "lightning"}
    });
    let response = roundtrip(&server.config.socket_path, &add_request).await;
    let node_id = response["result"]["id"].as_str().unwrap().to_string();

    let get_request = serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "graph.getnode", "params": {"id": node_id}});
    let response = roundtrip(&server.config.socket_path, &get_request).await;
    assert_eq!(response["result"]["label"], serde_json::json!("lightning"));

    let delete_request = serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "graph.deletenode", "params": {"id": node_id}});
    let response = roundtrip(&server.config.socket_path, &delete_request).await;
    assert_eq!(response["result"]["removed"], serde_json::json!(true));
    server.request_shutdown();
}

#[tokio::test]
async fn test_memory_delete_count_and_clear_over_socket() {
    let (server, _dir) = spawn_test_server().await;
    let socket = &server.config.socket_path;

    roundtrip(socket, &serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "memory.store", "params": {"key": "a", "value": "v"}})).await;
    let count = roundtrip(socket, &serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "memory.count"})).await;
    assert_eq!(count["result"]["count"], serde_json::json!(1));

    let deleted = roundtrip(socket, &serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "memory.delete", "params": {"key": "a"}})).await;
    assert_eq!(deleted["result"]["removed"], serde_json::json!(true));

    roundtrip(socket, &serde_json::json!({"jsonrpc": "2.0", "id": 4, "method": "memory.store", "params": {"key": "b", "value": "v"}})).await;
    let cleared = roundtrip(socket, &serde_json::json!({"jsonrpc": "2.0", "id": 5, "method": "memory.clear"})).await;
    assert_eq!(cleared["result"]["cleared"], serde_json::json!(true));
    let count = roundtrip(socket, &serde_json::json!({"jsonrpc": "2.0", "id": 6, "method": "memory.count"})).await;
    assert_eq!(count["result"]["count"], serde_json::json!(0));

    server.request_shutdown();
}

#[tokio::test]
async fn test_health_status_reports_registered_services() {
    let (server, _dir) = spawn_test_server().await;
    let request = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "health.status"});
    let response = roundtrip(&server.config.socket_path, &request).await;
    let services = response["result"]["services"].as_array().unwrap();
    let names: Vec<&str> = services.iter().map(|s| s["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"memory"));
    assert!(names.contains(&"graph"));
    assert!(names.contains(&"session"));
    server.request_shutdown();
}
