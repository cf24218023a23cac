//! HTTP integration tests.
//!
//! Each test binds the router on an ephemeral port and drives it with a real
//! HTTP client, decoding the response bodies frame by frame.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest_eventsource::{Event as SseEvent, EventSource};
use tokio::net::TcpListener;

use sse_streaming_rs::config::Config;
use sse_streaming_rs::producer::tokenize;
use sse_streaming_rs::registry::SessionRegistry;
use sse_streaming_rs::server::{router, AppState};
use sse_streaming_rs::streaming::SseDecoder;

/// Config with millisecond pacing so streams finish quickly.
fn fast_config() -> Config {
    let mut config = Config::default();
    config.metrics.enabled = false;
    config.server.write_timeout_secs = 5;
    config.producers.heartbeat_interval_ms = 10;
    config.producers.token_interval_ms = 1;
    config.producers.progress_interval_ms = 5;
    config.producers.echo_delay_ms = 5;
    config
}

async fn spawn_server(config: Config) -> (SocketAddr, SessionRegistry) {
    let registry = SessionRegistry::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(config, registry.clone()));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, registry)
}

/// Poll until the registry has no live sessions.
async fn wait_for_no_sessions(registry: &SessionRegistry) {
    tokio::time::timeout(Duration::from_secs(5), registry.wait_for_drain())
        .await
        .expect("sessions should drain");
}

#[tokio::test]
async fn test_health() {
    let (addr, _registry) = spawn_server(fast_config()).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn test_index_lists_endpoints() {
    let (addr, _registry) = spawn_server(fast_config()).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["endpoints"]["post_stream"], "/stream/post");
}

#[tokio::test]
async fn test_progress_stream() {
    let (addr, registry) = spawn_server(fast_config()).await;

    let response = reqwest::get(format!(
        "http://{}/stream/progress/data-processing?steps=5",
        addr
    ))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let body = response.bytes().await.unwrap();
    let events = SseDecoder::decode_all(&body);

    let progress: Vec<u64> = events
        .iter()
        .map(|e| {
            assert_eq!(e.kind(), "progress");
            e.json_data().unwrap()["progress"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(progress, vec![20, 40, 60, 80, 100]);

    let last = events.last().unwrap().json_data().unwrap();
    assert_eq!(last["status"], "complete");
    assert_eq!(last["task"], "data-processing");

    wait_for_no_sessions(&registry).await;
}

#[tokio::test]
async fn test_post_echo_stream() {
    let (addr, _registry) = spawn_server(fast_config()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/stream/post", addr))
        .json(&serde_json::json!({
            "message": "Hello from test script",
            "user_id": "demo-user"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = SseDecoder::decode_all(&response.bytes().await.unwrap());
    let (terminal, chunks) = events.split_last().unwrap();

    let words: Vec<String> = chunks
        .iter()
        .map(|e| {
            let data = e.json_data().unwrap();
            assert_eq!(data["user_id"], "demo-user");
            data["chunk"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(words, vec!["Hello", "from", "test", "script"]);

    assert_eq!(terminal.kind(), "complete");
    assert_eq!(terminal.json_data().unwrap()["total_chunks"], 4);
}

#[tokio::test]
async fn test_post_echo_chunk_size() {
    let (addr, _registry) = spawn_server(fast_config()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/stream/post?chunk_size=2", addr))
        .json(&serde_json::json!({ "message": "one two three" }))
        .send()
        .await
        .unwrap();

    let events = SseDecoder::decode_all(&response.bytes().await.unwrap());
    let chunks: Vec<serde_json::Value> = events
        .iter()
        .filter(|e| e.kind() == "chunk")
        .map(|e| e.json_data().unwrap())
        .collect();

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0]["chunk"], "one two");
    assert_eq!(chunks[1]["chunk"], "three");
    assert_eq!(chunks[0]["user_id"], "anonymous");
}

#[tokio::test]
async fn test_llm_stream_with_event_source() {
    let (addr, _registry) = spawn_server(fast_config()).await;
    let prompt = "Tell me about Rust";

    let mut source = EventSource::get(format!(
        "http://{}/stream/llm?prompt=Tell%20me%20about%20Rust",
        addr
    ));

    let mut text = String::new();
    let mut total_chunks = None;
    let mut last_id = 0u64;

    let collect = async {
        while let Some(event) = source.next().await {
            match event.unwrap() {
                SseEvent::Open => {}
                SseEvent::Message(message) => {
                    let id: u64 = message.id.parse().unwrap();
                    assert!(id > last_id);
                    last_id = id;

                    let data: serde_json::Value = serde_json::from_str(&message.data).unwrap();
                    match message.event.as_str() {
                        "chunk" => text.push_str(data["chunk"].as_str().unwrap()),
                        "complete" => {
                            total_chunks = data["total_chunks"].as_u64();
                            break;
                        }
                        other => panic!("unexpected event type {}", other),
                    }
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("stream should complete");
    source.close();

    let tokens = tokenize(prompt);
    assert_eq!(text, tokens.join(" "));
    assert_eq!(total_chunks, Some(tokens.len() as u64));
}

#[tokio::test]
async fn test_client_disconnect_closes_session() {
    let (addr, registry) = spawn_server(fast_config()).await;

    let mut response = reqwest::get(format!("http://{}/stream", addr))
        .await
        .unwrap();

    let mut decoder = SseDecoder::new();
    let mut events = Vec::new();
    while events.len() < 3 {
        let chunk = response.chunk().await.unwrap().expect("heartbeat is unbounded");
        events.extend(decoder.feed(&chunk));
    }
    assert_eq!(registry.active_sessions(), 1);
    assert_eq!(events[0].json_data().unwrap()["sequence"], 1);

    drop(response);
    wait_for_no_sessions(&registry).await;
}

#[tokio::test]
async fn test_session_limit_returns_503() {
    let mut config = fast_config();
    config.server.max_sessions = 1;
    let (addr, registry) = spawn_server(config).await;

    let first = reqwest::get(format!("http://{}/stream", addr))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = reqwest::get(format!("http://{}/stream", addr))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["error"], "Session limit reached");

    drop(first);
    wait_for_no_sessions(&registry).await;

    // Capacity is released with the session task, shortly after the guard
    let mut retried = None;
    for _ in 0..50 {
        let response = reqwest::get(format!("http://{}/stream/progress/retry?steps=1", addr))
            .await
            .unwrap();
        if response.status() == StatusCode::OK {
            retried = Some(response);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let events = SseDecoder::decode_all(&retried.unwrap().bytes().await.unwrap());
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let (addr, registry) = spawn_server(fast_config()).await;

    let mut response = reqwest::get(format!("http://{}/stream", addr))
        .await
        .unwrap();
    response.chunk().await.unwrap().expect("first heartbeat");

    registry.shutdown();

    let drain = async {
        while let Some(_chunk) = response.chunk().await.unwrap() {}
    };
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("body should end after shutdown");
    wait_for_no_sessions(&registry).await;

    let rejected = reqwest::get(format!("http://{}/stream", addr))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_idle_stream_gets_keepalive() {
    let mut config = fast_config();
    config.producers.heartbeat_interval_ms = 60_000;
    config.server.keepalive_interval_secs = 1;
    let (addr, _registry) = spawn_server(config).await;

    let mut response = reqwest::get(format!("http://{}/stream", addr))
        .await
        .unwrap();

    let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("keepalive within the interval")
        .unwrap()
        .unwrap();
    assert_eq!(&chunk[..], b": keepalive\n\n");
    assert!(SseDecoder::decode_all(&chunk).is_empty());
}
