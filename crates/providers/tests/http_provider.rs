use std::sync::Arc;

use relay_providers::{HttpProvider, HttpProviderConfig};
use relay_types::{ConnectionState, Contract, MetaRegistration, Provider, ResolvedCall};
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

/// Request line, headers and body captured by the test server.
#[derive(Debug)]
struct Captured {
    head: String,
    body: String,
}

/// Serve `responses` in order, one connection each, reporting what was received.
async fn serve(responses: Vec<(u16, &'static str)>) -> (String, mpsc::UnboundedReceiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (sender, receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 1024];
            let head_end = loop {
                let read = socket.read(&mut chunk).await.unwrap();
                buffer.extend_from_slice(&chunk[..read]);
                if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
                    break position + 4;
                }
            };
            let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            while buffer.len() < head_end + content_length {
                let read = socket.read(&mut chunk).await.unwrap();
                buffer.extend_from_slice(&chunk[..read]);
            }
            let request_body = String::from_utf8_lossy(&buffer[head_end..head_end + content_length]).to_string();
            sender.send(Captured { head, body: request_body }).unwrap();

            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });

    (base_url, receiver)
}

fn call(contract: Contract) -> ResolvedCall {
    ResolvedCall::new(Arc::new(MetaRegistration::new(contract.path.clone(), contract.clone())), contract)
}

#[tokio::test]
async fn posts_payload_and_returns_body_with_status() {
    let (base_url, mut captured) = serve(vec![(200, r#"{"name":"x"}"#)]).await;
    let mut config = HttpProviderConfig::new(base_url);
    config.headers.insert("x-client".into(), "relay".into());
    let provider = HttpProvider::new("rest", config).unwrap();

    let contract = Contract::new("GetProfile", "profile/get")
        .with_payload(json!({"id": 42}))
        .with_header("authorization", "Bearer token");
    let result = provider.execute(&call(contract), &CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.status_code, 200);
    assert_eq!(result.data.as_text(), Some(r#"{"name":"x"}"#));

    let request = captured.recv().await.unwrap();
    assert!(request.head.starts_with("POST /profile/get HTTP/1.1"));
    let head = request.head.to_ascii_lowercase();
    assert!(head.contains("authorization: bearer token"));
    assert!(head.contains("x-client: relay"));
    assert_eq!(serde_json::from_str::<serde_json::Value>(&request.body).unwrap(), json!({"id": 42}));
}

#[tokio::test]
async fn null_payload_is_sent_as_get() {
    let (base_url, mut captured) = serve(vec![(200, "pong")]).await;
    let provider = HttpProvider::new("rest", HttpProviderConfig::new(base_url)).unwrap();

    let result = provider
        .execute(&call(Contract::new("Ping", "ping")), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.data.as_text(), Some("pong"));
    assert!(captured.recv().await.unwrap().head.starts_with("GET /ping HTTP/1.1"));
}

#[tokio::test]
async fn error_status_becomes_failed_result() {
    let (base_url, _captured) = serve(vec![(503, "maintenance")]).await;
    let provider = HttpProvider::new("rest", HttpProviderConfig::new(base_url)).unwrap();

    let result = provider
        .execute(&call(Contract::new("Ping", "ping")), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.status_code, 503);
    assert_eq!(result.error.as_deref(), Some("maintenance"));
}

#[tokio::test]
async fn health_probe_gates_connection() {
    let (base_url, mut captured) = serve(vec![(200, "ok"), (500, "")]).await;
    let mut config = HttpProviderConfig::new(base_url);
    config.health_path = Some("health".into());
    let provider = HttpProvider::new("rest", config).unwrap();

    assert!(provider.connect(&CancellationToken::new()).await.success);
    assert_eq!(provider.state(), ConnectionState::Connected);
    assert!(captured.recv().await.unwrap().head.starts_with("GET /health HTTP/1.1"));

    let outcome = provider.connect(&CancellationToken::new()).await;
    assert!(!outcome.success);
    assert_eq!(provider.state(), ConnectionState::Faulted);
}
