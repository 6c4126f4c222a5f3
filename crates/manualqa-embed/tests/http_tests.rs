use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use manualqa_core::error::Error;
use manualqa_core::traits::Embedder;
use manualqa_embed::{HttpEmbedder, ServiceClient};

/// Serve exactly one canned HTTP response and return the base URL.
async fn serve_once(status: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find_header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    });
    format!("http://{addr}/v1")
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn embedder(base_url: String) -> HttpEmbedder {
    let http = reqwest::Client::builder().no_proxy().timeout(Duration::from_secs(5)).build().unwrap();
    let client = ServiceClient::with_http(http, base_url, Some("test-key".into()));
    HttpEmbedder::new(client, "text-embedding-3-large", 4)
}

#[tokio::test]
async fn vectors_are_resized_and_normalized() {
    let url = serve_once("200 OK", r#"{"data":[{"index":0,"embedding":[3.0,4.0]}]}"#).await;
    let v = embedder(url).embed("oil").await.unwrap();
    assert_eq!(v.len(), 4);
    assert!((v[0] - 0.6).abs() < 1e-5);
    assert!((v[1] - 0.8).abs() < 1e-5);
    assert_eq!(v[3], 0.0);
}

#[tokio::test]
async fn too_many_requests_is_rate_limited() {
    let url = serve_once("429 Too Many Requests", r#"{"error":"slow down"}"#).await;
    let err = embedder(url).embed("oil").await.unwrap_err();
    assert!(matches!(err, Error::RateLimited(_)), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_service_errors() {
    let url = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
    let err = embedder(url).embed("oil").await.unwrap_err();
    assert!(matches!(err, Error::Service(_)), "got {err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn short_vector_count_is_rejected() {
    let url = serve_once("200 OK", r#"{"data":[]}"#).await;
    let err = embedder(url).embed("oil").await.unwrap_err();
    assert!(matches!(err, Error::Service(_)));
}
