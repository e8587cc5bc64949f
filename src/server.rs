//! Minimal HTTP/1.1 front end: `/` answers with a banner, `/metrics` runs a
//! scrape and returns the text exposition.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::bridge::MetricBridge;
use crate::error::Result;
use crate::exposition;

/// Upper bound on request head size; anything larger is rejected.
pub const MAX_REQUEST_BYTES: usize = 8192;

pub const BANNER: &str =
    "You have reached studio-exporter. Please leave a message after the beep.\nMetrics are served at /metrics.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    Metrics,
    NotFound,
    MethodNotAllowed,
    BadRequest,
}

/// Classify a request head. `None` while the head is still incomplete.
pub fn route(buf: &[u8]) -> Option<Route> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return None,
        Err(_) => return Some(Route::BadRequest),
    }

    let method = req.method.unwrap_or_default();
    let target = req.path.unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target);

    Some(match (method, path) {
        ("GET", "/") => Route::Index,
        ("GET", "/metrics") => Route::Metrics,
        (_, "/" | "/metrics") => Route::MethodNotAllowed,
        _ => Route::NotFound,
    })
}

struct Response {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    body: String,
}

impl Response {
    fn text(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason,
            self.content_type,
            self.body.len(),
            self.body,
        )
        .into_bytes()
    }
}

async fn respond(route: Route, bridge: &Arc<MetricBridge>) -> Response {
    match route {
        Route::Index => Response::text(200, "OK", BANNER),
        Route::Metrics => {
            let bridge = Arc::clone(bridge);
            let samples = match tokio::task::spawn_blocking(move || bridge.scrape()).await {
                Ok(samples) => samples,
                Err(e) => {
                    error!(error = %e, "scrape task failed");
                    return Response::text(500, "Internal Server Error", "scrape failed\n");
                }
            };
            match exposition::encode(&samples) {
                Ok(body) => Response {
                    status: 200,
                    reason: "OK",
                    content_type: exposition::CONTENT_TYPE,
                    body,
                },
                Err(e) => {
                    error!(error = %e, "failed to encode scrape");
                    Response::text(500, "Internal Server Error", "encoding failed\n")
                }
            }
        }
        Route::NotFound => Response::text(404, "Not Found", "not found\n"),
        Route::MethodNotAllowed => Response::text(405, "Method Not Allowed", "method not allowed\n"),
        Route::BadRequest => Response::text(400, "Bad Request", "bad request\n"),
    }
}

/// Serve one request on `stream`, then close it.
pub async fn handle_connection<S>(mut stream: S, bridge: Arc<MetricBridge>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let mut filled = 0;

    let matched = loop {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            // peer closed before sending a full request head
            return Ok(());
        }
        filled += n;
        match route(&buf[..filled]) {
            Some(r) => break r,
            None if filled < buf.len() => continue,
            None => break Route::BadRequest,
        }
    };

    debug!(route = ?matched, "request");
    let response = respond(matched, &bridge).await;
    stream.write_all(&response.into_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "metrics endpoint listening");
    Ok(listener)
}

/// Accept connections until `shutdown` resolves. Each connection runs on its
/// own task; connection errors are logged and never stop the loop.
pub async fn serve<F>(listener: TcpListener, bridge: Arc<MetricBridge>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("server stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, bridge).await {
                        debug!(%peer, error = %e, "connection error");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::sim::SimulatedEngine;
    use rstest::rstest;
    use tokio::io::duplex;

    #[rstest]
    #[case(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", Route::Index)]
    #[case(b"GET /metrics HTTP/1.1\r\n\r\n", Route::Metrics)]
    #[case(b"GET /metrics?x=1 HTTP/1.1\r\n\r\n", Route::Metrics)]
    #[case(b"POST /metrics HTTP/1.1\r\n\r\n", Route::MethodNotAllowed)]
    #[case(b"GET /nope HTTP/1.1\r\n\r\n", Route::NotFound)]
    #[case(b"\x00\x01garbage\r\n\r\n", Route::BadRequest)]
    fn test_route(#[case] raw: &[u8], #[case] expected: Route) {
        assert_eq!(route(raw), Some(expected));
    }

    #[test]
    fn test_route_partial_is_none() {
        assert_eq!(route(b"GET /metrics HTTP/1.1\r\nHost:"), None);
    }

    fn bridge() -> Arc<MetricBridge> {
        Arc::new(MetricBridge::new(
            Arc::new(SimulatedEngine::new()),
            BridgeConfig::default(),
        ))
    }

    async fn roundtrip(request: &'static [u8]) -> String {
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(handle_connection(server, bridge()));
        client.write_all(request).await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        out
    }

    #[tokio::test]
    async fn test_index_banner() {
        let resp = roundtrip(b"GET / HTTP/1.1\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.ends_with(BANNER));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let resp = roundtrip(b"GET /metrics HTTP/1.1\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("Content-Type: text/plain; version=0.0.4"));
        assert!(resp.contains("# TYPE obs_global_frames_total counter"));
        assert!(resp.contains("obs_output_active{output_id=\"rtmp1\",output_name=\"simple_stream\"} 1"));
    }

    #[tokio::test]
    async fn test_unknown_path_404() {
        let resp = roundtrip(b"GET /favicon.ico HTTP/1.1\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }
}
