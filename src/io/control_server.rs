//! Control HTTP endpoint
//!
//! - `POST /scan`    request a scan window (badge reader / door controller)
//! - `GET  /status`  current scan state and the last verdict
//! - `GET  /events`  stored events, newest first
//! - `GET  /clips/<name>` a stored clip file
//! - `GET  /metrics` Prometheus text format
//! - `GET  /health`  liveness

use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::status::{ScanStatusBoard, StatusSnapshot};
use crate::services::trigger::TriggerSlot;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// State shared by every request
pub struct ControlContext {
    pub trigger: TriggerSlot,
    pub status: Arc<ScanStatusBoard>,
    pub metrics: Arc<Metrics>,
    pub camera_id: String,
    /// JSONL event log read back by `/events`
    pub events_file: PathBuf,
    /// Directory `/clips/<name>` serves from
    pub clip_dir: PathBuf,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    camera_id: &'a str,
    trigger_pending: bool,
    #[serde(flatten)]
    board: StatusSnapshot,
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Events from the JSONL log, newest first; unparseable lines are skipped
async fn read_events(path: &Path) -> std::io::Result<Vec<serde_json::Value>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(content.lines().rev().filter_map(|line| serde_json::from_str(line).ok()).collect())
}

/// A bare file name inside the clip directory, or `None`
///
/// Separators and leading dots are refused, so a request can never leave
/// the directory.
fn clip_file_name(name: &str) -> Option<&str> {
    let plain = !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\']);
    plain.then_some(name)
}

fn clip_content_type(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

async fn serve_clip(ctx: &ControlContext, name: &str) -> Response<Full<Bytes>> {
    let Some(name) = clip_file_name(name) else {
        warn!(name = %name, "clip_request_rejected");
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    };
    match tokio::fs::read(ctx.clip_dir.join(name)).await {
        Ok(data) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", clip_content_type(name))
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(data)))
            .expect("static response should not fail"),
        Err(e) if e.kind() == ErrorKind::NotFound => text_response(StatusCode::NOT_FOUND, "Not Found"),
        Err(e) => {
            error!(clip = %name, error = %e, "clip_read_failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "clip unavailable")
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<ControlContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/scan") => {
            let fresh = ctx.trigger.fire();
            ctx.metrics.record_trigger_received(!fresh);
            info!(camera_id = %ctx.camera_id, coalesced = %!fresh, "scan_trigger_received");
            Ok(json_response(StatusCode::OK, r#"{"status":"scan received"}"#.to_string()))
        }
        // CORS preflight for browser dashboards
        (&Method::OPTIONS, "/scan") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail")),
        (&Method::GET, "/status") => {
            let body = StatusBody {
                camera_id: &ctx.camera_id,
                trigger_pending: ctx.trigger.is_pending(),
                board: ctx.status.snapshot(),
            };
            let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
            Ok(json_response(StatusCode::OK, json))
        }
        (&Method::GET, "/events") => match read_events(&ctx.events_file).await {
            Ok(events) => {
                let json = serde_json::to_string(&events).unwrap_or_else(|_| "[]".to_string());
                Ok(json_response(StatusCode::OK, json))
            }
            Err(e) => {
                error!(file = %ctx.events_file.display(), error = %e, "event_log_read_failed");
                Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "event log unavailable"))
            }
        },
        (&Method::GET, path) if path.starts_with("/clips/") => {
            Ok(serve_clip(&ctx, &path["/clips/".len()..]).await)
        }
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&ctx.metrics, &ctx.camera_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => {
            debug!(method = %req.method(), path = %req.uri().path(), "control_not_found");
            Ok(text_response(StatusCode::NOT_FOUND, "Not Found"))
        }
    }
}

/// Bind and serve the control endpoint until shutdown
pub async fn start_control_server(
    bind_address: &str,
    port: u16,
    ctx: Arc<ControlContext>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_control(listener, ctx, shutdown).await
}

/// Serve the control endpoint on an already-bound listener
pub async fn serve_control(
    listener: TcpListener,
    ctx: Arc<ControlContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(addr = %listener.local_addr()?, camera_id = %ctx.camera_id, "control_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "control_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("control_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scan::{ScanResult, ScanStatus};
    use tempfile::TempDir;

    struct TestServer {
        base: String,
        ctx: Arc<ControlContext>,
        _shutdown: watch::Sender<bool>,
        dir: TempDir,
    }

    fn test_context(dir: &TempDir) -> Arc<ControlContext> {
        Arc::new(ControlContext {
            trigger: TriggerSlot::new(),
            status: Arc::new(ScanStatusBoard::new()),
            metrics: Arc::new(Metrics::new()),
            camera_id: "CAM_01".to_string(),
            events_file: dir.path().join("events.jsonl"),
            clip_dir: dir.path().join("clips"),
        })
    }

    async fn spawn_server() -> TestServer {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("clips")).unwrap();
        let ctx = test_context(&dir);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(serve_control(listener, ctx.clone(), shutdown_rx));
        TestServer { base, ctx, _shutdown: shutdown_tx, dir }
    }

    #[tokio::test]
    async fn test_post_scan_fires_trigger() {
        let server = spawn_server().await;
        let (base, ctx) = (&server.base, &server.ctx);
        let client = reqwest::Client::new();

        let resp = client.post(format!("{base}/scan")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "scan received");
        assert!(ctx.trigger.is_pending());

        // Second request before the loop consumes it is coalesced
        client.post(format!("{base}/scan")).send().await.unwrap();
        let summary = ctx.metrics.report();
        assert_eq!(summary.triggers_received, 2);
        assert_eq!(summary.triggers_coalesced, 1);
        assert!(ctx.trigger.take());
        assert!(!ctx.trigger.take());
    }

    #[tokio::test]
    async fn test_status_reports_last_result() {
        let server = spawn_server().await;
        let (base, ctx) = (&server.base, &server.ctx);
        ctx.status.scan_closed(&ScanResult {
            timestamp_ms: 1_736_012_345_678,
            status: ScanStatus::Unauthorized,
            clip_reference: Some("event_20250104_174545".to_string()),
            camera_id: "CAM_01".to_string(),
            started_at_ms: 1_736_012_342_578,
            primary_id: None,
            flagged_at_ms: None,
        });

        let body: serde_json::Value =
            reqwest::get(format!("{base}/status")).await.unwrap().json().await.unwrap();
        assert_eq!(body["camera_id"], "CAM_01");
        assert_eq!(body["scanning"], false);
        assert_eq!(body["trigger_pending"], false);
        assert_eq!(body["last_result"]["status"], "UNAUTHORIZED");
        assert_eq!(body["last_result"]["clip_key"], "event_20250104_174545");
        assert!(body["last_result"].get("clip_reference").is_none());
    }

    #[tokio::test]
    async fn test_health_metrics_and_not_found() {
        let server = spawn_server().await;
        let base = &server.base;

        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let metrics = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
        assert!(metrics.contains("entry_guard_frames_total{camera=\"CAM_01\"}"));

        let missing = reqwest::get(format!("{base}/nope")).await.unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        let get_scan = reqwest::get(format!("{base}/scan")).await.unwrap();
        assert_eq!(get_scan.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_events_listed_newest_first() {
        let server = spawn_server().await;
        let empty: serde_json::Value =
            reqwest::get(format!("{}/events", server.base)).await.unwrap().json().await.unwrap();
        assert_eq!(empty, serde_json::json!([]));

        std::fs::write(
            &server.ctx.events_file,
            concat!(
                r#"{"eid":"a","status":"VERIFIED"}"#,
                "\n",
                "not json\n",
                r#"{"eid":"b","status":"UNAUTHORIZED"}"#,
                "\n",
            ),
        )
        .unwrap();

        let resp = reqwest::get(format!("{}/events", server.base)).await.unwrap();
        assert_eq!(resp.headers()["content-type"], "application/json");
        let events: Vec<serde_json::Value> = resp.json().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["eid"], "b");
        assert_eq!(events[1]["eid"], "a");
    }

    #[tokio::test]
    async fn test_clip_served_from_clip_dir() {
        let server = spawn_server().await;
        std::fs::write(server.ctx.clip_dir.join("event_20250104_174545.mp4"), b"ftypmp42").unwrap();
        std::fs::write(server.ctx.clip_dir.join("event_20250104_174600.raw"), [1u8, 2, 3]).unwrap();

        let resp = reqwest::get(format!("{}/clips/event_20250104_174545.mp4", server.base))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.headers()["content-type"], "video/mp4");
        assert_eq!(&resp.bytes().await.unwrap()[..], b"ftypmp42");

        let raw = reqwest::get(format!("{}/clips/event_20250104_174600.raw", server.base))
            .await
            .unwrap();
        assert_eq!(raw.headers()["content-type"], "application/octet-stream");

        let missing = reqwest::get(format!("{}/clips/event_19990101_000000.mp4", server.base))
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_clip_request_cannot_leave_clip_dir() {
        let server = spawn_server().await;
        std::fs::write(server.dir.path().join("secret.txt"), b"keep out").unwrap();

        for path in ["/clips/..%2Fsecret.txt", "/clips/%2E%2E%2Fsecret.txt", "/clips/"] {
            let resp = reqwest::get(format!("{}{path}", server.base)).await.unwrap();
            assert_eq!(resp.status().as_u16(), 404, "{path}");
        }
    }

    #[test]
    fn test_clip_file_name() {
        assert_eq!(clip_file_name("event_20250104_174545.mp4"), Some("event_20250104_174545.mp4"));
        assert_eq!(clip_file_name(""), None);
        assert_eq!(clip_file_name(".."), None);
        assert_eq!(clip_file_name(".hidden"), None);
        assert_eq!(clip_file_name("../secret.txt"), None);
        assert_eq!(clip_file_name("sub/clip.mp4"), None);
        assert_eq!(clip_file_name("..\\secret.txt"), None);
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve_control(listener, ctx, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        assert!(server.await.unwrap().is_ok());
    }
}
