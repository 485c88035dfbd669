//! Developer service endpoints: build status, change polling, systrace dumps.

use super::{Outcome, RawBody, RequestHandler, Stage};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use haul_core::BuildStateTracker;
use haul_protocol::StatusReport;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// Answers `GET /status`, `GET /onchange` and `POST /systrace`.
pub struct StatusHandler {
    tracker: Arc<BuildStateTracker>,
    systrace_dir: PathBuf,
}

impl StatusHandler {
    #[must_use]
    pub fn new(tracker: Arc<BuildStateTracker>, systrace_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracker,
            systrace_dir: systrace_dir.into(),
        }
    }

    fn status(&self) -> Response {
        Json(StatusReport {
            status: self.tracker.status(),
        })
        .into_response()
    }

    async fn on_change(&self) -> Response {
        match self.tracker.next_completion().await {
            Some(stats) => {
                debug!(hash = %stats.hash, "Change poll released");
                StatusCode::RESET_CONTENT.into_response()
            }
            None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        }
    }

    async fn systrace(&self, body: &RawBody) -> Response {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = self.systrace_dir.join(format!("dump_{millis}.json"));

        match tokio::fs::write(&path, body.as_bytes()).await {
            Ok(()) => {
                info!(path = %path.display(), len = body.0.len(), "Systrace dump written");
                (
                    StatusCode::OK,
                    format!(
                        "Systrace dump written to {}. Open it in chrome://tracing.",
                        path.display()
                    ),
                )
                    .into_response()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write systrace dump");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "SystraceWriteFailed",
                        "message": e.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[async_trait]
impl RequestHandler for StatusHandler {
    fn name(&self) -> &str {
        "status"
    }

    fn stage(&self) -> Stage {
        Stage::Status
    }

    async fn handle(&self, request: Request) -> Outcome {
        let method = request.method().clone();
        let response = match (&method, request.uri().path()) {
            (&Method::GET, "/status") => self.status(),
            (&Method::GET, "/onchange") => self.on_change().await,
            (&Method::POST, "/systrace") => {
                let body = request
                    .extensions()
                    .get::<RawBody>()
                    .cloned()
                    .unwrap_or_default();
                self.systrace(&body).await
            }
            _ => return Outcome::Next(request),
        };
        Outcome::Handled(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use bytes::Bytes;
    use haul_core::BuildStats;

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn answer(handler: &StatusHandler, request: Request) -> Response {
        match handler.handle(request).await {
            Outcome::Handled(response) => response,
            Outcome::Next(_) => panic!("Expected the status handler to answer"),
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_follows_tracker() {
        let tracker = Arc::new(BuildStateTracker::new());
        let handler = StatusHandler::new(tracker.clone(), std::env::temp_dir());

        let body = json_body(answer(&handler, get("/status")).await).await;
        assert_eq!(body, json!({ "status": "Compiling" }));

        tracker.on_done(BuildStats::new("a").with_warning("w"));
        let body = json_body(answer(&handler, get("/status")).await).await;
        assert_eq!(body, json!({ "status": "SuccessWithWarnings" }));
    }

    #[tokio::test]
    async fn test_onchange_waits_for_next_build() {
        let tracker = Arc::new(BuildStateTracker::new());
        tracker.on_done(BuildStats::new("a"));
        let handler = Arc::new(StatusHandler::new(tracker.clone(), std::env::temp_dir()));

        let poll = {
            let handler = handler.clone();
            tokio::spawn(async move { answer(&handler, get("/onchange")).await })
        };

        while tracker.pending_waiters() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!poll.is_finished());

        tracker.on_done(BuildStats::new("b"));
        assert_eq!(poll.await.unwrap().status(), StatusCode::RESET_CONTENT);
    }

    #[tokio::test]
    async fn test_systrace_writes_captured_body() {
        let dir = tempfile::tempdir().unwrap();
        let handler = StatusHandler::new(Arc::new(BuildStateTracker::new()), dir.path());

        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/systrace")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(RawBody(Bytes::from_static(b"[{\"ph\":\"X\"}]")));

        let response = answer(&handler, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let dumps: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(dumps.len(), 1);
        let dump = dumps[0].as_ref().unwrap().path();
        assert!(dump.file_name().unwrap().to_str().unwrap().starts_with("dump_"));
        assert_eq!(std::fs::read(dump).unwrap(), b"[{\"ph\":\"X\"}]");
    }

    #[tokio::test]
    async fn test_other_paths_pass_through() {
        let handler = StatusHandler::new(Arc::new(BuildStateTracker::new()), std::env::temp_dir());
        assert!(matches!(
            handler.handle(get("/index.bundle")).await,
            Outcome::Next(_)
        ));
    }
}
