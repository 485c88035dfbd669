//! Last handler: explains why a bundle could not be served.

use super::{is_bundle_path, Outcome, RequestHandler, Stage};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use haul_core::BuildStateTracker;
use haul_protocol::BuildStatus;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Answers every request that reached the end of the pipeline.
pub struct FallbackHandler {
    tracker: Arc<BuildStateTracker>,
}

impl FallbackHandler {
    #[must_use]
    pub fn new(tracker: Arc<BuildStateTracker>) -> Self {
        Self { tracker }
    }

    fn bundle_error(&self, path: &str) -> Response {
        let status = self.tracker.status();
        let latest = match self.tracker.latest() {
            Some(stats) if !status.is_compiling() => stats,
            _ => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({
                        "error": "BundleNotReady",
                        "message": format!("{path} is not ready yet, a build is in progress"),
                    })),
                )
                    .into_response()
            }
        };

        match (status, latest) {
            (BuildStatus::Failed, stats) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "BuildFailed",
                    "message": format!("Build {} failed", stats.hash),
                    "errors": stats.errors,
                })),
            )
                .into_response(),
            (_, stats) => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "BundleNotFound",
                    "message": format!("{path} is not part of build {}", stats.hash),
                    "available": stats.artifact_paths(),
                })),
            )
                .into_response(),
        }
    }
}

#[async_trait]
impl RequestHandler for FallbackHandler {
    fn name(&self) -> &str {
        "fallback"
    }

    fn stage(&self) -> Stage {
        Stage::Fallback
    }

    async fn handle(&self, request: Request) -> Outcome {
        let path = request.uri().path();
        let response = if is_bundle_path(path) {
            self.bundle_error(path)
        } else {
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        };
        debug!(path, status = %response.status(), "Fallback response");
        Outcome::Handled(response)
    }
}
