//! Compiled bundle serving.

use super::{is_bundle_path, Outcome, RequestHandler, Stage};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use haul_core::{Artifact, BuildStateTracker, BuildStats};
use std::sync::Arc;
use tracing::debug;

/// Serves artifacts of the latest completed build.
///
/// In lazy mode a bundle request that arrives while a build is in flight is
/// held until that build finishes and is answered from its artifacts. Other
/// paths never wait.
pub struct BundleHandler {
    tracker: Arc<BuildStateTracker>,
    lazy: bool,
}

impl BundleHandler {
    #[must_use]
    pub fn new(tracker: Arc<BuildStateTracker>, lazy: bool) -> Self {
        Self { tracker, lazy }
    }

    async fn stats(&self, path: &str) -> Option<Arc<BuildStats>> {
        if self.lazy && is_bundle_path(path) {
            self.tracker.settled().await
        } else {
            self.tracker.latest()
        }
    }
}

fn respond(artifact: &Artifact, head: bool) -> Response {
    let body = if head {
        Body::empty()
    } else {
        Body::from(artifact.content.clone())
    };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.content_type.clone()),
            (header::CONTENT_LENGTH, artifact.content.len().to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

#[async_trait]
impl RequestHandler for BundleHandler {
    fn name(&self) -> &str {
        "bundle"
    }

    fn stage(&self) -> Stage {
        Stage::Bundle
    }

    async fn handle(&self, request: Request) -> Outcome {
        let head = match *request.method() {
            Method::GET => false,
            Method::HEAD => true,
            _ => return Outcome::Next(request),
        };

        let path = request.uri().path();
        let Some(stats) = self.stats(path).await else {
            return Outcome::Next(request);
        };

        match stats.artifact(path) {
            Some(artifact) => {
                debug!(path, hash = %stats.hash, len = artifact.content.len(), "Serving bundle");
                Outcome::Handled(respond(artifact, head))
            }
            None => Outcome::Next(request),
        }
    }
}
