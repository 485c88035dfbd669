//! Request body capture.

use super::{Outcome, RequestHandler, Stage};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

/// The complete request body, stored as a request extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBody(pub Bytes);

impl RawBody {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Error)]
enum CaptureError {
    #[error("Request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    Read(#[source] axum::Error),
}

/// Message of the error `to_bytes` reports once the limit is crossed.
const LENGTH_LIMIT_EXCEEDED: &str = "length limit exceeded";

impl CaptureError {
    fn from_read(error: axum::Error, limit: usize) -> Self {
        if error.to_string() == LENGTH_LIMIT_EXCEEDED {
            CaptureError::TooLarge { limit }
        } else {
            CaptureError::Read(error)
        }
    }
}

/// Reads the whole body so later handlers can inspect it, then puts it back.
pub struct BodyCapture {
    limit: usize,
}

impl BodyCapture {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    async fn read(&self, body: Body) -> Result<Bytes, CaptureError> {
        axum::body::to_bytes(body, self.limit)
            .await
            .map_err(|e| CaptureError::from_read(e, self.limit))
    }

    fn declared_length(request: &Request) -> Option<usize> {
        request
            .headers()
            .get(header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }
}

#[async_trait]
impl RequestHandler for BodyCapture {
    fn name(&self) -> &str {
        "body-capture"
    }

    fn stage(&self) -> Stage {
        Stage::BodyCapture
    }

    async fn handle(&self, request: Request) -> Outcome {
        if Self::declared_length(&request).is_some_and(|len| len > self.limit) {
            return Outcome::Handled(rejection(CaptureError::TooLarge { limit: self.limit }));
        }

        let (parts, body) = request.into_parts();
        match self.read(body).await {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    debug!(path = %parts.uri.path(), len = bytes.len(), "Captured request body");
                }
                let mut request = Request::from_parts(parts, Body::from(bytes.clone()));
                request.extensions_mut().insert(RawBody(bytes));
                Outcome::Next(request)
            }
            Err(e) => {
                warn!(path = %parts.uri.path(), error = %e, "Rejecting request body");
                Outcome::Handled(rejection(e))
            }
        }
    }
}

fn rejection(error: CaptureError) -> axum::response::Response {
    let status = match error {
        CaptureError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        CaptureError::Read(_) => StatusCode::BAD_REQUEST,
    };
    let kind = match error {
        CaptureError::TooLarge { .. } => "PayloadTooLarge",
        CaptureError::Read(_) => "BadRequest",
    };
    (
        status,
        Json(json!({ "error": kind, "message": error.to_string() })),
    )
        .into_response()
}
