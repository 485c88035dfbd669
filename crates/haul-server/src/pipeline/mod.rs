//! Ordered HTTP request pipeline.
//!
//! Every non-upgrade request walks the handlers in order until one of them
//! answers. Handlers are grouped in stages; a pipeline whose handlers are out
//! of stage order is rejected when it is built.

mod bundle;
mod fallback;
mod raw_body;
mod static_files;
mod status;

pub use bundle::BundleHandler;
pub use fallback::FallbackHandler;
pub use raw_body::{BodyCapture, RawBody};
pub use static_files::StaticAssets;
pub use status::StatusHandler;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use haul_core::ConfigurationError;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

const BUNDLE_EXTENSIONS: [&str; 3] = [".bundle", ".js", ".map"];

/// Whether a request path names something the compiler may produce.
pub(crate) fn is_bundle_path(path: &str) -> bool {
    BUNDLE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Position of a handler in the pipeline. Earlier stages run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    StaticAssets,
    BodyCapture,
    Status,
    Bundle,
    Fallback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::StaticAssets => "static-assets",
            Stage::BodyCapture => "body-capture",
            Stage::Status => "status",
            Stage::Bundle => "bundle",
            Stage::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// Result of offering a request to a handler.
pub enum Outcome {
    /// The handler answered.
    Handled(Response),
    /// The handler passed; the request continues down the pipeline.
    Next(Request),
}

/// One step of the pipeline.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handler name used in diagnostics.
    fn name(&self) -> &str;

    /// Stage the handler belongs to.
    fn stage(&self) -> Stage;

    /// Answer the request or hand it on.
    async fn handle(&self, request: Request) -> Outcome;
}

/// Collects handlers in the order they should run.
#[derive(Default)]
pub struct PipelineBuilder {
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    #[must_use]
    pub fn with(mut self, handler: impl RequestHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Check the stage order and freeze the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::PipelineOrder`] if a handler runs before
    /// a handler of an earlier stage, or if anything follows a fallback.
    pub fn build(self) -> Result<Pipeline, ConfigurationError> {
        for pair in self.handlers.windows(2) {
            let (previous, handler) = (&pair[0], &pair[1]);
            if handler.stage() < previous.stage() || previous.stage() == Stage::Fallback {
                return Err(ConfigurationError::PipelineOrder {
                    handler: handler.name().to_string(),
                    stage: handler.stage().to_string(),
                    previous: format!("{} ({})", previous.name(), previous.stage()),
                });
            }
        }

        Ok(Pipeline {
            handlers: self.handlers.into(),
        })
    }
}

/// An immutable, ordered chain of request handlers.
#[derive(Clone)]
pub struct Pipeline {
    handlers: Arc<[Arc<dyn RequestHandler>]>,
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Run a request through the handlers.
    ///
    /// A request nobody answers gets a plain `404`.
    pub async fn dispatch(&self, mut request: Request) -> Response {
        for handler in self.handlers.iter() {
            match handler.handle(request).await {
                Outcome::Handled(response) => {
                    trace!(handler = handler.name(), status = %response.status(), "Request handled");
                    return response;
                }
                Outcome::Next(next) => request = next,
            }
        }
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    }

    /// Handler names in execution order.
    #[must_use]
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}
