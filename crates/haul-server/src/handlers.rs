//! Request and connection handlers for the Haul server.
//!
//! WebSocket upgrades are routed to realtime channels by path; everything
//! else runs through the request pipeline.

use crate::compiler;
use crate::config::Config;
use crate::metrics::{self, MeteredConnection, MetricsReporter, NotificationMetrics};
use crate::pipeline::{
    BodyCapture, BundleHandler, FallbackHandler, Pipeline, StaticAssets, StatusHandler,
};
use crate::reporter::ConsoleReporter;
use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self as axum_middleware, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use haul_core::{
    BuildStateTracker, ChannelMux, ConfigurationError, DebuggerRelay, LiveUpdateChannel,
    UpgradeParams,
};
use haul_protocol::ProtocolError;
use haul_transport::WebSocketConnection;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capacity of the compiler event queue.
const COMPILER_EVENT_CAPACITY: usize = 64;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Upgrade path to channel routing table.
    pub mux: Arc<ChannelMux>,
    /// Handlers for plain HTTP requests.
    pub pipeline: Pipeline,
    /// Build state shared with the handlers.
    pub tracker: Arc<BuildStateTracker>,
    /// Largest accepted inbound WebSocket message.
    pub max_message_size: usize,
}

impl AppState {
    /// Wire channels and handlers to the tracker.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if channel paths collide or are
    /// invalid.
    pub fn new(config: &Config, tracker: Arc<BuildStateTracker>) -> Result<Self, ConfigurationError> {
        let notifications = NotificationMetrics::new();
        let native_hot =
            Arc::new(LiveUpdateChannel::new("native-hot").with_observer(notifications.clone()));
        let haul_hmr = Arc::new(LiveUpdateChannel::new("haul-hmr").with_observer(notifications));
        let relay = Arc::new(DebuggerRelay::new("debugger-proxy"));

        let mut mux = ChannelMux::builder();
        mux.register(&config.channels.debugger, relay)?
            .register(&config.channels.native_hot, native_hot.clone())?
            .register(&config.channels.haul_hmr, haul_hmr.clone())?;

        tracker.add_listener(native_hot);
        tracker.add_listener(haul_hmr);
        tracker.add_listener(ConsoleReporter::new());
        tracker.add_listener(MetricsReporter::new());

        let pipeline = Pipeline::builder()
            .with(StaticAssets::new(&config.public_root))
            .with(BodyCapture::new(config.limits.max_body_size))
            .with(StatusHandler::new(tracker.clone(), &config.systrace_dir))
            .with(BundleHandler::new(tracker.clone(), config.lazy))
            .with(FallbackHandler::new(tracker.clone()))
            .build()?;
        debug!(handlers = ?pipeline.handler_names(), "Request pipeline ready");

        Ok(Self {
            mux: Arc::new(mux.build()),
            pipeline,
            tracker,
            max_message_size: config.limits.max_message_size,
        })
    }
}

/// Build the HTTP application.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if the channels or pipeline are
/// misconfigured.
pub fn build_app(config: &Config, tracker: Arc<BuildStateTracker>) -> Result<Router, ConfigurationError> {
    let state = AppState::new(config, tracker)?;

    Ok(Router::new()
        .fallback(pipeline_handler)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            upgrade_dispatch,
        ))
        .with_state(state))
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let tracker = Arc::new(BuildStateTracker::new());
    let app = build_app(&config, tracker.clone()).context("Invalid server configuration")?;

    let (events_tx, events_rx) = mpsc::channel(COMPILER_EVENT_CAPACITY);
    compiler::spawn_stdin(events_tx);
    tokio::spawn(async move { tracker.run(events_rx).await });

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Haul server listening on http://{}", addr);
    info!(
        debugger = %config.channels.debugger,
        native_hot = %config.channels.native_hot,
        haul_hmr = %config.channels.haul_hmr,
        lazy = config.lazy,
        "Realtime channels ready"
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Every request that is not an upgrade.
async fn pipeline_handler(State(state): State<AppState>, request: Request) -> Response {
    state.pipeline.dispatch(request).await
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

fn upgrade_rejection(error: &ProtocolError) -> Response {
    let (status, kind) = match error {
        ProtocolError::UnknownChannel(_) => (StatusCode::NOT_FOUND, "UnknownChannel"),
        ProtocolError::DebuggerAlreadyAttached => (StatusCode::CONFLICT, "DebuggerAlreadyAttached"),
        ProtocolError::InvalidRole(_) => (StatusCode::BAD_REQUEST, "InvalidRole"),
        ProtocolError::Malformed(_) | ProtocolError::Encode(_) => {
            (StatusCode::BAD_REQUEST, "BadRequest")
        }
    };
    (
        status,
        Json(json!({ "error": kind, "message": error.to_string() })),
    )
        .into_response()
}

/// Route WebSocket upgrades to their channel before the pipeline runs.
async fn upgrade_dispatch(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let query = match Query::<HashMap<String, String>>::try_from_uri(request.uri()) {
        Ok(Query(query)) => query,
        Err(rejection) => return rejection.into_response(),
    };
    let params = UpgradeParams::new(query);

    let handler = match state.mux.admit(&path, &params) {
        Ok(handler) => handler,
        Err(e) => {
            warn!(channel = %path, error = %e, "Upgrade rejected");
            return upgrade_rejection(&e);
        }
    };

    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let channel = handler.name().to_string();
    let max_message_size = state.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let connection = WebSocketConnection::new(socket, max_message_size);
            let connection = MeteredConnection::new(Box::new(connection), channel);
            if let Err(e) = state.mux.dispatch(&path, Box::new(connection), params).await {
                warn!(channel = %path, error = %e, "Upgraded connection had no channel");
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_channel_paths_fail_startup() {
        let mut config = Config::default();
        config.channels.haul_hmr = config.channels.native_hot.clone();

        assert!(matches!(
            AppState::new(&config, Arc::new(BuildStateTracker::new())),
            Err(ConfigurationError::DuplicateChannel(path)) if path == "/hot"
        ));
    }

    #[test]
    fn test_invalid_channel_path_fails_startup() {
        let mut config = Config::default();
        config.channels.debugger = "debugger".to_string();

        assert!(matches!(
            AppState::new(&config, Arc::new(BuildStateTracker::new())),
            Err(ConfigurationError::InvalidChannelPath { .. })
        ));
    }

    #[test]
    fn test_default_state_routes_all_channels() {
        let state = AppState::new(&Config::default(), Arc::new(BuildStateTracker::new())).unwrap();
        assert_eq!(state.mux.paths(), vec!["/debugger-proxy", "/haul-hmr", "/hot"]);
        assert_eq!(
            state.pipeline.handler_names(),
            vec!["static-assets", "body-capture", "status", "bundle", "fallback"]
        );
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, "WebSocket".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));
    }

    #[test]
    fn test_rejection_statuses() {
        assert_eq!(
            upgrade_rejection(&ProtocolError::UnknownChannel("/x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            upgrade_rejection(&ProtocolError::DebuggerAlreadyAttached).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            upgrade_rejection(&ProtocolError::InvalidRole("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
