//! Channel multiplexer.
//!
//! Upgrade requests share one listener; the multiplexer picks the channel by
//! exact path match and hands the upgraded connection to it. The routing
//! table is built once at startup and never changes afterwards.

use crate::error::ConfigurationError;
use async_trait::async_trait;
use haul_protocol::ProtocolError;
use haul_transport::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Query parameters of an upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeParams {
    query: HashMap<String, String>,
}

impl UpgradeParams {
    /// Wrap already decoded query parameters.
    #[must_use]
    pub fn new(query: HashMap<String, String>) -> Self {
        Self { query }
    }

    /// Build parameters from key/value pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            query: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get a query parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// A logical channel bound to one upgrade path.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Channel name used in diagnostics.
    fn name(&self) -> &str;

    /// Decide whether a connection may be upgraded at all.
    ///
    /// Called before the handshake completes, so a rejection becomes a plain
    /// HTTP error response.
    fn admit(&self, _params: &UpgradeParams) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Serve an accepted connection until it closes.
    async fn serve(&self, connection: Box<dyn Connection>, params: UpgradeParams);
}

fn validate_channel_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("Channel path must start with '/'");
    }
    if path.len() == 1 {
        return Err("Channel path cannot be the root");
    }
    if path.contains(['?', '#']) {
        return Err("Channel path cannot contain a query or fragment");
    }
    if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Channel path contains invalid characters");
    }
    Ok(())
}

/// Collects channel registrations before the server starts.
#[derive(Default)]
pub struct ChannelMuxBuilder {
    channels: HashMap<String, Arc<dyn ChannelHandler>>,
}

impl ChannelMuxBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a channel to a path.
    ///
    /// # Errors
    ///
    /// Fails if the path is invalid or already taken.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<&mut Self, ConfigurationError> {
        let path = path.into();
        validate_channel_path(&path).map_err(|reason| ConfigurationError::InvalidChannelPath {
            path: path.clone(),
            reason,
        })?;

        if self.channels.contains_key(&path) {
            return Err(ConfigurationError::DuplicateChannel(path));
        }

        debug!(channel = %path, handler = handler.name(), "Channel registered");
        self.channels.insert(path, handler);
        Ok(self)
    }

    /// Freeze the routing table.
    #[must_use]
    pub fn build(self) -> ChannelMux {
        let mux = ChannelMux {
            channels: self.channels,
        };
        info!(channels = ?mux.paths(), "Channel routing table ready");
        mux
    }
}

/// Immutable routing table from upgrade path to channel.
pub struct ChannelMux {
    channels: HashMap<String, Arc<dyn ChannelHandler>>,
}

impl ChannelMux {
    /// Start building a multiplexer.
    #[must_use]
    pub fn builder() -> ChannelMuxBuilder {
        ChannelMuxBuilder::new()
    }

    /// Find the channel registered at exactly this path.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownChannel`] if nothing is registered.
    pub fn resolve(&self, path: &str) -> Result<&Arc<dyn ChannelHandler>, ProtocolError> {
        self.channels
            .get(path)
            .ok_or_else(|| ProtocolError::UnknownChannel(path.to_string()))
    }

    /// Resolve the channel and ask it to admit the connection.
    ///
    /// # Errors
    ///
    /// Returns the resolution or admission error.
    pub fn admit(
        &self,
        path: &str,
        params: &UpgradeParams,
    ) -> Result<Arc<dyn ChannelHandler>, ProtocolError> {
        let handler = self.resolve(path)?;
        handler.admit(params)?;
        Ok(Arc::clone(handler))
    }

    /// Hand an upgraded connection to its channel and serve it to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownChannel`] if nothing is registered.
    pub async fn dispatch(
        &self,
        path: &str,
        connection: Box<dyn Connection>,
        params: UpgradeParams,
    ) -> Result<(), ProtocolError> {
        let handler = Arc::clone(self.resolve(path)?);
        debug!(channel = %path, connection = %connection.id(), "Dispatching connection");
        handler.serve(connection, params).await;
        Ok(())
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::LiveUpdateChannel;
    use haul_protocol::LiveUpdateMessage;
    use haul_transport::memory;

    /// Accepts a connection and returns immediately.
    struct Null;

    #[async_trait]
    impl ChannelHandler for Null {
        fn name(&self) -> &str {
            "null"
        }

        async fn serve(&self, _connection: Box<dyn Connection>, _params: UpgradeParams) {}
    }

    /// Rejects every connection.
    struct Closed;

    #[async_trait]
    impl ChannelHandler for Closed {
        fn name(&self) -> &str {
            "closed"
        }

        fn admit(&self, params: &UpgradeParams) -> Result<(), ProtocolError> {
            Err(ProtocolError::InvalidRole(
                params.get("role").unwrap_or_default().to_string(),
            ))
        }

        async fn serve(&self, _connection: Box<dyn Connection>, _params: UpgradeParams) {}
    }

    #[test]
    fn test_duplicate_path_is_rejected() {
        let mut builder = ChannelMux::builder();
        builder.register("/hot", Arc::new(Null)).unwrap();

        match builder.register("/hot", Arc::new(Null)) {
            Err(ConfigurationError::DuplicateChannel(path)) => assert_eq!(path, "/hot"),
            other => panic!("Expected DuplicateChannel, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_invalid_paths_are_rejected() {
        let mut builder = ChannelMux::builder();
        for path in ["hot", "/", "/hot?x=1", "/a b"] {
            assert!(matches!(
                builder.register(path, Arc::new(Null)),
                Err(ConfigurationError::InvalidChannelPath { .. })
            ));
        }
    }

    #[test]
    fn test_exact_match_only() {
        let mut builder = ChannelMux::builder();
        builder.register("/hot", Arc::new(Null)).unwrap();
        let mux = builder.build();

        assert!(mux.resolve("/hot").is_ok());
        for path in ["/hot/", "/hotter", "/ho", "/HOT"] {
            assert!(matches!(
                mux.resolve(path),
                Err(ProtocolError::UnknownChannel(_))
            ));
        }
    }

    #[test]
    fn test_admit_delegates_to_channel() {
        let mut builder = ChannelMux::builder();
        builder
            .register("/open", Arc::new(Null))
            .unwrap()
            .register("/closed", Arc::new(Closed))
            .unwrap();
        let mux = builder.build();
        let params = UpgradeParams::from_pairs([("role", "client")]);

        assert!(mux.admit("/open", &params).is_ok());
        assert!(matches!(
            mux.admit("/closed", &params),
            Err(ProtocolError::InvalidRole(role)) if role == "client"
        ));
        assert!(matches!(
            mux.admit("/missing", &params),
            Err(ProtocolError::UnknownChannel(_))
        ));
        assert_eq!(mux.paths(), vec!["/closed", "/open"]);
    }

    #[tokio::test]
    async fn test_channels_route_independently() {
        let hot = Arc::new(LiveUpdateChannel::new("hot"));
        let hmr = Arc::new(LiveUpdateChannel::new("haul-hmr"));

        let mut builder = ChannelMux::builder();
        builder.register("/hot", hot.clone()).unwrap();
        builder.register("/haul-hmr", hmr.clone()).unwrap();
        let mux = Arc::new(builder.build());

        let (conn_a, mut peer_a) = memory::pair();
        let (conn_b, mut peer_b) = memory::pair();

        let serve_a = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move {
                mux.dispatch("/hot", Box::new(conn_a), UpgradeParams::default())
                    .await
            })
        };
        let serve_b = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move {
                mux.dispatch("/haul-hmr", Box::new(conn_b), UpgradeParams::default())
                    .await
            })
        };

        while hot.connection_count() == 0 || hmr.connection_count() == 0 {
            tokio::task::yield_now().await;
        }

        hot.broadcast(&LiveUpdateMessage::reload("a")).unwrap();

        assert!(peer_a.try_recv_text().unwrap().contains("\"reload\""));
        assert!(peer_b.try_recv_text().is_none());

        peer_a.hang_up();
        peer_b.hang_up();
        serve_a.await.unwrap().unwrap();
        serve_b.await.unwrap().unwrap();
        assert_eq!(hot.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_path_fails() {
        let mux = ChannelMux::builder().build();
        let (conn, _peer) = memory::pair();
        assert!(matches!(
            mux.dispatch("/nope", Box::new(conn), UpgradeParams::default())
                .await,
            Err(ProtocolError::UnknownChannel(_))
        ));
    }
}
