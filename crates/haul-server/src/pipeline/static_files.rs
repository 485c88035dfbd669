//! Files under the public root.

use super::{Outcome, RequestHandler, Stage};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use std::path::{Path, PathBuf};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::debug;

/// Serves `GET`/`HEAD` requests from a directory; misses pass through.
pub struct StaticAssets {
    root: PathBuf,
    dir: ServeDir,
}

impl StaticAssets {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            dir: ServeDir::new(&root),
            root,
        }
    }
}

#[async_trait]
impl RequestHandler for StaticAssets {
    fn name(&self) -> &str {
        "static-assets"
    }

    fn stage(&self) -> Stage {
        Stage::StaticAssets
    }

    async fn handle(&self, request: Request) -> Outcome {
        if !matches!(*request.method(), Method::GET | Method::HEAD) {
            return Outcome::Next(request);
        }

        // GET and HEAD carry no body, so a bodiless copy is enough to look up
        // the directory while the original request stays available.
        let mut lookup = Request::builder()
            .method(request.method().clone())
            .uri(request.uri().clone())
            .body(Body::empty())
            .unwrap_or_default();
        *lookup.headers_mut() = request.headers().clone();

        let response = match self.dir.clone().oneshot(lookup).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED
        ) {
            return Outcome::Next(request);
        }

        debug!(
            root = %self.root.display(),
            path = %request.uri().path(),
            status = %response.status(),
            "Served static asset"
        );
        Outcome::Handled(response.map(Body::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.txt"), "haul").unwrap();
        let assets = StaticAssets::new(dir.path());

        match assets.handle(get("/logo.txt")).await {
            Outcome::Handled(response) => {
                assert_eq!(response.status(), StatusCode::OK);
                let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
                assert_eq!(&body[..], b"haul");
            }
            Outcome::Next(_) => panic!("Expected the file to be served"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let assets = StaticAssets::new(dir.path());

        match assets.handle(get("/index.ios.bundle")).await {
            Outcome::Next(request) => assert_eq!(request.uri().path(), "/index.ios.bundle"),
            Outcome::Handled(_) => panic!("Expected pass-through"),
        }
    }

    #[tokio::test]
    async fn test_parent_components_never_resolve() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "nope").unwrap();
        let public = outer.path().join("public");
        std::fs::create_dir(&public).unwrap();
        let assets = StaticAssets::new(&public);

        assert!(matches!(
            assets.handle(get("/../secret.txt")).await,
            Outcome::Next(_)
        ));
    }

    #[tokio::test]
    async fn test_post_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("systrace"), "file").unwrap();
        let assets = StaticAssets::new(dir.path());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/systrace")
            .body(Body::from("{}"))
            .unwrap();
        assert!(matches!(assets.handle(request).await, Outcome::Next(_)));
    }
}
