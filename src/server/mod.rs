mod error;
mod routes;

pub use error::AppError;
pub use routes::ProjectStats;

use crate::app::AppData;
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::{net::TcpListener, signal::ctrl_c};
use tracing::info;

pub fn router(data: AppData) -> Router {
    Router::new()
        .route(
            "/api/incr",
            post(routes::register_view).fallback(routes::method_not_allowed),
        )
        .route("/api/projects", get(routes::list_projects))
        .route("/api/projects/{slug}", get(routes::project_stats))
        .route("/healthz", get(routes::health))
        .with_state(data)
}

/// Serve until Ctrl+C or SIGTERM, then release the store connection.
pub async fn serve(data: AppData) -> anyhow::Result<()> {
    let address = SocketAddr::from(([0, 0, 0, 0], data.config.listen_port));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("fail to bind {address}"))?;
    info!("Server running on {address}");

    let app = router(data.clone()).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "server exited with an error")?;

    info!("Server shutting down...");
    data.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = ctrl_c().await {
            tracing::error!("fail to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("fail to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::RuntimeData,
        config::Config,
        stars::{StarCache, StarsProvider},
        store::{KvStore, MemoryStore},
        views::ViewCounter,
    };
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct FixedStars;

    #[async_trait::async_trait]
    impl StarsProvider for FixedStars {
        async fn fetch_stars(&self, repo: &str) -> anyhow::Result<u64> {
            match repo {
                "someone/offline" => anyhow::bail!("503 Service Unavailable"),
                _ => Ok(7),
            }
        }
    }

    /// Every call fails, as if redis went away.
    struct DeadStore;

    #[async_trait::async_trait]
    impl KvStore for DeadStore {
        async fn get(&self, _: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("connection refused")
        }
        async fn mget(&self, _: &[String]) -> anyhow::Result<Vec<Option<String>>> {
            anyhow::bail!("connection refused")
        }
        async fn incr(&self, _: &str) -> anyhow::Result<i64> {
            anyhow::bail!("connection refused")
        }
        async fn set_nx_ex(&self, _: &str, _: &str, _: std::time::Duration) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }
        async fn set_ex(&self, _: &str, _: &str, _: std::time::Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    fn test_config() -> Config {
        toml::from_str(
            r#"
            [[projects]]
            slug = "minimax"
            repository = "someone/minimax"

            [[projects]]
            slug = "text-cleaner"
            repository = "someone/offline"

            [[projects]]
            slug = "notes"

            [[projects]]
            slug = "secret"
            published = false
            "#,
        )
        .unwrap()
    }

    fn app_with(store: Arc<dyn KvStore>, config: Config) -> Router {
        let stars: Arc<dyn StarsProvider> = Arc::new(FixedStars);
        let data = RuntimeData::builder()
            .counter(ViewCounter::new(Arc::clone(&store)).with_salt(config.dedup_salt.clone()))
            .stars(StarCache::new(Arc::clone(&store), stars))
            .store(store)
            .config(config)
            .build();
        router(data.into())
    }

    fn app() -> Router {
        app_with(Arc::new(MemoryStore::new()), test_config())
    }

    fn incr(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/incr")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn first_view_returns_accepted_with_one() {
        let response = app().oneshot(incr(r#"{"slug":"demo"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_string(response).await, "1");
    }

    #[tokio::test]
    async fn views_accumulate_without_dedup() {
        let app = app();
        for _ in 0..2 {
            app.clone().oneshot(incr(r#"{"slug":"demo"}"#)).await.unwrap();
        }
        let response = app.oneshot(incr(r#"{"slug":"demo"}"#)).await.unwrap();
        assert_eq!(body_string(response).await, "3");
    }

    #[tokio::test]
    async fn non_post_is_rejected() {
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let request = Request::builder()
                .method(method)
                .uri("/api/incr")
                .body(Body::empty())
                .unwrap();
            let response = app().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
    }

    #[tokio::test]
    async fn bad_payloads_are_rejected() {
        for body in [r#"{}"#, r#"{"slug":""}"#, r#"{"slug":42}"#, "[]", "not json"] {
            let response = app().oneshot(incr(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        }
    }

    #[tokio::test]
    async fn content_type_must_be_json() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/incr")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from(r#"{"slug":"demo"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/incr")
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Body::from(r#"{"slug":"demo"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn dedup_uses_forwarded_address() {
        let mut config = test_config();
        config.dedup_views = true;
        config.trust_proxy = true;
        let app = app_with(Arc::new(MemoryStore::new()), config);

        let from = |ip: &str| {
            let mut request = incr(r#"{"slug":"demo"}"#);
            request
                .headers_mut()
                .insert("x-forwarded-for", format!("{ip}, 10.0.0.1").parse().unwrap());
            request
        };

        let first = app.clone().oneshot(from("198.51.100.4")).await.unwrap();
        assert_eq!(body_string(first).await, "1");
        let again = app.clone().oneshot(from("198.51.100.4")).await.unwrap();
        assert_eq!(again.status(), StatusCode::ACCEPTED);
        assert_eq!(body_string(again).await, "1");
        let other = app.oneshot(from("198.51.100.5")).await.unwrap();
        assert_eq!(body_string(other).await, "2");
    }

    #[tokio::test]
    async fn forwarded_header_is_ignored_without_trusted_proxy() {
        let mut config = test_config();
        config.dedup_views = true;
        let app = app_with(Arc::new(MemoryStore::new()), config);

        let spoofed = |ip: &str| {
            let mut request = incr(r#"{"slug":"demo"}"#);
            request
                .headers_mut()
                .insert("x-forwarded-for", ip.parse().unwrap());
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 50000))));
            request
        };

        let first = app.clone().oneshot(spoofed("198.51.100.4")).await.unwrap();
        assert_eq!(body_string(first).await, "1");
        // same peer with a rotated header is still the same visitor
        let rotated = app.oneshot(spoofed("198.51.100.99")).await.unwrap();
        assert_eq!(body_string(rotated).await, "1");
    }

    #[tokio::test]
    async fn store_failure_is_a_server_error() {
        let response = app_with(Arc::new(DeadStore), test_config())
            .oneshot(incr(r#"{"slug":"demo"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn production_hides_internal_details() {
        let mut config = test_config();
        config.production = true;
        let response = app_with(Arc::new(DeadStore), config)
            .oneshot(incr(r#"{"slug":"demo"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "Internal error");
    }

    #[tokio::test]
    async fn project_listing_combines_views_and_stars() {
        let app = app();
        app.clone().oneshot(incr(r#"{"slug":"minimax"}"#)).await.unwrap();
        app.clone().oneshot(incr(r#"{"slug":"minimax"}"#)).await.unwrap();

        let request = Request::builder()
            .uri("/api/projects")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let listing: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            listing,
            serde_json::json!([
                { "slug": "minimax", "repository": "someone/minimax", "views": 2, "stars": 7 },
                { "slug": "text-cleaner", "repository": "someone/offline", "views": 0, "stars": null },
                { "slug": "notes", "repository": null, "views": 0, "stars": null },
            ])
        );
    }

    #[tokio::test]
    async fn single_project_lookup() {
        let request = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

        let response = app().oneshot(request("/api/projects/secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(stats["views"], 0);
        assert_eq!(stats["stars"], serde_json::Value::Null);

        let response = app().oneshot(request("/api/projects/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app().oneshot(request("/healthz")).await.unwrap();
        assert_eq!(body_string(response).await, "OK");
    }
}
