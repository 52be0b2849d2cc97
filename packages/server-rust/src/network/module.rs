//! Health server with deferred startup lifecycle.
//!
//! `new()` creates the shared state, `start()` binds the TCP listener, and
//! `serve()` accepts requests until the shutdown future resolves. The
//! service lifecycle itself (readiness, drain) belongs to the
//! [`ShutdownController`] passed in, not to this module.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::engine::AnnotationEngine;

pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        shutdown: Arc<ShutdownController>,
        engine: AnnotationEngine,
    ) -> Self {
        Self {
            config,
            listener: None,
            state: AppState {
                shutdown,
                engine,
                start_time: Instant::now(),
            },
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(build_http_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the TCP listener and returns the bound port (OS-assigned when
    /// the configured port is 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind health server to {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "health server bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves health requests until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("health server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::engine::tests::{OnceFactory, ProbeEngine};
    use crate::engine::EngineConfig;

    async fn module() -> NetworkModule {
        let engine = AnnotationEngine::start(
            Arc::new(OnceFactory::new(ProbeEngine::new(Duration::ZERO))),
            EngineConfig::default(),
        )
        .await;
        NetworkModule::new(
            NetworkConfig::default(),
            Arc::new(ShutdownController::new()),
            engine,
        )
    }

    async fn get_status(router: Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn shutdown_controller_is_shared() {
        let module = module().await;
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn router_serves_health_routes() {
        let module = module().await;
        let router = module.build_router();

        assert_eq!(get_status(router.clone(), "/health").await, StatusCode::OK);
        assert_eq!(get_status(router.clone(), "/health/live").await, StatusCode::OK);
        assert_eq!(
            get_status(router.clone(), "/health/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        module.shutdown_controller().set_ready();
        assert_eq!(get_status(router.clone(), "/health/ready").await, StatusCode::OK);
        assert_eq!(get_status(router, "/nope").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module().await;
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = module().await;
        let err = module.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start() must be called"));
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let mut module = module().await;
        module.start().await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
