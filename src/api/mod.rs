//! HTTP control surface for the avatar session

pub mod health;
pub mod session;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::session::SessionHandle;

/// Builds a fresh session when the previous one has closed
pub type SessionFactory = Arc<dyn Fn() -> SessionHandle + Send + Sync>;

/// Shared state for API handlers
pub struct ApiState {
    session: RwLock<SessionHandle>,
    factory: SessionFactory,
}

impl ApiState {
    /// Create state around a new session from the factory
    #[must_use]
    pub fn new(factory: SessionFactory) -> Self {
        let session = factory();
        Self::with_session(session, factory)
    }

    /// Create state around an existing session
    #[must_use]
    pub fn with_session(session: SessionHandle, factory: SessionFactory) -> Self {
        Self {
            session: RwLock::new(session),
            factory,
        }
    }

    /// Handle to the current session
    pub async fn current(&self) -> SessionHandle {
        self.session.read().await.clone()
    }

    /// Handle to the current session, replaced if it has closed
    pub async fn current_or_fresh(&self) -> SessionHandle {
        let mut session = self.session.write().await;
        if session.is_closed() || session.snapshot().state.is_closed() {
            let previous = session.id();
            *session = (self.factory)();
            tracing::info!(%previous, session_id = %session.id(), "replaced closed session");
        }
        session.clone()
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server on a port
    #[must_use]
    pub const fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(health::router())
            .merge(session::router(self.state.clone()))
            .merge(websocket::router(self.state.clone()));

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("0.0.0.0:{}", self.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))
    }

    /// Serve requests on a bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server stops with an IO failure
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind, then serve in a background task
    ///
    /// A failure after binding is logged by the task as well as returned
    /// through its handle.
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound
    pub async fn spawn(self) -> Result<tokio::task::JoinHandle<Result<()>>> {
        let listener = self.bind().await?;
        Ok(tokio::spawn(async move {
            let result = self.serve(listener).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "API server failed");
            }
            result
        }))
    }
}
