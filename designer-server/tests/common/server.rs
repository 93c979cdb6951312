//! Test server harness for integration tests.
//!
//! Spins up the real application router on a random port, backed by a
//! temporary data directory.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use designer_core::CapabilityResolver;
use designer_server::{app, AppState, ServerConfig};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A test server instance with control handles.
pub struct TestServer {
    addr: SocketAddr,
    state: AppState,
    data_dir: TempDir,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with no capability resolver configured.
    ///
    /// # Panics
    ///
    /// Panics if no port is available or server fails to bind.
    #[allow(dead_code)]
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Start a server that resolves entities with `resolver`.
    #[allow(dead_code)]
    pub async fn start_with_resolver(resolver: Arc<dyn CapabilityResolver>) -> Self {
        Self::start_with(Some(resolver)).await
    }

    async fn start_with(resolver: Option<Arc<dyn CapabilityResolver>>) -> Self {
        let port = portpicker::pick_unused_port().expect("no available port");
        let addr = SocketAddr::from(([127, 0, 0, 1], port));

        let data_dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServerConfig::new(data_dir.path());
        config.addr = addr;
        let mut state = AppState::from_config(&config).expect("app state");
        if let Some(resolver) = resolver {
            state = state.with_resolver(resolver);
        }

        let router = app(state.clone(), port);
        let listener = TcpListener::bind(addr).await.expect("failed to bind");
        let actual_addr = listener.local_addr().expect("failed to get local addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server error");
        });

        // Give the server a moment to start
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

        Self {
            addr: actual_addr,
            state,
            data_dir,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Get the server's socket address.
    #[allow(dead_code)]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL of an `/api` path, e.g. `api_url("/devices")`.
    #[allow(dead_code)]
    pub fn api_url(&self, path: &str) -> String {
        format!("http://{}/api{path}", self.addr)
    }

    /// URL of a non-API path such as `/health/ready`.
    #[allow(dead_code)]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Shared state, for direct assertions on the stores.
    #[allow(dead_code)]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Root of the temporary data directory.
    #[allow(dead_code)]
    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    /// Gracefully shut down the server.
    #[allow(dead_code)]
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(tokio::time::Duration::from_secs(5), self.handle).await;
    }
}
