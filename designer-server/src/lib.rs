//! # Touch Designer Server Library
//!
//! HTTP surface of the touch designer: device projects, widget schemas,
//! recipes, assets, and the compile/preview/deploy endpoints.
//! This library is used by both the binary and integration tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use designer_core::{
    AssetStore, CapabilityResolver, DeployCoordinator, DeviceStore, RecipeCatalog,
    SchemaRegistry, UnconfiguredResolver,
};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub mod api;
pub mod config;
pub mod health;
pub mod homeassistant;
pub mod metrics;
pub mod routes;
pub mod validation;

pub use config::{ServerArgs, ServerConfig};
pub use homeassistant::{HomeAssistantClient, RetryConfig};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Registered devices and their projects.
    pub devices: DeviceStore,
    /// Widget schemas.
    pub registry: Arc<SchemaRegistry>,
    /// Hardware recipes.
    pub recipes: Arc<RecipeCatalog>,
    /// Entity capability lookups.
    pub resolver: Arc<dyn CapabilityResolver>,
    /// False when lookups are deferred because no platform is configured.
    pub resolver_configured: bool,
    /// Uploaded fonts and images.
    pub assets: AssetStore,
    /// Artifact writer and deploy records.
    pub deployer: Arc<DeployCoordinator>,
}

impl AppState {
    /// Open every store under the configured directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or read, a schema
    /// override fails to parse, or the Home Assistant URL is invalid.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let devices = DeviceStore::with_data_dir(config.devices_dir())
            .with_context(|| format!("opening device store in {}", config.devices_dir().display()))?;

        let mut registry = SchemaRegistry::builtin().context("loading builtin widget schemas")?;
        if let Some(dir) = &config.schemas_dir {
            let loaded = registry
                .load_dir(dir)
                .with_context(|| format!("loading widget schemas from {}", dir.display()))?;
            tracing::info!("Loaded {loaded} widget schema override(s) from {}", dir.display());
        }

        let recipes = RecipeCatalog::builtin().with_user_dir(config.recipes_dir());
        let assets = AssetStore::open(config.assets_dir())
            .with_context(|| format!("opening asset store in {}", config.assets_dir().display()))?;
        let deployer = DeployCoordinator::open(&config.deploy_dir)
            .with_context(|| format!("opening deploy directory {}", config.deploy_dir.display()))?;

        let (resolver, resolver_configured): (Arc<dyn CapabilityResolver>, bool) =
            match &config.home_assistant {
                Some(ha) => {
                    let client = HomeAssistantClient::new(&ha.url, ha.token.clone())
                        .context("configuring Home Assistant client")?;
                    tracing::info!("Resolving entity capabilities via {}", client.base_url());
                    (Arc::new(client), true)
                }
                None => {
                    tracing::warn!("No Home Assistant configured; binding checks will be deferred");
                    (Arc::new(UnconfiguredResolver), false)
                }
            };

        Ok(Self {
            devices,
            registry: Arc::new(registry),
            recipes: Arc::new(recipes),
            resolver,
            resolver_configured,
            assets,
            deployer: Arc::new(deployer),
        })
    }

    /// Replace the capability resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn CapabilityResolver>) -> Self {
        self.resolver = resolver;
        self.resolver_configured = true;
        self
    }
}

/// Build a CORS layer that only allows localhost origins.
#[must_use]
pub fn build_cors_layer(port: u16) -> CorsLayer {
    let localhost_origins = [
        format!("http://localhost:{port}"),
        format!("http://127.0.0.1:{port}"),
        // Editor dev servers
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ];

    let origins: Vec<HeaderValue> = localhost_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
}

/// Build the application router: `/api`, health probes, and the request
/// id, CORS and tracing layers. The metrics endpoint is merged by the caller.
pub fn app(state: AppState, port: u16) -> Router {
    Router::new()
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/api", routes::api_router())
        // Request ID for log correlation
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(build_cors_layer(port))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
