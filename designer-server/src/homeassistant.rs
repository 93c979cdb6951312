//! Home Assistant REST client used as the capability resolver.
//!
//! Entity state comes from `GET /api/states/{entity_id}` and the services of
//! each domain from `GET /api/services`. Transport failures and 5xx answers
//! are retried with exponential backoff; anything still failing surfaces as
//! [`ResolveError::Unavailable`] so compiles defer instead of failing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use designer_core::capability::{classify_state, entity_domain};
use designer_core::{CapabilityResolver, CapabilitySet, ResolveError, ValueKind};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::metrics;

/// How long the service catalog is reused before being fetched again.
const SERVICES_TTL: Duration = Duration::from_secs(60);

/// Errors that can occur when talking to Home Assistant.
#[derive(Debug, Error)]
pub enum HomeAssistantError {
    /// The configured base URL is invalid.
    #[error("invalid Home Assistant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed (connection, timeout, etc.).
    #[error("Home Assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Home Assistant answered with a non-success status.
    #[error("Home Assistant returned HTTP {0}")]
    Status(u16),
    /// The requested entity does not exist.
    #[error("entity not found: {0}")]
    NotFound(String),
    /// The response body did not have the expected shape.
    #[error("unexpected Home Assistant response: {0}")]
    UnexpectedResponse(String),
}

impl HomeAssistantError {
    /// Returns true if this error is retryable (transport failures and 5xx).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<HomeAssistantError> for ResolveError {
    fn from(err: HomeAssistantError) -> Self {
        match err {
            HomeAssistantError::NotFound(entity_id) => Self::EntityNotFound(entity_id),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Configuration for retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        }
    }

    /// Calculate delay for a given attempt number (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay_ms as f64) as u64;
        let jitter = (capped_delay / 4).max(1);
        capped_delay.saturating_add(jitter / 2)
    }
}

#[derive(Debug, Deserialize)]
struct EntityState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DomainServices {
    domain: String,
    #[serde(default)]
    services: Map<String, Value>,
}

#[derive(Debug)]
struct ServiceCache {
    fetched_at: Instant,
    by_domain: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base: Url,
    token: String,
    retry_config: RetryConfig,
    /// Held across a refresh so concurrent lookups share one fetch.
    services: tokio::sync::Mutex<Option<ServiceCache>>,
}

/// Capability resolver backed by the Home Assistant REST API.
#[derive(Debug, Clone)]
pub struct HomeAssistantClient {
    inner: Arc<Inner>,
}

impl HomeAssistantClient {
    /// Create a client with the default retry configuration.
    ///
    /// # Errors
    ///
    /// See [`Self::with_retry_config`].
    pub fn new(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self, HomeAssistantError> {
        Self::with_retry_config(base_url, token, RetryConfig::default())
    }

    /// Create a client with a custom retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HomeAssistantError::InvalidUrl`] if the URL is malformed or not http(s).
    /// Returns [`HomeAssistantError::Http`] if the HTTP client fails to build.
    pub fn with_retry_config(
        base_url: impl AsRef<str>,
        token: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, HomeAssistantError> {
        let base = Url::parse(base_url.as_ref())
            .map_err(|e| HomeAssistantError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(HomeAssistantError::InvalidUrl(base.to_string()));
        }

        let http = Client::builder()
            .user_agent(format!("touch-designer/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base,
                token: token.into(),
                retry_config,
                services: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Base URL requests are issued against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base
    }

    /// Fetch an entity's state and attributes and the services of its domain.
    ///
    /// # Errors
    ///
    /// Returns [`HomeAssistantError::NotFound`] for unknown entities, or a
    /// transport/status error once retries are exhausted.
    #[tracing::instrument(name = "ha_capabilities", skip(self))]
    pub async fn capabilities(&self, entity_id: &str) -> Result<CapabilitySet, HomeAssistantError> {
        let domain = entity_domain(entity_id)
            .ok_or_else(|| HomeAssistantError::NotFound(entity_id.to_string()))?
            .to_string();

        let url = self.endpoint(&["api", "states", entity_id])?;
        let body = match self.get_json(url).await {
            Err(HomeAssistantError::Status(404)) => {
                return Err(HomeAssistantError::NotFound(entity_id.to_string()))
            }
            other => other?,
        };
        let state: EntityState = serde_json::from_value(body)
            .map_err(|e| HomeAssistantError::UnexpectedResponse(e.to_string()))?;

        let mut caps = CapabilitySet::new(state.entity_id.clone(), state_kind(&domain, &state));
        for (name, value) in &state.attributes {
            caps = caps.with_attribute(name.clone(), ValueKind::of_json(value));
        }
        for service in self.domain_services(&domain).await? {
            caps = caps.with_service(service);
        }
        Ok(caps)
    }

    async fn domain_services(&self, domain: &str) -> Result<BTreeSet<String>, HomeAssistantError> {
        let mut cache = self.inner.services.lock().await;
        if let Some(cache) = cache.as_ref().filter(|c| c.fetched_at.elapsed() < SERVICES_TTL) {
            return Ok(cache.by_domain.get(domain).cloned().unwrap_or_default());
        }

        let url = self.endpoint(&["api", "services"])?;
        let body = self.get_json(url).await?;
        let domains: Vec<DomainServices> = serde_json::from_value(body)
            .map_err(|e| HomeAssistantError::UnexpectedResponse(e.to_string()))?;
        let by_domain: HashMap<String, BTreeSet<String>> = domains
            .into_iter()
            .map(|d| (d.domain, d.services.into_iter().map(|(name, _)| name).collect()))
            .collect();
        let services = by_domain.get(domain).cloned().unwrap_or_default();

        *cache = Some(ServiceCache {
            fetched_at: Instant::now(),
            by_domain,
        });
        Ok(services)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HomeAssistantError> {
        let mut url = self.inner.base.clone();
        url.path_segments_mut()
            .map_err(|()| HomeAssistantError::InvalidUrl(self.inner.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, HomeAssistantError> {
        let config = &self.inner.retry_config;
        let attempts = config.max_attempts.max(1);

        for attempt in 0..attempts {
            let result = self.get_once(url.clone()).await;
            match result {
                Ok(value) => {
                    if attempt > 0 {
                        metrics::record_resolver_retry("success");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt + 1 < attempts => {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        "Home Assistant GET {} failed (attempt {}/{}), retrying in {}ms: {}",
                        url.path(),
                        attempt + 1,
                        attempts,
                        delay,
                        error
                    );
                    metrics::record_resolver_retry("failure");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(error) => return Err(error),
            }
        }
        Err(HomeAssistantError::UnexpectedResponse(
            "retry loop exhausted".to_string(),
        ))
    }

    async fn get_once(&self, url: Url) -> Result<Value, HomeAssistantError> {
        let response = self
            .inner
            .http
            .get(url)
            .bearer_auth(&self.inner.token)
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(HomeAssistantError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Kind of an entity's state. Numeric sensors that are currently
/// `unknown`/`unavailable` still report a unit, which marks them numeric.
fn state_kind(domain: &str, state: &EntityState) -> ValueKind {
    let kind = classify_state(domain, &state.state);
    let placeholder = matches!(state.state.as_str(), "unknown" | "unavailable");
    if kind == ValueKind::Text && placeholder && state.attributes.contains_key("unit_of_measurement") {
        ValueKind::Number
    } else {
        kind
    }
}

#[async_trait]
impl CapabilityResolver for HomeAssistantClient {
    async fn resolve(&self, entity_id: &str) -> Result<CapabilitySet, ResolveError> {
        let result = self.capabilities(entity_id).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(HomeAssistantError::NotFound(_)) => "not_found",
            Err(_) => "unavailable",
        };
        metrics::record_resolver_call(outcome);
        result.map_err(ResolveError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_with_mock(server: &MockServer) -> HomeAssistantClient {
        HomeAssistantClient::with_retry_config(
            server.uri(),
            "test-token",
            RetryConfig::new(3, 1, 5, 2.0),
        )
        .expect("client")
    }

    async fn mount_services(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "domain": "light", "services": { "turn_on": {}, "turn_off": {}, "toggle": {} } },
                { "domain": "sensor", "services": {} }
            ])))
            .mount(server)
            .await;
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = RetryConfig::new(5, 100, 1_000, 2.0);
        assert_eq!(config.delay_for_attempt(0), 112);
        assert_eq!(config.delay_for_attempt(1), 225);
        assert_eq!(config.delay_for_attempt(10), 1_125);
    }

    #[test]
    fn test_invalid_urls_rejected() {
        assert!(matches!(
            HomeAssistantClient::new("not a url", "t"),
            Err(HomeAssistantError::InvalidUrl(_))
        ));
        assert!(matches!(
            HomeAssistantClient::new("ftp://ha.local", "t"),
            Err(HomeAssistantError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            ResolveError::from(HomeAssistantError::NotFound("light.x".into())),
            ResolveError::EntityNotFound("light.x".into())
        );
        assert!(ResolveError::from(HomeAssistantError::Status(502)).is_retryable());
        assert!(HomeAssistantError::Status(503).is_retryable());
        assert!(!HomeAssistantError::Status(401).is_retryable());
    }

    #[test]
    fn test_unknown_numeric_sensor_stays_numeric() {
        let state = EntityState {
            entity_id: "sensor.temp".into(),
            state: "unavailable".into(),
            attributes: serde_json::from_value(json!({"unit_of_measurement": "°C"}))
                .expect("map"),
        };
        assert_eq!(state_kind("sensor", &state), ValueKind::Number);
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn resolves_light_with_attributes_and_services() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/light.kitchen"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entity_id": "light.kitchen",
                "state": "on",
                "attributes": { "brightness": 200, "friendly_name": "Kitchen" }
            })))
            .mount(&server)
            .await;
        mount_services(&server).await;

        let caps = client_with_mock(&server)
            .resolve("light.kitchen")
            .await
            .expect("capabilities");
        assert_eq!(caps.domain, "light");
        assert_eq!(caps.state, ValueKind::Boolean);
        assert_eq!(caps.attributes.get("brightness"), Some(&ValueKind::Number));
        assert_eq!(caps.attributes.get("friendly_name"), Some(&ValueKind::Text));
        assert!(caps.services.contains("toggle"));
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn missing_entity_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/sensor.nope"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Entity not found."})))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_with_mock(&server)
            .resolve("sensor.nope")
            .await
            .expect_err("should fail");
        assert_eq!(err, ResolveError::EntityNotFound("sensor.nope".into()));
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn server_errors_are_retried_then_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/sensor.temp"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_with_mock(&server)
            .resolve("sensor.temp")
            .await
            .expect_err("should fail");
        assert!(err.is_retryable(), "got {err:?}");
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/sensor.temp"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_with_mock(&server)
            .resolve("sensor.temp")
            .await
            .expect_err("should fail");
        assert!(matches!(err, ResolveError::Unavailable(_)));
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn service_catalog_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/sensor.temp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entity_id": "sensor.temp",
                "state": "21.5",
                "attributes": {}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_mock(&server);
        for _ in 0..3 {
            let caps = client.resolve("sensor.temp").await.expect("capabilities");
            assert_eq!(caps.state, ValueKind::Number);
        }
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn concurrent_lookups_share_one_catalog_fetch() {
        let server = MockServer::start().await;
        for entity_id in ["sensor.a", "sensor.b", "sensor.c", "sensor.d"] {
            Mock::given(method("GET"))
                .and(path(format!("/api/states/{entity_id}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "entity_id": entity_id,
                    "state": "1",
                    "attributes": {}
                })))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/api/services"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_mock(&server);
        let (a, b, c, d) = tokio::join!(
            client.resolve("sensor.a"),
            client.resolve("sensor.b"),
            client.resolve("sensor.c"),
            client.resolve("sensor.d"),
        );
        for caps in [a, b, c, d] {
            assert_eq!(caps.expect("capabilities").state, ValueKind::Number);
        }
    }
}
