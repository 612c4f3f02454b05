pub mod states;

use crate::core::auth::AuthManager;
use crate::core::client::{Client, ClientParts};
use crate::core::config::{
    ClientConfig, CompressionAlgorithm, CompressionConfig, RetryConfig, TimeoutConfig, TlsConfig,
};
use crate::core::retry::RetryPolicy;
use crate::metrics::Registry;
use crate::protocol::{MessageKind, ValidatorRegistry};
use crate::traits::*;
use states::*;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type RetryPredicateFn = Arc<dyn Fn(&MeshError) -> bool + Send + Sync + 'static>;

/// Type-state builder for [`Client`]
///
/// The address is required and enforced by the type system: `build()` is
/// only available after `address()` or `config()`.
///
/// ```ignore
/// let client = Client::builder()
///     .address("mesh.internal", 7400)
///     .auth_token("secret")
///     .compression(CompressionAlgorithm::Zstd, 3)
///     .heartbeat(Duration::from_secs(15))
///     .on_error(|e| eprintln!("mesh error: {}", e))
///     .build()?;
///
/// client.connect()?;
/// client.send(message)?;
/// ```
pub struct ClientBuilder<A: AddressState> {
    _state: PhantomData<A>,
    config: ClientConfig,
    credential: Option<AuthCredential>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    callbacks: Callbacks,
    registry: Option<Arc<Registry>>,
    validators: Option<ValidatorRegistry>,
    retry_predicate: Option<RetryPredicateFn>,
}

impl ClientBuilder<NoAddress> {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            _state: PhantomData,
            config: ClientConfig::new("", 0),
            credential: None,
            refresher: None,
            callbacks: Callbacks::default(),
            registry: None,
            validators: None,
            retry_predicate: None,
        }
    }

    pub fn address(mut self, host: impl Into<String>, port: u16) -> ClientBuilder<HasAddress> {
        self.config.host = host.into();
        self.config.port = port;
        self.transition()
    }

    /// Start from a complete configuration, e.g. from [`ClientConfig::load`]
    ///
    /// Later builder calls override individual fields.
    pub fn config(mut self, config: ClientConfig) -> ClientBuilder<HasAddress> {
        self.config = config;
        self.transition()
    }

    fn transition(self) -> ClientBuilder<HasAddress> {
        ClientBuilder {
            _state: PhantomData,
            config: self.config,
            credential: self.credential,
            refresher: self.refresher,
            callbacks: self.callbacks,
            registry: self.registry,
            validators: self.validators,
            retry_predicate: self.retry_predicate,
        }
    }
}

impl Default for ClientBuilder<NoAddress> {
    fn default() -> Self {
        Self::new()
    }
}

// Optional configuration methods
impl<A: AddressState> ClientBuilder<A> {
    /// Authenticate with a bearer token that never expires
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.config.auth_token = Some(token.clone());
        self.credential = Some(AuthCredential::new(token));
        self
    }

    /// Authenticate with a full credential (expiry, refresh token)
    pub fn credential(mut self, credential: AuthCredential) -> Self {
        self.config.auth_token = Some(credential.token.clone());
        self.credential = Some(credential);
        self
    }

    pub fn token_refresher(mut self, refresher: impl TokenRefresher + 'static) -> Self {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    pub fn compression(mut self, algorithm: CompressionAlgorithm, level: i32) -> Self {
        self.config.compression = CompressionConfig::new(algorithm, level);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Decide per error whether the connect path retries
    pub fn retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MeshError) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Ping the server after `interval` without traffic
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.config.source_id = source_id.into();
        self
    }

    pub fn max_clock_skew(mut self, skew: Duration) -> Self {
        self.config.max_clock_skew_ms = skew.as_millis() as u64;
        self
    }

    pub fn recovery_max_attempts(mut self, attempts: u32) -> Self {
        self.config.recovery_max_attempts = attempts;
        self
    }

    /// Register metrics in a shared registry instead of a private one
    pub fn metrics_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.metrics_prefix = prefix.into();
        self
    }

    /// Replace the whole validator set
    pub fn validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = Some(validators);
        self
    }

    /// Add or replace the rules for one payload kind
    pub fn validator(mut self, kind: MessageKind, validator: impl PayloadValidator + 'static) -> Self {
        self.validators
            .get_or_insert_with(ValidatorRegistry::standard)
            .register(kind, validator);
        self
    }

    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<&MeshError>) + Send + Sync + 'static,
    {
        self.callbacks.on_disconnect = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MeshError) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(callback));
        self
    }
}

impl ClientBuilder<HasAddress> {
    /// Validate the configuration and start the I/O worker
    ///
    /// The client starts `Disconnected`; call [`Client::connect`].
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let config = self.config;

        let mut retry = RetryPolicy::from(&config.retry);
        if let Some(predicate) = self.retry_predicate {
            retry = retry.with_predicate(move |e| predicate(e));
        }

        let validators = self
            .validators
            .unwrap_or_else(ValidatorRegistry::standard)
            .with_clock_skew(config.max_clock_skew());

        let credential = self
            .credential
            .or_else(|| config.auth_token.clone().map(AuthCredential::new));
        let auth = credential.map(|credential| {
            let manager = AuthManager::new(credential);
            match self.refresher {
                Some(refresher) => manager.with_refresher(refresher),
                None => manager,
            }
        });

        debug!(
            "Building client for {} (auth: {}, tls: {}, compression: {:?})",
            config.address(),
            auth.is_some(),
            config.has_tls(),
            config.compression.algorithm
        );

        Client::start(ClientParts {
            registry: self.registry.unwrap_or_else(|| Arc::new(Registry::new())),
            validators: Arc::new(validators),
            callbacks: self.callbacks,
            auth,
            retry,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, Payload, ValidationError};

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = Client::builder().address("", 7400).build().unwrap_err();
        assert!(matches!(err, MeshError::Configuration(_)));
    }

    #[test]
    fn test_built_client_starts_disconnected() {
        let client = Client::builder()
            .address("127.0.0.1", 9)
            .queue_capacity(4)
            .build()
            .unwrap();
        assert!(!client.is_connected());
        assert_eq!(client.config().queue_capacity, 4);
    }

    #[test]
    fn test_send_validates_before_enqueue() {
        let client = Client::builder().address("127.0.0.1", 9).build().unwrap();
        let bad = Message::new("", "hub", Payload::Ack { timestamp: 1 });
        assert_eq!(
            client.send(bad).unwrap_err(),
            MeshError::InvalidMessage(ValidationError::EmptySourceId)
        );
        assert_eq!(client.queued(), 0);
    }

    #[test]
    fn test_try_send_reports_full_queue() {
        let client = Client::builder()
            .address("127.0.0.1", 9)
            .queue_capacity(2)
            .build()
            .unwrap();
        let msg = || Message::new("node", "hub", Payload::Ack { timestamp: 1 });
        client.try_send(msg()).unwrap();
        client.try_send(msg()).unwrap();
        assert_eq!(client.try_send(msg()).unwrap_err(), MeshError::QueueFull);
    }

    #[test]
    fn test_shared_registry_needs_distinct_prefixes() {
        let registry = Arc::new(Registry::new());
        let _first = Client::builder()
            .address("127.0.0.1", 9)
            .metrics_registry(Arc::clone(&registry))
            .build()
            .unwrap();
        let second = Client::builder()
            .address("127.0.0.1", 9)
            .metrics_registry(Arc::clone(&registry))
            .build();
        assert!(matches!(second, Err(MeshError::MetricAlreadyRegistered(_))));

        let _third = Client::builder()
            .address("127.0.0.1", 9)
            .metrics_registry(registry)
            .metrics_prefix("second")
            .build()
            .unwrap();
    }

    #[test]
    fn test_custom_validator_applies_to_send() {
        struct NoAcks;
        impl PayloadValidator for NoAcks {
            fn validate(&self, _payload: &Payload) -> std::result::Result<(), ValidationError> {
                Err(ValidationError::EmptyField { field: "ack" })
            }
        }

        let client = Client::builder()
            .address("127.0.0.1", 9)
            .validator(MessageKind::Ack, NoAcks)
            .build()
            .unwrap();
        let ack = Message::new("node", "hub", Payload::Ack { timestamp: 1 });
        assert!(matches!(client.send(ack), Err(MeshError::InvalidMessage(_))));
    }
}
