use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Endpoint must use the http scheme: {0}")]
    UnsupportedScheme(Url),

    #[error("Endpoint has no host: {0}")]
    MissingHost(Url),
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_keep_alive_interval_secs() -> u64 {
    30
}

/// Gateway configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for discrete request/response ingestion
    pub http_listener: Listener,
    /// Listener for multiplexed streaming ingestion (cleartext HTTP/2)
    pub stream_listener: Listener,
    /// Listener for health and readiness endpoints
    pub admin_listener: Listener,
    /// Credential store used to resolve ingestion tokens
    pub token_api: TokenApiConfig,
    /// Request/response shard endpoints, indexed by shard number
    ///
    /// A shard id `shard-<i>` selects index `i`. A missing index is an
    /// operational problem answered with 503, never a crash.
    pub http_endpoints: Vec<Url>,
    /// Streaming shard endpoints, indexed by shard number
    pub stream_endpoints: Vec<Url>,
    /// Bound on outbound connection/session establishment
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Liveness probe interval for pooled sessions
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TokenApiConfig {
    /// Base URL of the credential store's internal API
    pub url: Url,
    /// How long a resolved token stays valid in the authentication cache.
    /// Revocation takes effect within this window.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.http_listener.validate()?;
        self.stream_listener.validate()?;
        self.admin_listener.validate()?;

        for endpoint in self.http_endpoints.iter().chain(&self.stream_endpoints) {
            // Both transports run cleartext; TLS termination happens in
            // front of the shards, not here.
            if endpoint.scheme() != "http" {
                return Err(ValidationError::UnsupportedScheme(endpoint.clone()));
            }
            if endpoint.host_str().is_none() {
                return Err(ValidationError::MissingHost(endpoint.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> &'static str {
        r#"
http_listener:
    host: "0.0.0.0"
    port: 4318
stream_listener:
    host: "0.0.0.0"
    port: 4317
admin_listener:
    host: "127.0.0.1"
    port: 4319
token_api:
    url: "http://tokens.internal:8080"
http_endpoints:
    - "http://ingest-0.internal:4318"
    - "http://ingest-1.internal:4318"
stream_endpoints:
    - "http://ingest-0.internal:4317"
    - "http://ingest-1.internal:4317"
"#
    }

    #[test]
    fn test_parse_valid_config() {
        let config: Config = serde_yaml::from_str(base_yaml()).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.http_listener.port, 4318);
        assert_eq!(config.stream_listener.port, 4317);
        assert_eq!(config.http_endpoints.len(), 2);
        assert_eq!(config.stream_endpoints.len(), 2);

        // defaults
        assert_eq!(config.token_api.cache_ttl_secs, 60);
        assert_eq!(config.connect_timeout_secs, 5);
        assert_eq!(config.keep_alive_interval_secs, 30);
    }

    #[test]
    fn test_explicit_timeouts_and_ttl() {
        let yaml = format!(
            "{}connect_timeout_secs: 2\nkeep_alive_interval_secs: 10\n",
            base_yaml()
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.connect_timeout_secs, 2);
        assert_eq!(config.keep_alive_interval_secs, 10);

        let yaml = r#"
http_listener: {host: "0.0.0.0", port: 4318}
stream_listener: {host: "0.0.0.0", port: 4317}
admin_listener: {host: "127.0.0.1", port: 4319}
token_api: {url: "http://tokens.internal:8080", cache_ttl_secs: 5}
http_endpoints: []
stream_endpoints: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.token_api.cache_ttl_secs, 5);
        // empty endpoint lists are a runtime 503, not a config error
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config: Config = serde_yaml::from_str(base_yaml()).unwrap();
        config.admin_listener.port = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidPort
        ));

        let mut config: Config = serde_yaml::from_str(base_yaml()).unwrap();
        config.stream_endpoints = vec![Url::parse("https://ingest-0.internal:4317").unwrap()];
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::UnsupportedScheme(_)
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid endpoint URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
http_listener: {host: "0.0.0.0", port: 4318}
stream_listener: {host: "0.0.0.0", port: 4317}
admin_listener: {host: "127.0.0.1", port: 4319}
token_api: {url: "http://tokens.internal:8080"}
http_endpoints: ["not-a-url"]
stream_endpoints: []
"#
            )
            .is_err()
        );

        // Missing required section
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
http_listener: {host: "0.0.0.0", port: 4318}
"#
            )
            .is_err()
        );
    }
}
