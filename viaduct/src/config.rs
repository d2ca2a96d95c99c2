use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommonConfig {
    metrics: Option<MetricsConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    common: CommonConfig,
    pub gateway: gateway::config::Config,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn metrics(&self) -> Option<&MetricsConfig> {
        self.common.metrics.as_ref()
    }

    pub fn sentry_dsn(&self) -> Option<&str> {
        self.common
            .logging
            .as_ref()
            .and_then(|logging| logging.sentry_dsn.as_deref())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
metrics:
    statsd_host: "127.0.0.1"
    statsd_port: 8125
logging:
    sentry_dsn: "https://key@sentry.example.com/1"
gateway:
    http_listener: {host: "0.0.0.0", port: 4318}
    stream_listener: {host: "0.0.0.0", port: 4317}
    admin_listener: {host: "127.0.0.1", port: 4319}
    token_api: {url: "http://tokens.internal:8080", cache_ttl_secs: 30}
    http_endpoints: ["http://ingest-0.internal:4318"]
    stream_endpoints: ["http://ingest-0.internal:4317"]
"#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.metrics().unwrap().statsd_port, 8125);
        assert_eq!(
            config.sentry_dsn(),
            Some("https://key@sentry.example.com/1")
        );
        assert_eq!(config.gateway.token_api.cache_ttl_secs, 30);
        assert!(config.gateway.validate().is_ok());
    }

    #[test]
    fn test_minimal_config() {
        let yaml = r#"
gateway:
    http_listener: {host: "0.0.0.0", port: 4318}
    stream_listener: {host: "0.0.0.0", port: 4317}
    admin_listener: {host: "127.0.0.1", port: 4319}
    token_api: {url: "http://tokens.internal:8080"}
    http_endpoints: []
    stream_endpoints: []
"#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert!(config.metrics().is_none());
        assert!(config.sentry_dsn().is_none());
    }
}
