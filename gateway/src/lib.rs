pub mod accounting;
pub mod auth;
pub mod config;
pub mod errors;
pub mod http_gateway;
pub mod metrics_defs;
pub mod pool;
pub mod routing;
pub mod stream_gateway;
pub mod testutils;

use authn::{AuthCache, HttpTokenResolver};
use errors::GatewayError;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use shared::admin_service::AdminService;
use shared::http::{run_h2_service, run_http_service};
use std::sync::Arc;
use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Uniform body type for every outbound proxied request and stream.
pub type OutboundBody = BoxBody<Bytes, BoxError>;

/// Tenant-identifying header injected into every proxied request and stream.
pub const TEAM_ID_HEADER: &str = "x-hdx-team-id";

/// Builds the shared authentication cache and session pool, wires them into
/// both gateways, and serves all three listeners until one of them fails.
pub async fn run(config: config::Config) -> Result<(), GatewayError> {
    let resolver = Arc::new(HttpTokenResolver::new(config.token_api.url.clone()));
    let auth_cache = Arc::new(AuthCache::new(
        resolver,
        Duration::from_secs(config.token_api.cache_ttl_secs),
    ));
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let pool = pool::ConnectionPool::new(
        connect_timeout,
        Duration::from_secs(config.keep_alive_interval_secs),
    );

    let http_gateway = http_gateway::HttpGateway::new(
        auth_cache.clone(),
        config.http_endpoints.clone(),
        connect_timeout,
    );
    let stream_gateway =
        stream_gateway::StreamGateway::new(auth_cache, pool, config.stream_endpoints.clone());
    let admin = AdminService::<_, GatewayError>::new(|| true);

    tracing::info!(
        host = %config.http_listener.host,
        port = config.http_listener.port,
        "request/response ingestion listener starting"
    );
    tracing::info!(
        host = %config.stream_listener.host,
        port = config.stream_listener.port,
        "streaming ingestion listener starting"
    );
    tracing::info!(
        host = %config.admin_listener.host,
        port = config.admin_listener.port,
        "admin listener starting"
    );

    tokio::try_join!(
        run_http_service(
            &config.http_listener.host,
            config.http_listener.port,
            http_gateway,
        ),
        run_h2_service(
            &config.stream_listener.host,
            config.stream_listener.port,
            stream_gateway,
        ),
        run_http_service(
            &config.admin_listener.host,
            config.admin_listener.port,
            admin,
        ),
    )?;
    Ok(())
}
