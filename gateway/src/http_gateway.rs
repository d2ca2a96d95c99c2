use crate::accounting::{MeteredBody, Transfer};
use crate::auth::{RouteDecision, authenticate_and_route};
use crate::errors::{GatewayError, Result};
use crate::metrics_defs::{HTTP_REQUESTS, NO_ENDPOINT, UNAUTHORIZED, UPSTREAM_ERROR};
use crate::{BoxError, OutboundBody, TEAM_ID_HEADER, routing};
use authn::AuthCache;
use http::header::{HOST, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::counter;
use shared::http::{add_via_header, error_response, filter_hop_by_hop};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

struct HttpGatewayInner {
    auth_cache: Arc<AuthCache>,
    endpoints: Vec<Url>,
    client: Client<HttpConnector, OutboundBody>,
}

/// Request/response ingestion gateway: authenticates each request and relays
/// it byte-for-byte to the tenant's shard endpoint.
#[derive(Clone)]
pub struct HttpGateway {
    inner: Arc<HttpGatewayInner>,
}

impl HttpGateway {
    pub fn new(auth_cache: Arc<AuthCache>, endpoints: Vec<Url>, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        HttpGateway {
            inner: Arc::new(HttpGatewayInner {
                auth_cache,
                endpoints,
                client,
            }),
        }
    }
}

impl Service<Request<Incoming>> for HttpGateway {
    type Response = Response<BoxBody<Bytes, GatewayError>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let response = match handle(inner, req).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(error = %err, "request handling failed");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
            Ok(response)
        })
    }
}

async fn handle(
    inner: Arc<HttpGatewayInner>,
    req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, GatewayError>>> {
    counter!(HTTP_REQUESTS).increment(1);
    tracing::debug!(method = %req.method(), path = req.uri().path(), "received request");

    let (parts, body) = req.into_parts();

    // Metering starts before any auth decision so rejected traffic is still
    // visible to operators.
    let transfer = Transfer::new("http");
    let body = MeteredBody::inbound(body, transfer.clone());

    match authenticate_and_route(&inner.auth_cache, &parts.headers, &inner.endpoints).await {
        RouteDecision::Unauthorized => {
            counter!(UNAUTHORIZED).increment(1);
            // Drain so the caller never hangs on backpressure and the
            // rejected payload is accounted for.
            body.drain().await;
            transfer.set_status(StatusCode::UNAUTHORIZED);
            transfer.finish();
            Ok(error_response(StatusCode::UNAUTHORIZED))
        }
        RouteDecision::NoEndpoint { record } => {
            counter!(NO_ENDPOINT).increment(1);
            let shard = record.assigned_shard.as_deref().unwrap_or(routing::DEFAULT_SHARD);
            tracing::error!(
                team_id = %record.team_id,
                shard,
                "no endpoint configured for shard"
            );
            body.drain().await;
            transfer.set_route(&record.team_id, shard);
            transfer.set_status(StatusCode::SERVICE_UNAVAILABLE);
            transfer.finish();
            Ok(error_response(StatusCode::SERVICE_UNAVAILABLE))
        }
        RouteDecision::Forward { record, endpoint } => {
            let shard = record.assigned_shard.as_deref().unwrap_or(routing::DEFAULT_SHARD);
            transfer.set_route(&record.team_id, shard);
            tracing::debug!(
                team_id = %record.team_id,
                shard,
                endpoint = %endpoint,
                token_hash = %record.token_hash,
                "routing request"
            );

            let outbound = build_outbound_request(&endpoint, parts, &record.team_id, body)?;
            match inner.client.request(outbound).await {
                Ok(response) => {
                    transfer.set_status(response.status());
                    let (mut parts, body) = response.into_parts();
                    filter_hop_by_hop(&mut parts.headers, parts.version);
                    add_via_header(&mut parts.headers, parts.version);
                    // The metered wrapper finalizes accounting when the
                    // relayed body completes or the caller goes away.
                    let body = MeteredBody::outbound(body, transfer)
                        .map_err(GatewayError::from)
                        .boxed();
                    Ok(Response::from_parts(parts, body))
                }
                Err(err) => {
                    counter!(UPSTREAM_ERROR).increment(1);
                    tracing::error!(endpoint = %endpoint, error = %err, "upstream request failed");
                    transfer.set_status(StatusCode::BAD_GATEWAY);
                    transfer.finish();
                    Ok(error_response(StatusCode::BAD_GATEWAY))
                }
            }
        }
    }
}

fn build_outbound_request(
    endpoint: &Url,
    mut parts: http::request::Parts,
    team_id: &str,
    body: MeteredBody<Incoming>,
) -> Result<Request<OutboundBody>> {
    let target = routing::target_url(endpoint, &parts.uri);

    filter_hop_by_hop(&mut parts.headers, parts.version);
    add_via_header(&mut parts.headers, parts.version);
    // The upstream sees the rewritten authority, not the caller's.
    parts.headers.remove(HOST);
    let team_value = HeaderValue::from_str(team_id).map_err(|_| {
        GatewayError::Internal(format!("tenant id {team_id:?} is not a valid header value"))
    })?;
    parts.headers.insert(TEAM_ID_HEADER, team_value);

    let mut builder = Request::builder().method(parts.method).uri(target.as_str());
    for (name, value) in parts.headers.iter() {
        builder = builder.header(name, value);
    }

    Ok(builder.body(body.map_err(BoxError::from).boxed())?)
}
