use crate::accounting::{MeteredBody, Transfer};
use crate::auth::{RouteDecision, authenticate_and_route};
use crate::errors::{GatewayError, Result};
use crate::metrics_defs::{NO_ENDPOINT, STREAMS_OPENED, UNAUTHORIZED, UPSTREAM_ERROR};
use crate::pool::ConnectionPool;
use crate::{BoxError, OutboundBody, TEAM_ID_HEADER, routing};
use authn::AuthCache;
use http::header::{HOST, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use shared::counter;
use shared::http::error_response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

struct StreamGatewayInner {
    auth_cache: Arc<AuthCache>,
    pool: ConnectionPool,
    endpoints: Vec<Url>,
}

/// Streaming ingestion gateway: authenticates every inbound stream and
/// bridges it to a stream opened on the pooled session for its shard.
///
/// One underlying client connection carries many streams; failures stay
/// local to the stream they hit.
#[derive(Clone)]
pub struct StreamGateway {
    inner: Arc<StreamGatewayInner>,
}

impl StreamGateway {
    pub fn new(auth_cache: Arc<AuthCache>, pool: ConnectionPool, endpoints: Vec<Url>) -> Self {
        StreamGateway {
            inner: Arc::new(StreamGatewayInner {
                auth_cache,
                pool,
                endpoints,
            }),
        }
    }
}

impl Service<Request<Incoming>> for StreamGateway {
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
                    tracing::error!(error = %err, "stream handling failed");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
            Ok(response)
        })
    }
}

async fn handle(
    inner: Arc<StreamGatewayInner>,
    req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, GatewayError>>> {
    counter!(STREAMS_OPENED).increment(1);
    tracing::debug!(method = %req.method(), path = req.uri().path(), "stream opened");

    let (parts, body) = req.into_parts();
    let transfer = Transfer::new("stream");
    let body = MeteredBody::inbound(body, transfer.clone());

    match authenticate_and_route(&inner.auth_cache, &parts.headers, &inner.endpoints).await {
        RouteDecision::Unauthorized => {
            counter!(UNAUTHORIZED).increment(1);
            transfer.set_status(StatusCode::UNAUTHORIZED);
            // Fail this stream only; the connection and its sibling streams
            // stay up. Whatever the caller sends before seeing the rejection
            // is still drained and accounted for.
            tokio::spawn(async move {
                body.drain().await;
                transfer.finish();
            });
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
            transfer.set_route(&record.team_id, shard);
            transfer.set_status(StatusCode::SERVICE_UNAVAILABLE);
            tokio::spawn(async move {
                body.drain().await;
                transfer.finish();
            });
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
                "bridging stream"
            );

            let mut session = match inner.pool.acquire(&endpoint).await {
                Ok(session) => session,
                Err(err) => {
                    // Failure to produce a usable session is an
                    // establishment-phase problem.
                    counter!(UPSTREAM_ERROR).increment(1);
                    tracing::error!(endpoint = %endpoint, error = %err, "no usable session for shard");
                    transfer.set_status(StatusCode::SERVICE_UNAVAILABLE);
                    tokio::spawn(async move {
                        body.drain().await;
                        transfer.finish();
                    });
                    return Ok(error_response(StatusCode::SERVICE_UNAVAILABLE));
                }
            };

            let outbound = build_outbound_stream(&endpoint, parts, &record.team_id, body)?;
            match session.send_request(outbound).await {
                Ok(response) => {
                    transfer.set_status(response.status());
                    let (parts, body) = response.into_parts();
                    // Bridging is hyper's streaming relay in both directions;
                    // dropping either side resets the other. The metered
                    // wrapper finalizes accounting on completion or abort.
                    let body = MeteredBody::outbound(body, transfer)
                        .map_err(GatewayError::from)
                        .boxed();
                    Ok(Response::from_parts(parts, body))
                }
                Err(err) => {
                    counter!(UPSTREAM_ERROR).increment(1);
                    if session.is_closed() {
                        // A reset on a session that was established and in
                        // use is expected idle reclamation by the peer.
                        tracing::debug!(endpoint = %endpoint, error = %err, "pooled session reset mid-stream");
                    } else {
                        tracing::error!(endpoint = %endpoint, error = %err, "outbound stream failed");
                    }
                    inner.pool.purge_endpoint(&endpoint);
                    transfer.set_status(StatusCode::BAD_GATEWAY);
                    transfer.finish();
                    Ok(error_response(StatusCode::BAD_GATEWAY))
                }
            }
        }
    }
}

fn build_outbound_stream(
    endpoint: &Url,
    mut parts: http::request::Parts,
    team_id: &str,
    body: MeteredBody<Incoming>,
) -> Result<Request<OutboundBody>> {
    // The authority is rewritten to the endpoint; everything else passes
    // through as the caller sent it.
    let target = routing::target_url(endpoint, &parts.uri);

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
