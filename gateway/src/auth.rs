use crate::routing;
use authn::{AuthCache, AuthorizationRecord, token_prefix};
use http::HeaderMap;
use http::header::AUTHORIZATION;
use url::Url;

/// Outcome of the shared authenticate-and-route step.
pub enum RouteDecision {
    /// Missing or unresolvable token.
    Unauthorized,
    /// Authenticated, but the assigned shard has no configured endpoint.
    NoEndpoint { record: AuthorizationRecord },
    /// Authenticated and routable.
    Forward {
        record: AuthorizationRecord,
        endpoint: Url,
    },
}

/// Extracts the bearer token from the `Authorization` header. The `Bearer `
/// scheme prefix is optional and matched case-insensitively; agents may send
/// the bare token as the entire header value.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

/// Single authentication and routing policy shared by both transports. The
/// resolver is never consulted when no token is present at all.
pub async fn authenticate_and_route(
    cache: &AuthCache,
    headers: &HeaderMap,
    endpoints: &[Url],
) -> RouteDecision {
    let Some(token) = extract_bearer(headers) else {
        return RouteDecision::Unauthorized;
    };

    let record = match cache.resolve(token).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(token_prefix = token_prefix(token), "unknown ingestion token");
            return RouteDecision::Unauthorized;
        }
        Err(err) => {
            tracing::warn!(
                token_prefix = token_prefix(token),
                error = %err,
                "token resolution failed"
            );
            return RouteDecision::Unauthorized;
        }
    };

    match routing::route(record.assigned_shard.as_deref(), endpoints) {
        Some(endpoint) => RouteDecision::Forward {
            endpoint: endpoint.clone(),
            record,
        },
        None => RouteDecision::NoEndpoint { record },
    }
}
