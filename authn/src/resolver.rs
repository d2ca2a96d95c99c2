use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    #[error("credential store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential store returned unexpected status: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("invalid credential store URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// A token successfully resolved by the credential store.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedToken {
    pub team_id: String,
    #[serde(default)]
    pub assigned_shard: Option<String>,
    pub token_id: String,
}

/// Contract with the external credential store.
///
/// `resolve` may be slow (network round trip); callers are expected to go
/// through the [`AuthCache`](crate::cache::AuthCache) so it only runs on a
/// cache miss. `mark_used` is fire-and-forget bookkeeping: the cache spawns
/// it detached and a failure never affects the request path.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// Resolves a raw bearer token. `Ok(None)` means the token is unknown.
    async fn resolve(&self, token: &str) -> Result<Option<ResolvedToken>, ResolverError>;

    /// Records that a token was used for ingestion.
    async fn mark_used(&self, token_id: &str) -> Result<(), ResolverError>;
}

/// Resolver backed by the credential store's internal HTTP API.
pub struct HttpTokenResolver {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTokenResolver {
    pub fn new(base_url: Url) -> Self {
        HttpTokenResolver {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ResolverError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }
}

#[async_trait]
impl TokenResolver for HttpTokenResolver {
    async fn resolve(&self, token: &str) -> Result<Option<ResolvedToken>, ResolverError> {
        let url = self.endpoint("internal/ingest-tokens/resolve")?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<ResolvedToken>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ResolverError::UnexpectedStatus(status)),
        }
    }

    async fn mark_used(&self, token_id: &str) -> Result<(), ResolverError> {
        let url = self.endpoint(&format!("internal/ingest-tokens/{token_id}/used"))?;
        let response = self.client.post(url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ResolverError::UnexpectedStatus(response.status()))
        }
    }
}
