use crate::resolver::{ResolvedToken, ResolverError, TokenResolver};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory resolver for tests: a fixed token table plus call counters.
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, ResolvedToken>,
    resolve_calls: AtomicUsize,
    used: Mutex<Vec<String>>,
}

impl StaticTokenResolver {
    pub fn new(tokens: impl IntoIterator<Item = (String, ResolvedToken)>) -> Self {
        StaticTokenResolver {
            tokens: tokens.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Resolver that knows a single token.
    pub fn with_token(token: &str, team_id: &str, assigned_shard: Option<&str>) -> Self {
        Self::new([(
            token.to_string(),
            ResolvedToken {
                team_id: team_id.to_string(),
                assigned_shard: assigned_shard.map(str::to_string),
                token_id: format!("tok_{team_id}"),
            },
        )])
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn used_token_ids(&self) -> Vec<String> {
        self.used.lock().clone()
    }
}

#[async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Result<Option<ResolvedToken>, ResolverError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tokens.get(token).cloned())
    }

    async fn mark_used(&self, token_id: &str) -> Result<(), ResolverError> {
        self.used.lock().push(token_id.to_string());
        Ok(())
    }
}
