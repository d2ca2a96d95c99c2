pub mod cache;
pub mod metrics_defs;
pub mod resolver;
pub mod testutils;

pub use cache::{AuthCache, AuthorizationRecord, token_hash, token_prefix};
pub use resolver::{HttpTokenResolver, ResolvedToken, ResolverError, TokenResolver};
