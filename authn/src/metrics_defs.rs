//! Metrics definitions for authentication.

use shared::metrics_defs::{MetricDef, MetricType};

pub const AUTH_CACHE_HIT: MetricDef = MetricDef {
    name: "auth_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of token resolutions served from the cache",
};

pub const AUTH_CACHE_MISS: MetricDef = MetricDef {
    name: "auth_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of token resolutions that required a credential store call",
};

pub const TOKEN_MARK_USED_FAILURE: MetricDef = MetricDef {
    name: "token.mark_used.failure",
    metric_type: MetricType::Counter,
    description: "Number of failed best-effort usage-marking calls",
};

pub const ALL_METRICS: &[MetricDef] = &[AUTH_CACHE_HIT, AUTH_CACHE_MISS, TOKEN_MARK_USED_FAILURE];
