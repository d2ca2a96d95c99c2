//! Metrics definitions for the gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const HTTP_REQUESTS: MetricDef = MetricDef {
    name: "gateway.http.requests",
    metric_type: MetricType::Counter,
    description: "Requests received on the request/response listener",
};

pub const STREAMS_OPENED: MetricDef = MetricDef {
    name: "gateway.streams.opened",
    metric_type: MetricType::Counter,
    description: "Streams opened on the streaming listener",
};

pub const UNAUTHORIZED: MetricDef = MetricDef {
    name: "gateway.unauthorized",
    metric_type: MetricType::Counter,
    description: "Requests or streams rejected for missing or unknown tokens",
};

pub const NO_ENDPOINT: MetricDef = MetricDef {
    name: "gateway.no_endpoint",
    metric_type: MetricType::Counter,
    description: "Requests or streams whose shard had no configured endpoint",
};

pub const UPSTREAM_ERROR: MetricDef = MetricDef {
    name: "gateway.upstream_error",
    metric_type: MetricType::Counter,
    description: "Outbound connection or stream failures",
};

pub const GATEWAY_BYTES_IN: MetricDef = MetricDef {
    name: "gateway.bytes.in",
    metric_type: MetricType::Counter,
    description: "Payload bytes received from callers",
};

pub const GATEWAY_BYTES_OUT: MetricDef = MetricDef {
    name: "gateway.bytes.out",
    metric_type: MetricType::Counter,
    description: "Response bytes relayed back to callers",
};

pub const TRANSFER_DURATION: MetricDef = MetricDef {
    name: "gateway.transfer.duration",
    metric_type: MetricType::Histogram,
    description: "Time from receipt to completion of a request or stream in seconds",
};

pub const POOL_SESSION_ESTABLISHED: MetricDef = MetricDef {
    name: "pool.session.established",
    metric_type: MetricType::Counter,
    description: "Upstream sessions established",
};

pub const POOL_SESSION_REUSED: MetricDef = MetricDef {
    name: "pool.session.reused",
    metric_type: MetricType::Counter,
    description: "Acquisitions served by an existing upstream session",
};

pub const POOL_SESSION_CLOSED: MetricDef = MetricDef {
    name: "pool.session.closed",
    metric_type: MetricType::Counter,
    description: "Upstream sessions torn down",
};

pub const ALL_METRICS: &[MetricDef] = &[
    HTTP_REQUESTS,
    STREAMS_OPENED,
    UNAUTHORIZED,
    NO_ENDPOINT,
    UPSTREAM_ERROR,
    GATEWAY_BYTES_IN,
    GATEWAY_BYTES_OUT,
    TRANSFER_DURATION,
    POOL_SESSION_ESTABLISHED,
    POOL_SESSION_REUSED,
    POOL_SESSION_CLOSED,
];
