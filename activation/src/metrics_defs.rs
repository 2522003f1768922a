//! Metrics definitions for the activation service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ACTIVATION_STEP_DURATION: MetricDef = MetricDef {
    name: "activation.step.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a single activation step in seconds",
};

pub const ACTIVATION_CACHE_HIT: MetricDef = MetricDef {
    name: "activation.cache.hit",
    metric_type: MetricType::Counter,
    description: "Activations answered from a completed experience record",
};

pub const ACTIVATION_FAILURE: MetricDef = MetricDef {
    name: "activation.failure",
    metric_type: MetricType::Counter,
    description: "Activation attempts that stopped at a failed step",
};

pub const ACTIVATION_AUTH_RETRY: MetricDef = MetricDef {
    name: "activation.auth_retry",
    metric_type: MetricType::Counter,
    description: "Steps retried after the upstream rejected credentials",
};

pub const TOKEN_REFRESH: MetricDef = MetricDef {
    name: "token.refresh",
    metric_type: MetricType::Counter,
    description: "OAuth refresh calls issued for the Personalize token",
};

pub const TOKEN_REFRESH_FAILURE: MetricDef = MetricDef {
    name: "token.refresh.failure",
    metric_type: MetricType::Counter,
    description: "OAuth refresh calls that failed and fell back to the static token",
};

pub const ALIAS_CACHE_REBUILD: MetricDef = MetricDef {
    name: "alias_cache.rebuild",
    metric_type: MetricType::Counter,
    description: "Full rebuilds of the team to variant alias map",
};

pub const UPSTREAM_ERROR: MetricDef = MetricDef {
    name: "upstream.error",
    metric_type: MetricType::Counter,
    description: "Non-2xx responses received from upstream APIs",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ACTIVATION_STEP_DURATION,
    ACTIVATION_CACHE_HIT,
    ACTIVATION_FAILURE,
    ACTIVATION_AUTH_RETRY,
    TOKEN_REFRESH,
    TOKEN_REFRESH_FAILURE,
    ALIAS_CACHE_REBUILD,
    UPSTREAM_ERROR,
];
