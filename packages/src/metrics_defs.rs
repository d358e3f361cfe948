//! Metrics definitions for artifact resolution.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ARTIFACT_RESOLUTIONS: MetricDef = MetricDef {
    name: "artifact.resolutions",
    metric_type: MetricType::Counter,
    description: "Artifact redirect requests. Tagged with outcome.",
};

pub const INDEX_REQUEST_DURATION: MetricDef = MetricDef {
    name: "index.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch release metadata from the index in seconds. Tagged with status.",
};

pub const ALL_METRICS: &[MetricDef] = &[ARTIFACT_RESOLUTIONS, INDEX_REQUEST_DURATION];
