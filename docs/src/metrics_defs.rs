use shared::metrics_defs::{MetricDef, MetricType};

pub const REDIRECT_TABLE_REFRESHES: MetricDef = MetricDef {
    name: "redirect_table.refreshes",
    metric_type: MetricType::Counter,
    description: "Redirect table refresh cycles. Tagged with outcome.",
};

pub const REDIRECT_TABLE_SIZE: MetricDef = MetricDef {
    name: "redirect_table.size",
    metric_type: MetricType::Gauge,
    description: "Number of projects in the published redirect table",
};

pub const DOCS_RESPONSES: MetricDef = MetricDef {
    name: "docs.responses",
    metric_type: MetricType::Counter,
    description: "Documentation requests. Tagged with outcome.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REDIRECT_TABLE_REFRESHES,
    REDIRECT_TABLE_SIZE,
    DOCS_RESPONSES,
];
