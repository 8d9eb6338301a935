use crate::buildinfo;

pub async fn healthz() -> &'static str {
    "OK"
}

pub async fn version() -> &'static str {
    buildinfo::VERSION
}

/// Placeholder scrape target; no metrics are exported yet.
pub async fn metrics() -> &'static str {
    ""
}
