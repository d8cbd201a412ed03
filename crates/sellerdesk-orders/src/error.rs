use std::path::PathBuf;

use sellerdesk_spapi::SpApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrdersError {
    /// The request itself is malformed. Nothing was processed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A failure from the upstream API that the operation cannot contain.
    #[error("upstream API error: {0}")]
    Upstream(#[from] SpApiError),

    #[error("snapshot I/O error at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot at {path} is not valid JSON: {source}")]
    SnapshotFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown order id(s): {}", .0.join(", "))]
    UnknownOrders(Vec<String>),
}

impl OrdersError {
    /// True when the upstream rejected our credentials; callers should ask
    /// for reconfiguration rather than retry.
    #[must_use]
    pub fn is_upstream_auth(&self) -> bool {
        matches!(self, Self::Upstream(e) if e.is_auth())
    }
}
