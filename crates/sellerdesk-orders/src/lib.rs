pub mod cache;
pub mod enrich;
pub mod error;
pub mod jobs;
pub mod pagination;
pub mod review;
pub mod service;
pub mod snapshot;
pub mod store;

pub use cache::OrderCache;
pub use enrich::{EnrichOutcome, EnrichSettings, Enricher};
pub use error::OrdersError;
pub use jobs::{JobHandle, JobProgress, JobRegistry, JobReporter, JobState, JobStream};
pub use pagination::{fetch_orders, FetchOutcome, FetchRequest, StopReason};
pub use review::{
    eligible_orders, is_locally_eligible, EmailMessage, EmailSink, ReviewDispatcher,
    ReviewRequest, ReviewRequestBatch, TracingEmailSink,
};
pub use service::{
    EligibilityReport, HealthReport, ListOrdersQuery, OrderListing, OrderService, RequestKind,
    SendOutcome, SendReviewRequest, ServiceSettings, SyncReport,
};
pub use store::{merge_orders, MergeOutcome, OrderStore, PruneOutcome};
