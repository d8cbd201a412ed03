//! Per-endpoint request pacing.
//!
//! Each logical upstream endpoint has its own minimum spacing between call
//! starts. A [`Pacer`] holds its gate across the sleep, so concurrent callers
//! queue behind one another instead of bursting once the interval elapses.
//! The gate uses `tokio::time::Instant`, which makes pacing observable under
//! a paused test clock.

use std::fmt;
use std::time::Duration;

use sellerdesk_core::PacingSettings;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The logical upstream endpoints, each paced independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Orders,
    OrderItems,
    Catalog,
    Solicitations,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Endpoint::Orders => "orders",
            Endpoint::OrderItems => "order-items",
            Endpoint::Catalog => "catalog",
            Endpoint::Solicitations => "solicitations",
        };
        f.write_str(name)
    }
}

/// Enforces a minimum interval between consecutive acquisitions.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Waits until at least `interval` has passed since the previous
    /// acquisition, then records the new call start.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval.saturating_sub(elapsed)).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// One [`Pacer`] per [`Endpoint`].
#[derive(Debug)]
pub struct EndpointPacers {
    orders: Pacer,
    order_items: Pacer,
    catalog: Pacer,
    solicitations: Pacer,
}

impl EndpointPacers {
    #[must_use]
    pub fn new(settings: PacingSettings) -> Self {
        Self {
            orders: Pacer::new(Duration::from_millis(settings.orders_ms)),
            order_items: Pacer::new(Duration::from_millis(settings.order_items_ms)),
            catalog: Pacer::new(Duration::from_millis(settings.catalog_ms)),
            solicitations: Pacer::new(Duration::from_millis(settings.solicitations_ms)),
        }
    }

    /// No spacing at all. For tests against a local mock server.
    #[must_use]
    pub fn unpaced() -> Self {
        Self::new(PacingSettings {
            orders_ms: 0,
            order_items_ms: 0,
            catalog_ms: 0,
            solicitations_ms: 0,
        })
    }

    #[must_use]
    pub fn for_endpoint(&self, endpoint: Endpoint) -> &Pacer {
        match endpoint {
            Endpoint::Orders => &self.orders,
            Endpoint::OrderItems => &self.order_items,
            Endpoint::Catalog => &self.catalog,
            Endpoint::Solicitations => &self.solicitations,
        }
    }

    pub async fn acquire(&self, endpoint: Endpoint) {
        self.for_endpoint(endpoint).acquire().await;
    }
}
