pub mod app_config;
pub mod config;
pub mod orders;

use thiserror::Error;

pub use app_config::{AppConfig, Environment, PacingSettings};
pub use config::{load_app_config, load_app_config_from_env};
pub use orders::{
    dedupe_orders, BuyerInfo, CachedOrderCollection, Customer, FulfillmentChannel, ItemState,
    Money, Order, OrderItem, OrderStatus, ReviewRequestStatus, ReviewState, ShippingAddress,
    SolicitationReason,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
