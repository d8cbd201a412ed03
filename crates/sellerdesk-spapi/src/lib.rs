pub mod api;
pub mod client;
pub mod error;
pub mod pacing;
pub mod parse;
pub mod token;
pub mod types;

pub use api::MarketplaceApi;
pub use client::{ClientOptions, SpApiClient};
pub use error::SpApiError;
pub use pacing::{Endpoint, EndpointPacers, Pacer};
pub use parse::{parse_order, parse_order_item, ParseError};
pub use token::{Credentials, TokenProvider};
pub use types::{
    CatalogItem, OrdersPage, OrdersQuery, RawOrder, RawOrderItem, SolicitationActions,
    REVIEW_ACTION,
};
