use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Minimum spacing between consecutive calls to each upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingSettings {
    pub orders_ms: u64,
    pub order_items_ms: u64,
    pub catalog_ms: u64,
    pub solicitations_ms: u64,
}

impl PacingSettings {
    /// Upstream-documented floors. Configured values may only be slower.
    pub const FLOOR: PacingSettings = PacingSettings {
        orders_ms: 0,
        order_items_ms: 2_000,
        catalog_ms: 300,
        solicitations_ms: 1_000,
    };
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            orders_ms: 1_000,
            ..Self::FLOOR
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub spapi_endpoint: String,
    pub spapi_token_url: String,
    pub spapi_marketplace_id: String,
    pub spapi_refresh_token: String,
    pub spapi_client_id: String,
    pub spapi_client_secret: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub pacing: PacingSettings,
    pub enrich_group_size: usize,
    pub enrich_group_pause_ms: u64,
    pub background_enrichment: bool,
    pub default_target_count: usize,
    pub cache_ttl_secs: u64,
    pub snapshot_ttl_secs: u64,
    pub retention_days: i64,
    pub review_window_days: i64,
    pub recheck_limit: usize,
    pub sync_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("data_dir", &self.data_dir)
            .field("spapi_endpoint", &self.spapi_endpoint)
            .field("spapi_token_url", &self.spapi_token_url)
            .field("spapi_marketplace_id", &self.spapi_marketplace_id)
            .field("spapi_refresh_token", &"[redacted]")
            .field("spapi_client_id", &self.spapi_client_id)
            .field("spapi_client_secret", &"[redacted]")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("pacing", &self.pacing)
            .field("enrich_group_size", &self.enrich_group_size)
            .field("enrich_group_pause_ms", &self.enrich_group_pause_ms)
            .field("background_enrichment", &self.background_enrichment)
            .field("default_target_count", &self.default_target_count)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("snapshot_ttl_secs", &self.snapshot_ttl_secs)
            .field("retention_days", &self.retention_days)
            .field("review_window_days", &self.review_window_days)
            .field("recheck_limit", &self.recheck_limit)
            .field("sync_cron", &self.sync_cron)
            .finish()
    }
}
