use crate::app_config::{AppConfig, Environment, PacingSettings};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_days = |var: &str, default: &str| -> Result<i64, ConfigError> {
        let days = or_default(var, default)
            .parse::<i64>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if days <= 0 {
            return Err(invalid(var, format!("must be positive, got {days}")));
        }
        Ok(days)
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        match or_default(var, default).trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got \"{other}\""))),
        }
    };

    let parse_pace = |var: &str, default: u64, floor: u64| -> Result<u64, ConfigError> {
        let ms = parse_u64(var, &default.to_string())?;
        if ms < floor {
            return Err(invalid(
                var,
                format!("{ms}ms is below the upstream minimum of {floor}ms"),
            ));
        }
        Ok(ms)
    };

    let spapi_refresh_token = require("SPAPI_REFRESH_TOKEN")?;
    let spapi_client_id = require("SPAPI_CLIENT_ID")?;
    let spapi_client_secret = require("SPAPI_CLIENT_SECRET")?;

    let env = parse_environment(&or_default("SELLERDESK_ENV", "development"))?;

    let bind_addr = or_default("SELLERDESK_BIND_ADDR", "0.0.0.0:3000")
        .parse::<SocketAddr>()
        .map_err(|e| invalid("SELLERDESK_BIND_ADDR", e.to_string()))?;
    let log_level = or_default("SELLERDESK_LOG_LEVEL", "info");
    let data_dir = PathBuf::from(or_default("SELLERDESK_DATA_DIR", "./data"));

    let spapi_endpoint = or_default(
        "SPAPI_ENDPOINT",
        "https://sellingpartnerapi-fe.amazon.com",
    );
    let spapi_token_url = or_default("SPAPI_TOKEN_URL", "https://api.amazon.com/auth/o2/token");
    let spapi_marketplace_id = or_default("SPAPI_MARKETPLACE_ID", "A1VC38T7YXB528");

    let request_timeout_secs = parse_u64("SELLERDESK_REQUEST_TIMEOUT_SECS", "300")?;
    if request_timeout_secs == 0 {
        return Err(invalid(
            "SELLERDESK_REQUEST_TIMEOUT_SECS",
            "timeout must be finite and non-zero".to_string(),
        ));
    }
    let user_agent = or_default("SELLERDESK_USER_AGENT", "sellerdesk/0.1 (order-operations)");

    let defaults = PacingSettings::default();
    let floor = PacingSettings::FLOOR;
    let pacing = PacingSettings {
        orders_ms: parse_pace(
            "SELLERDESK_PACE_ORDERS_MS",
            defaults.orders_ms,
            floor.orders_ms,
        )?,
        order_items_ms: parse_pace(
            "SELLERDESK_PACE_ORDER_ITEMS_MS",
            defaults.order_items_ms,
            floor.order_items_ms,
        )?,
        catalog_ms: parse_pace(
            "SELLERDESK_PACE_CATALOG_MS",
            defaults.catalog_ms,
            floor.catalog_ms,
        )?,
        solicitations_ms: parse_pace(
            "SELLERDESK_PACE_SOLICITATIONS_MS",
            defaults.solicitations_ms,
            floor.solicitations_ms,
        )?,
    };

    let enrich_group_size = parse_usize("SELLERDESK_ENRICH_GROUP_SIZE", "3")?;
    if !(2..=5).contains(&enrich_group_size) {
        return Err(invalid(
            "SELLERDESK_ENRICH_GROUP_SIZE",
            format!("must be between 2 and 5, got {enrich_group_size}"),
        ));
    }
    let enrich_group_pause_ms = parse_u64("SELLERDESK_ENRICH_GROUP_PAUSE_MS", "2000")?;
    let background_enrichment = parse_bool("SELLERDESK_BACKGROUND_ENRICHMENT", "false")?;
    let default_target_count = parse_usize("SELLERDESK_DEFAULT_TARGET_COUNT", "100")?;
    if default_target_count == 0 {
        return Err(invalid(
            "SELLERDESK_DEFAULT_TARGET_COUNT",
            "must be at least 1".to_string(),
        ));
    }

    let cache_ttl_secs = parse_u64("SELLERDESK_CACHE_TTL_SECS", "1800")?;
    let snapshot_ttl_secs = parse_u64("SELLERDESK_SNAPSHOT_TTL_SECS", "86400")?;
    let retention_days = parse_days("SELLERDESK_RETENTION_DAYS", "30")?;
    let review_window_days = parse_days("SELLERDESK_REVIEW_WINDOW_DAYS", "30")?;
    let recheck_limit = parse_usize("SELLERDESK_RECHECK_LIMIT", "20")?;
    let sync_cron = or_default("SELLERDESK_SYNC_CRON", "0 0 */6 * * *");

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        data_dir,
        spapi_endpoint,
        spapi_token_url,
        spapi_marketplace_id,
        spapi_refresh_token,
        spapi_client_id,
        spapi_client_secret,
        request_timeout_secs,
        user_agent,
        pacing,
        enrich_group_size,
        enrich_group_pause_ms,
        background_enrichment,
        default_target_count,
        cache_ttl_secs,
        snapshot_ttl_secs,
        retention_days,
        review_window_days,
        recheck_limit,
        sync_cron,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] for anything other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "SELLERDESK_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
