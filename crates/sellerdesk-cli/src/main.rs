mod commands;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sellerdesk")]
#[command(about = "Marketplace order operations: fetch, sync, and review requests")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch orders (from cache unless --refresh) and print the listing
    Fetch {
        /// Number of orders to collect across pages
        #[arg(long)]
        max_results: Option<usize>,
        /// Only orders created at or after this RFC 3339 timestamp
        #[arg(long)]
        created_after: Option<DateTime<Utc>>,
        /// Only orders created before this RFC 3339 timestamp
        #[arg(long)]
        created_before: Option<DateTime<Utc>>,
        /// Resume from a continuation token
        #[arg(long)]
        next_token: Option<String>,
        /// Bypass the cache
        #[arg(long)]
        refresh: bool,
    },
    /// Prune, fetch new orders, and recheck eligibility
    Sync,
    /// Drop orders older than the retention window
    Prune,
    /// List stored orders that are eligible for a review request
    Eligible,
    /// Ask the marketplace whether the given orders can be solicited
    Check {
        #[arg(required = true)]
        order_ids: Vec<String>,
    },
    /// Send review requests for the given orders
    Send {
        #[arg(required = true)]
        order_ids: Vec<String>,
        /// Process several orders in one run
        #[arg(long)]
        batch: bool,
        /// Email template text; sends by email instead of the marketplace
        #[arg(long, conflicts_with = "template_file")]
        template: Option<String>,
        /// Read the email template from a file
        #[arg(long)]
        template_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("sellerdesk: no command given (try --help)");
        return Ok(());
    };

    let config = sellerdesk_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let service = commands::build_service(&config).await?;

    match command {
        Commands::Fetch {
            max_results,
            created_after,
            created_before,
            next_token,
            refresh,
        } => {
            let query = sellerdesk_orders::ListOrdersQuery {
                refresh,
                created_after,
                created_before,
                next_token,
                max_results,
            };
            commands::run_fetch(&service, &query).await?;
        }
        Commands::Sync => commands::run_sync(&service).await?,
        Commands::Prune => commands::run_prune(&service).await?,
        Commands::Eligible => commands::run_eligible(&service).await?,
        Commands::Check { order_ids } => commands::run_check(&service, &order_ids).await?,
        Commands::Send {
            order_ids,
            batch,
            template,
            template_file,
        } => {
            let template = match template_file {
                Some(path) => Some(tokio::fs::read_to_string(&path).await.map_err(|e| {
                    anyhow::anyhow!("failed to read template {}: {e}", path.display())
                })?),
                None => template,
            };
            commands::run_send(&service, order_ids, batch, template).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests;
