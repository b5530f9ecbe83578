use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use homestead::config::{Config, DatabaseBackend};
use homestead::stats::compute_dashboard_stats;
use homestead::storage::{PostgresStorage, SqliteStorage, Storage};
use homestead::views::ViewCounter;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "homestead-admin")]
#[command(about = "Homestead property view admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the total view count of a property
    Count {
        /// Property ID
        property_id: String,
    },
    /// Print dashboard statistics (computed directly, never cached)
    Stats,
    /// List recorded views of a property, newest first
    Views {
        /// Property ID
        property_id: String,
        /// Maximum number of rows to print
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await.context("failed to initialize database schema")?;

    let offset = config.views.timezone_offset;
    let counter = ViewCounter::new(Arc::clone(&storage), offset);

    match cli.command {
        Commands::Count { property_id } => {
            let count = counter.get_view_count(&property_id).await?;
            println!("{}: {} view(s)", property_id, count);
        }
        Commands::Stats => {
            let stats = compute_dashboard_stats(
                storage.as_ref(),
                Utc::now(),
                offset,
                config.stats.top_properties,
            )
            .await?;
            println!("Day ({}):          {}", offset, stats.today);
            println!("Total views:            {}", stats.total_views);
            println!("Views today:            {}", stats.views_today);
            println!("Unique viewers today:   {}", stats.unique_viewers_today);
            println!("Properties viewed:      {}", stats.properties_viewed);
            if !stats.top_properties.is_empty() {
                println!();
                println!("{:<40} {}", "Property ID", "Views");
                println!("{}", "-".repeat(50));
                for entry in stats.top_properties {
                    println!("{:<40} {}", entry.property_id, entry.view_count);
                }
            }
        }
        Commands::Views { property_id, limit } => {
            let views = counter.list_views(&property_id, limit, 0).await?;
            if views.is_empty() {
                println!("No views recorded for '{}'.", property_id);
            } else {
                println!("{:<12} {:<40} {}", "Date", "Viewer IP", "Profile");
                println!("{}", "-".repeat(80));
                for view in views {
                    println!(
                        "{:<12} {:<40} {}",
                        view.viewed_date,
                        view.viewer_ip,
                        view.viewer_profile_id.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }

    Ok(())
}
