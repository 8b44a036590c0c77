use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use procura as api;

#[derive(Parser)]
#[command(name = "procura", about = "Procurement and inventory reconciliation core", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Load configuration and verify the database is reachable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;

    match cli.command {
        Commands::Migrate => {
            api::db::run_migrations(&db_pool).await.map_err(|e| {
                error!("Failed running migrations: {}", e);
                e
            })?;
            report(cli.json, "migrations applied", &cfg.environment);
        }
        Commands::Check => {
            if cfg.auto_migrate {
                api::db::run_migrations(&db_pool).await?;
            }
            api::db::check_connection(&db_pool).await?;
            report(cli.json, "database reachable", &cfg.environment);
        }
    }

    api::db::close_pool(db_pool).await?;
    Ok(())
}

fn report(as_json: bool, message: &str, environment: &str) {
    if as_json {
        let body = json!({
            "status": "ok",
            "message": message,
            "environment": environment,
            "version": env!("CARGO_PKG_VERSION"),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
        );
    } else {
        info!(environment = %environment, "{}", message);
        println!("{}", message);
    }
}
