use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use milkrun::config;
use milkrun::db;
use milkrun::materializer::SqlOrderMaterializer;
use milkrun::runner;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one subscription batch on demand and print the run report"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/milkrun.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    info!("running manual subscription batch");
    let report = runner::run_once(&pool, &SqlOrderMaterializer, chrono::Utc::now()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
