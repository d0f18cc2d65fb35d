use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use telemetry_archiver::app::AppContext;
use telemetry_archiver::config::Config;
use telemetry_archiver::pipeline::cutoff::{compute_cutoff, Cutoff, CutoffUnit};
use telemetry_archiver::pipeline::schema::{available_schemas, get_schema, FieldMode};
use telemetry_archiver::pipeline::{ArchiveRequest, Scheduler};
use telemetry_archiver::{logging, metrics, server};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "telemetry_archiver")]
#[command(about = "Moves aged extension telemetry from the realtime store into the warehouse")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the HTTP trigger until interrupted
    Serve,
    /// Run one archive pass and exit
    Run {
        /// Destination table
        #[arg(long)]
        table: Option<String>,
        /// Schema registry entry
        #[arg(long)]
        schema: Option<String>,
        /// Archive leaves older than this many units
        #[arg(long)]
        older_than: Option<u32>,
        /// hours or days
        #[arg(long)]
        unit: Option<CutoffUnit>,
        /// Archive every leaf regardless of age
        #[arg(long, conflicts_with = "older_than")]
        all: bool,
        /// Leave archived leaves in the source store
        #[arg(long)]
        keep_source: bool,
        /// Scan and validate without loading or deleting
        #[arg(long)]
        dry_run: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the registered schemas
    Schemas,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let _log_guard = logging::init_logging(&config.logging);
    metrics::init_metrics(config.metrics.listen.as_deref());

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Run {
            table,
            schema,
            older_than,
            unit,
            all,
            keep_source,
            dry_run,
            json,
        } => {
            let ctx = AppContext::new(config);
            let policy = ctx.policy();
            let cutoff = if all {
                Cutoff::All
            } else {
                compute_cutoff(
                    older_than.unwrap_or(policy.older_than),
                    unit.unwrap_or(policy.unit),
                    Utc::now(),
                )
            };
            let request = ArchiveRequest::new(cutoff, table.as_deref().unwrap_or(&policy.table))
                .schema(schema.as_deref().unwrap_or(&policy.schema))
                .keep_source(keep_source || !policy.delete_after_archive)
                .dry_run(dry_run);
            run_once(&ctx, &request, json).await
        }
        Commands::Schemas => {
            for name in available_schemas() {
                println!("{}", name);
                for field in get_schema(name)? {
                    println!(
                        "  {:<12} {:?} {:?}",
                        field.name,
                        field.field_type,
                        field.mode.unwrap_or(FieldMode::Nullable)
                    );
                }
            }
            Ok(())
        }
    }
}

async fn run_once(ctx: &AppContext, request: &ArchiveRequest, json: bool) -> Result<()> {
    let archiver = ctx.archiver().await.context("building archiver")?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let report = archiver.run(request, &cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n📦 Archive run {}", report.run_id);
        println!("   Selected: {}", report.selected);
        println!("   Archived: {}", report.archived);
        println!("   Deleted:  {}", report.deleted);
        if !report.failed_batches.is_empty() {
            println!("   Failed batches: {:?}", report.failed_batches);
        }
        println!("   {}", report.message());
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let scheduler_enabled = config.scheduler.enabled;
    let server_enabled = config.server.enabled;
    if !scheduler_enabled && !server_enabled {
        anyhow::bail!("both scheduler and server are disabled; nothing to serve");
    }
    if server_enabled && config.server.api_key.is_none() {
        warn!("ARCHIVE_API_KEY is not set; POST /api/archive will answer 500");
    }

    let ctx = Arc::new(AppContext::new(config));
    let shutdown = CancellationToken::new();

    let scheduler = scheduler_enabled
        .then(|| Scheduler::from_context(Arc::clone(&ctx)).spawn(shutdown.clone()));
    let server = server_enabled
        .then(|| tokio::spawn(server::start_server(Arc::clone(&ctx), shutdown.clone())));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown requested");
    shutdown.cancel();

    if let Some(handle) = scheduler {
        handle.await.context("scheduler task")?;
    }
    if let Some(handle) = server {
        if let Err(e) = handle.await.context("server task")? {
            error!("HTTP server stopped with error: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}
