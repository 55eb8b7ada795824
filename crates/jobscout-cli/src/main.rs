use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jobscout_storage::{JobStore, MemoryJobStore, PgJobStore};
use jobscout_sync::{
    build_scheduler, format_recent_jobs, format_run_summary, maybe_build_scheduler,
    recently_discovered, CrawlPipeline, ScraperConfig,
};
use jobscout_web::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pool size for web handlers; scheduled crawls keep their own single connection.
const WEB_POOL_CONNECTIONS: u32 = 5;

#[derive(Debug, Parser)]
#[command(name = "jobscout-cli")]
#[command(about = "Discover job listings through search results and track them over time")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl result pages, reconcile them into the store and print today's jobs.
    Crawl(CrawlArgs),
    /// Apply pending database migrations.
    Migrate,
    /// Print jobs discovered in a trailing window.
    Recent {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Serve the web report.
    Serve,
    /// Crawl on the configured cron schedule until interrupted.
    Watch,
}

#[derive(Debug, Default, Args)]
struct CrawlArgs {
    /// Replay saved result pages (page-1.html, page-2.html, ...) instead of searching live.
    #[arg(long, value_name = "DIR")]
    snapshots: Option<PathBuf>,
    /// Reconcile into an in-memory store; nothing is written to the database.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    report_days: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jobscout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = ScraperConfig::from_env();

    match cli.command.unwrap_or(Commands::Crawl(CrawlArgs::default())) {
        Commands::Crawl(args) => crawl(config, args).await?,
        Commands::Migrate => {
            connect_store(&config).await?;
            println!("migrations applied");
        }
        Commands::Recent { days } => {
            let store = PgJobStore::connect(&config.database_url)
                .await
                .context("connecting to job store")?;
            let days = days.unwrap_or(config.report_days);
            let jobs = recently_discovered(&store, days).await?;
            println!("{}", format_recent_jobs(&jobs, days));
        }
        Commands::Serve => {
            let crawl_store: Arc<dyn JobStore> = Arc::new(connect_store(&config).await?);
            let web_store = PgJobStore::connect_with(&config.database_url, WEB_POOL_CONNECTIONS)
                .await
                .context("connecting web pool")?;
            let state = AppState::new(Arc::new(web_store), config.report_days);
            let port = config.web_port;
            let pipeline = Arc::new(CrawlPipeline::new(config, crawl_store)?);
            let scheduler = maybe_build_scheduler(pipeline).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
                info!("crawl scheduler running");
            }
            jobscout_web::serve(state, port).await?;
        }
        Commands::Watch => {
            let store: Arc<dyn JobStore> = Arc::new(connect_store(&config).await?);
            let cron = config.crawl_cron.clone();
            let pipeline = Arc::new(CrawlPipeline::new(config, store)?);
            let mut sched = build_scheduler(pipeline).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "waiting for scheduled crawls; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

async fn crawl(mut config: ScraperConfig, args: CrawlArgs) -> Result<()> {
    if let Some(dir) = args.snapshots {
        config.snapshot_dir = Some(dir);
    }
    let days = args.report_days.unwrap_or(config.report_days);

    let store: Arc<dyn JobStore> = if args.dry_run {
        info!("dry run: reconciling into an in-memory store");
        Arc::new(MemoryJobStore::new())
    } else {
        Arc::new(connect_store(&config).await?)
    };

    let pipeline = CrawlPipeline::new(config, Arc::clone(&store))?;
    let summary = pipeline.run_configured().await?;
    println!("{}", format_run_summary(&summary));

    let recent = recently_discovered(store.as_ref(), days).await?;
    println!();
    println!("{}", format_recent_jobs(&recent, days));
    Ok(())
}

async fn connect_store(config: &ScraperConfig) -> Result<PgJobStore> {
    let store = PgJobStore::connect(&config.database_url)
        .await
        .context("connecting to job store")?;
    store.migrate().await.context("applying migrations")?;
    Ok(store)
}
