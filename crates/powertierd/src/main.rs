//! powertierd - The powertier background service
//!
//! This is the main entry point for the powertierd service.
//! It wires together all the components:
//! - Configuration loading
//! - State store initialization
//! - Tiered storage, aggregation jobs and the scheduler
//! - Remote replication (GitHub contents API)
//! - Home Assistant collector
//!
//! Besides the long-running daemon it exposes one-shot maintenance commands.

mod collector;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use collector::HomeAssistantSource;
use powertier_config::{Settings, load_config_or_default};
use powertier_core::{IngestOutcome, Orchestrator, SchedulerEvent, StatusReport};
use powertier_remote::{GitHubContentsStore, GitHubSettings, Replicator};
use powertier_store::{AuditEvent, AuditEventType, Reading, SqliteStore, StateStore, parse_timestamp};
use powertier_util::{
    JobName, TierName, check_metric_name, default_config_path, format_datetime_full,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// powertierd - Tiered retention, aggregation and sync of sensor readings
#[derive(Parser, Debug)]
#[command(name = "powertierd", version)]
#[command(about = "Tiered retention, aggregation and sync of sensor readings", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/powertier/config.toml)
    #[arg(short, long, env = "POWERTIER_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set POWERTIER_DATA_DIR env var)
    #[arg(short, long, env = "POWERTIER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until terminated (default)
    Daemon,
    /// Run every job once now, ignoring schedule and done markers
    Once,
    /// Run a single job once now
    Run {
        job: String,
    },
    /// Append one reading to the raw tier
    Ingest {
        /// Metric value as name=value; repeatable
        #[arg(short, long = "metric", required = true)]
        metrics: Vec<String>,
        /// Reading timestamp (default: now)
        #[arg(short, long)]
        timestamp: Option<String>,
    },
    /// Poll the configured Home Assistant sensors once and ingest the result
    Collect,
    /// Fetch replicated tiers from the remote store, overwriting local files
    Pull {
        /// Only this tier (default: all replicated tiers)
        tier: Option<String>,
    },
    /// Upload replicated tiers to the remote store
    Push {
        /// Only this tier (default: all replicated tiers)
        tier: Option<String>,
    },
    /// Forget the last known remote version of a tier after a conflict
    SyncReset {
        tier: String,
    },
    /// Turn maintenance mode on or off; readings are dropped while on
    Maintenance {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Show tiers, jobs, sync state and recent audit events
    Status {
        /// Number of audit events to show
        #[arg(long, default_value_t = 10)]
        audit: usize,
    },
    /// Copy a tier file elsewhere after checking it parses
    Export {
        tier: String,
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
}

/// Main service state
struct Service {
    settings: Settings,
    store: Arc<dyn StateStore>,
    orchestrator: Orchestrator,
    collector: Option<HomeAssistantSource>,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let mut settings = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        if let Some(data_dir) = &args.data_dir {
            settings.service.data_dir = data_dir.clone();
        }

        info!(
            config_path = %args.config.display(),
            tier_count = settings.tiers.len(),
            job_count = settings.jobs.len(),
            "Configuration loaded"
        );

        // Create data directory
        let data_dir = &settings.service.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = &settings.service.state_db;
        let store: Arc<dyn StateStore> = Arc::new(
            SqliteStore::open(db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        // Initialize replication
        let replicator = match &settings.remote {
            Some(remote) => {
                let backend = GitHubContentsStore::new(GitHubSettings {
                    api_base: remote.api_base.clone(),
                    repo: remote.repo.clone(),
                    branch: remote.branch.clone(),
                    token: remote.token.clone(),
                    timeout: remote.timeout,
                })
                .context("Failed to initialize remote store")?;
                Some(Arc::new(Replicator::new(
                    Arc::new(backend),
                    store.clone(),
                    remote.commit_message.clone(),
                )))
            }
            None => {
                info!("No remote configured, replication disabled");
                None
            }
        };

        let orchestrator = Orchestrator::new(&settings, store.clone(), replicator)
            .context("Failed to initialize orchestrator")?;

        let collector = settings
            .collector
            .clone()
            .map(HomeAssistantSource::new)
            .transpose()?;

        Ok(Self {
            settings,
            store,
            orchestrator,
            collector,
        })
    }

    async fn run(mut self) -> Result<()> {
        if let Err(e) = self.store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted)) {
            warn!(error = %e, "Failed to log service start");
        }

        if self.settings.service.fetch_on_startup {
            for (tier, result) in self.orchestrator.restore_missing(powertier_util::now()).await {
                if let Err(e) = result {
                    warn!(tier = %tier, error = %e, "Startup restore failed, continuing with local data");
                }
            }
        }

        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        // Main event loop
        let mut tick_timer = tokio::time::interval(self.settings.service.tick_interval);
        let mut collect_timer = tokio::time::interval(
            self.collector
                .as_ref()
                .map(|c| c.interval())
                .unwrap_or(self.settings.service.tick_interval),
        );

        info!(
            tick_interval = ?self.settings.service.tick_interval,
            collector = self.collector.is_some(),
            "Service running"
        );

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                // Rotation and due jobs
                _ = tick_timer.tick() => {
                    let events = self.orchestrator.tick(powertier_util::now()).await;
                    for event in events {
                        Self::handle_scheduler_event(event);
                    }
                }

                // Sensor polling
                _ = collect_timer.tick(), if self.collector.is_some() => {
                    if let Err(e) = self.collect_once(powertier_util::now()).await {
                        warn!(error = %e, "Collection failed");
                    }
                }
            }
        }

        info!("Shutting down powertierd");

        if let Err(e) = self.store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    fn handle_scheduler_event(event: SchedulerEvent) {
        match event {
            SchedulerEvent::JobCompleted {
                job,
                run_date,
                summaries,
                pushed,
            } => {
                info!(job = %job, run_date = %run_date, summaries, pushed, "Job completed");
            }
            SchedulerEvent::JobFailed {
                job,
                run_date,
                attempt,
                error,
            } => {
                warn!(job = %job, run_date = %run_date, attempt, error = %error, "Job failed, will retry");
            }
            SchedulerEvent::JobExhausted {
                job,
                run_date,
                attempts,
            } => {
                error!(job = %job, run_date = %run_date, attempts, "Job gave up for today");
            }
            SchedulerEvent::TierRotated {
                tier,
                closed_day,
                archived_points,
            } => {
                info!(tier = %tier, closed_day = %closed_day, archived_points, "Tier rotated");
            }
        }
    }

    async fn collect_once(&self, now: DateTime<Local>) -> Result<()> {
        let Some(collector) = &self.collector else {
            bail!("No collector configured");
        };
        let Some(reading) = collector.poll(now).await else {
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ReadingSkipped {
                reason: "no sensor values".into(),
            }));
            return Ok(());
        };
        self.ingest(reading, now)
    }

    fn ingest(&self, reading: Reading, now: DateTime<Local>) -> Result<()> {
        match self.orchestrator.ingestor()?.ingest(reading, now)? {
            IngestOutcome::Stored { points } => info!(points, "Reading stored"),
            IngestOutcome::Skipped => info!("Maintenance mode on, reading skipped"),
        }
        Ok(())
    }

    /// Tier names to act on: the one given, or every replicated tier
    fn sync_targets(&self, tier: Option<String>) -> Vec<TierName> {
        match tier {
            Some(name) => vec![TierName::new(name)],
            None => self
                .orchestrator
                .replicated_tiers()
                .map(|t| t.name().clone())
                .collect(),
        }
    }

    async fn execute(mut self, command: Command) -> Result<()> {
        let now = powertier_util::now();

        match command {
            Command::Daemon => return self.run().await,

            Command::Once => {
                let mut failed = Vec::new();
                for (job, result) in self.orchestrator.run_all_once(now).await {
                    match result {
                        Ok(report) => println!(
                            "{}: {} summaries{}",
                            job,
                            report.summaries,
                            if report.pushed { ", pushed" } else { "" }
                        ),
                        Err(e) => {
                            println!("{}: FAILED: {}", job, e);
                            failed.push(job.to_string());
                        }
                    }
                }
                if !failed.is_empty() {
                    bail!("Jobs failed: {}", failed.join(", "));
                }
            }

            Command::Run { job } => {
                let report = self.orchestrator.run_once(&JobName::new(job.clone()), now).await?;
                println!(
                    "{}: {} summaries{}",
                    job,
                    report.summaries,
                    if report.pushed { ", pushed" } else { "" }
                );
            }

            Command::Ingest { metrics, timestamp } => {
                let timestamp = match timestamp {
                    Some(ts) => parse_timestamp(&ts)
                        .with_context(|| format!("Invalid timestamp {:?}", ts))?,
                    None => now,
                };
                let values = parse_metrics(&metrics)?;
                self.ingest(Reading::new(timestamp, values), now)?;
            }

            Command::Collect => self.collect_once(now).await?,

            Command::Pull { tier } => {
                for name in self.sync_targets(tier) {
                    match self.orchestrator.pull(&name, now).await? {
                        Some(file) => println!("{}: pulled {} points", name, file.len()),
                        None => println!("{}: not present remotely", name),
                    }
                }
            }

            Command::Push { tier } => {
                for name in self.sync_targets(tier) {
                    let outcome = self.orchestrator.push(&name, now).await?;
                    println!("{}: {:?}", name, outcome);
                }
            }

            Command::SyncReset { tier } => {
                let name = TierName::new(tier);
                if self.orchestrator.sync_reset(&name)? {
                    println!("{}: sync record cleared", name);
                } else {
                    println!("{}: no sync record", name);
                }
            }

            Command::Maintenance { state } => {
                let enabled = state == Toggle::On;
                self.store.set_maintenance(enabled)?;
                let _ = self
                    .store
                    .append_audit(AuditEvent::new(AuditEventType::MaintenanceToggled { enabled }));
                info!(enabled, "Maintenance mode updated");
                println!("maintenance: {}", if enabled { "on" } else { "off" });
            }

            Command::Status { audit } => {
                let report = self.orchestrator.status(now, audit)?;
                print_status(&report);
            }

            Command::Export { tier, path } => {
                let tier = self.orchestrator.tier(&TierName::new(tier))?;
                let file = tier
                    .try_load()?
                    .with_context(|| format!("Tier {} has no data file", tier.name()))?;
                std::fs::copy(tier.path(), &path)
                    .with_context(|| format!("Failed to copy {:?} to {:?}", tier.path(), path))?;
                println!("{}: exported {} points to {}", tier.name(), file.len(), path.display());
            }
        }

        Ok(())
    }
}

/// Parse `name=value` pairs into reading values
fn parse_metrics(pairs: &[String]) -> Result<BTreeMap<String, f64>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("Expected name=value, got {:?}", pair))?;
            let value: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {:?}", name, value))?;
            let name = name.trim();
            if let Err(message) = check_metric_name(name) {
                bail!("{}: {:?}", message, pair);
            }
            Ok((name.to_string(), value))
        })
        .collect()
}

fn print_status(report: &StatusReport) {
    println!("Tiers:");
    for tier in &report.tiers {
        let last_update = tier
            .last_update
            .as_ref()
            .map(format_datetime_full)
            .unwrap_or_else(|| "never".into());
        println!(
            "  {:<10} {:>6} points  updated {}{}{}",
            tier.name,
            tier.points,
            last_update,
            tier.remote_path
                .as_deref()
                .map(|p| format!("  -> {}", p))
                .unwrap_or_default(),
            if tier.corrupt { "  [CORRUPT]" } else { "" }
        );
    }

    println!("Jobs:");
    for job in &report.jobs {
        println!(
            "  {:<10} at {}  {:?}  last run {}  attempts today {}{}",
            job.name,
            job.at,
            job.state,
            job.last_run
                .map(|d| d.to_string())
                .unwrap_or_else(|| "never".into()),
            job.attempts_today,
            if job.exhausted { "  [EXHAUSTED]" } else { "" }
        );
    }

    if !report.sync_records.is_empty() {
        println!("Sync:");
        for record in &report.sync_records {
            println!(
                "  {:<10} {} @ {}  synced {}",
                record.tier,
                record.remote_path,
                record.last_known_sha,
                format_datetime_full(&record.synced_at)
            );
        }
    }

    println!("Maintenance: {}", if report.maintenance { "on" } else { "off" });
    println!("State store: {}", if report.store_healthy { "ok" } else { "UNHEALTHY" });

    if !report.recent.is_empty() {
        println!("Recent events:");
        for event in &report.recent {
            println!(
                "  {}  {:?}",
                format_datetime_full(&event.timestamp),
                event.event
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "powertierd starting"
    );

    let service = Service::new(&args)?;
    let command = args.command.unwrap_or(Command::Daemon);
    service.execute(command).await
}
