//! staticroutemgrd - static route controller daemon
//!
//! Watches a directory of StaticRoute manifests and keeps the kernel routing
//! table in line with them.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use staticroutemgrd::config::DEFAULT_CONFIG_PATH;
use staticroutemgrd::{
    ClusterDnsResolver, Dispatcher, DispatcherConfig, IpRouteTable, ManifestSource,
    MemoryRouteTable, RouteReconciler, RouteTable, StaticRouteConfig, StaticServiceResolver,
    StatusStore,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Static route controller
#[derive(Parser, Debug)]
#[command(name = "staticroutemgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory of StaticRoute manifests
    #[arg(short = 'd', long)]
    manifest_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Apply routes to an in-memory table instead of the kernel
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON status snapshot to this file
    #[arg(long)]
    status_file: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut StaticRouteConfig) {
        if let Some(dir) = self.manifest_dir {
            config.controller.manifest_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.dry_run {
            config.controller.dry_run = true;
        }
        if let Some(path) = self.status_file {
            config.controller.status_file = Some(path);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("staticroutemgrd failed: {:#}", e);
            eprintln!("staticroutemgrd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = StaticRouteConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    args.apply(&mut config);
    config.validate()?;

    init_logging(&config.logging.level, config.logging.json)?;

    info!("--- Starting staticroutemgrd ---");
    info!("Manifest directory: {}", config.controller.manifest_dir.display());
    info!("Poll interval: {}s", config.controller.poll_interval_secs);
    if config.controller.dry_run {
        info!("Dry run: routes are kept in memory only");
    }

    let table: Arc<dyn RouteTable> = if config.controller.dry_run {
        Arc::new(MemoryRouteTable::new())
    } else {
        Arc::new(IpRouteTable::new(config.command_timeout()))
    };
    let resolver = ClusterDnsResolver::new(
        config.resolver.cluster_domain.clone(),
        config.resolver.default_namespace.clone(),
    )
    .with_overrides(StaticServiceResolver::new(config.resolver.services.clone()));
    let store = Arc::new(StatusStore::default());

    let reconciler = RouteReconciler::new(table, Arc::new(resolver), store.clone())
        .with_call_timeout(config.call_timeout());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(reconciler),
        DispatcherConfig::from(&config),
    ));

    let shutdown = CancellationToken::new();
    let dispatch_task = {
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(shutdown).await })
    };
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let mut source = ManifestSource::new(&config.controller.manifest_dir);
    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match source.poll() {
                    Ok(events) if !events.is_empty() => {
                        info!("Queued {} resource events", events.len());
                        dispatcher.enqueue(events);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Manifest scan failed: {}", e),
                }
                write_status(&store, &config);
            }
        }
    }

    dispatch_task.await.context("dispatcher task")?;
    write_status(&store, &config);
    info!("--- staticroutemgrd stopped ---");
    Ok(())
}

fn write_status(store: &StatusStore, config: &StaticRouteConfig) {
    if let Some(path) = &config.controller.status_file {
        if let Err(e) = store.write_snapshot(path) {
            warn!("Failed to write status to {}: {}", path.display(), e);
        }
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = term.recv() => info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for SIGINT: {}", e);
                return;
            }
            info!("Received SIGINT");
        }
    }
    shutdown.cancel();
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
