use anyhow::{bail, Context, Result};
use clap::Parser;
use exlat_core::{Config, Connection, CycleKind, SnapshotRecord};
use exlat_probe::{HttpTransport, Pipeline, SystemClock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const WRITER_QUEUE: usize = 64;

#[derive(Parser, Debug)]
#[command(about = "Probe exchange cloud regions and log the synthesized latency graph")]
struct Args {
    #[arg(long)]
    config: PathBuf,

    /// Run a single full cycle and exit.
    #[arg(long)]
    once: bool,

    /// Override refreshIntervalSeconds (5, 10, 15 or 30).
    #[arg(long)]
    interval: Option<u64>,

    /// Re-measure one exchange's regions (with retries), log its servers and exit.
    #[arg(long)]
    exchange: Option<String>,

    /// Build graphs from distance alone instead of probing endpoints.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("exlat=info".parse().context("bad default log directive")?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let mut cfg = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(secs) = args.interval {
        cfg.refresh_interval_seconds = secs;
    }

    let transport = Arc::new(HttpTransport::new().context("building http client")?);
    let pipeline = Pipeline::from_config(&cfg, transport, Arc::new(SystemClock))
        .context("config rejected")?;

    if let Some(name) = &args.exchange {
        return locate_exchange(&pipeline, name).await;
    }

    let output_path = expand_tilde(&cfg.output_path);
    info!("exlat running");
    info!("  regions:   {}", pipeline.registry().regions_in_use().len());
    info!("  exchanges: {}", pipeline.registry().exchanges().len());
    info!("  interval:  {}s", cfg.refresh_interval_seconds);
    info!("  output:    {}", output_path.display());
    if args.simulate {
        info!("  mode:      simulated (no probes)");
    }

    let (tx, rx) = mpsc::channel::<SnapshotRecord>(WRITER_QUEUE);
    let writer_path = output_path.clone();
    let writer = tokio::task::spawn_blocking(move || writer_task(writer_path, rx));

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.refresh_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut rng = StdRng::from_entropy();
    let mut previous: Vec<Connection> = Vec::new();
    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("interrupted, stopping");
                break;
            }
        }

        let record = if is_full_cycle(cycle, cfg.full_refresh_every, !previous.is_empty()) {
            let (data, update) = if args.simulate {
                pipeline.simulate(&mut rng)
            } else {
                let data = pipeline.snapshot().await;
                let update = pipeline.synthesize(&data.servers);
                (data, update)
            };
            SnapshotRecord::full(cycle, &data, &update)
        } else {
            let update = pipeline.refresh(&previous, &mut rng);
            SnapshotRecord::refresh(cycle, &update)
        };
        previous = record.connections.clone();

        if tx.send(record).await.is_err() {
            warn!("writer gone, stopping");
            break;
        }
        cycle += 1;
        if args.once {
            break;
        }
    }

    drop(tx);
    writer.await.context("writer task panicked")?;
    Ok(())
}

/// The first cycle, any cycle without a graph to jitter, and every
/// `full_every`-th cycle re-measure and rebuild.
fn is_full_cycle(cycle: u64, full_every: Option<u32>, have_graph: bool) -> bool {
    if cycle == 0 || !have_graph {
        return true;
    }
    match full_every {
        Some(n) if n > 0 => cycle % n as u64 == 0,
        _ => false,
    }
}

async fn locate_exchange(pipeline: &Pipeline, name: &str) -> Result<()> {
    if pipeline.registry().exchange(name).is_none() {
        bail!(
            "unknown exchange {} (known: {})",
            name,
            pipeline.registry().exchange_names().join(", ")
        );
    }
    let servers = pipeline.refresh_exchange(name).await;
    for s in &servers {
        info!(
            "{} {} {} ({}, {}) {}ms {:?}",
            s.server_id,
            s.provider,
            s.region,
            s.location.city,
            s.location.country,
            s.latency_ms,
            s.operational_state
        );
    }
    if servers.iter().all(|s| s.is_offline()) {
        warn!("[!] every {} region is offline", name);
    }
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    expand_tilde_in(path, env::var("HOME").ok().as_deref())
}

fn expand_tilde_in(path: &str, home: Option<&str>) -> PathBuf {
    if let (Some(stripped), Some(home)) = (path.strip_prefix("~/"), home) {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

fn writer_task(path: PathBuf, mut rx: mpsc::Receiver<SnapshotRecord>) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            error!("[!!] failed to create log dir: {}", err);
            return;
        }
    }
    let file = match File::options().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(err) => {
            error!("[!!] failed to open log file: {}", err);
            return;
        }
    };
    let mut writer = BufWriter::new(file);

    while let Some(rec) = rx.blocking_recv() {
        if let Err(err) = serde_json::to_writer(&mut writer, &rec) {
            error!("[!!] log write failed: {}", err);
            continue;
        }
        if let Err(err) = writer.write_all(b"\n") {
            error!("[!!] log write failed: {}", err);
            continue;
        }
        if let Err(err) = writer.flush() {
            error!("[!!] log flush failed: {}", err);
        }
        report(&rec);
    }
}

fn report(rec: &SnapshotRecord) {
    let kind = match rec.kind {
        CycleKind::Full => "full",
        CycleKind::Refresh => "refresh",
    };
    if rec.connections.is_empty() {
        warn!("[??] cycle {} ({}) no connections (all regions offline?)", rec.cycle, kind);
        return;
    }
    if let Some(summary) = &rec.summary {
        if summary.offline_count > 0 || summary.degraded_count > 0 {
            warn!(
                "[!] cycle {} offline={} degraded={} of {} servers",
                rec.cycle, summary.offline_count, summary.degraded_count, summary.total_servers
            );
        }
    }
    info!(
        "[ok] cycle {} ({}) conns={} min={}ms med={}ms avg={}ms max={}ms",
        rec.cycle,
        kind,
        rec.connections.len(),
        rec.stats.min,
        rec.stats.median,
        rec.stats.avg,
        rec.stats.max
    );
}
