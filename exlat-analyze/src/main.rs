use anyhow::{Context, Result};
use clap::Parser;
use exlat_core::{
    filter_by_severity, CycleKind, LatencyStats, NetworkSummary, Severity, SnapshotRecord,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(about = "Summarize exlat snapshot logs: per-connection latency over time and severity mix")]
struct Args {
    /// JSONL snapshot log written by `exlat`.
    #[arg(long)]
    session: PathBuf,

    /// Only count samples of these severities (repeatable).
    #[arg(long)]
    severity: Vec<Severity>,

    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
struct SeverityHistogram {
    low: usize,
    medium: usize,
    high: usize,
}

impl SeverityHistogram {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
        }
    }

    fn total(&self) -> usize {
        self.low + self.medium + self.high
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionReport {
    id: String,
    source_server_id: String,
    target_server_id: String,
    samples: usize,
    min_ms: u32,
    median_ms: u32,
    avg_ms: u32,
    max_ms: u32,
    latest_ms: u32,
    latest_severity: Severity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisOutput {
    records: usize,
    skipped_lines: usize,
    full_cycles: usize,
    refresh_cycles: usize,
    first_timestamp_ms: Option<i64>,
    last_timestamp_ms: Option<i64>,
    severity_filter: Vec<Severity>,
    histogram: SeverityHistogram,
    connections: Vec<ConnectionReport>,
    latest_summary: Option<NetworkSummary>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (records, skipped) = load_jsonl(&args.session)
        .with_context(|| format!("reading {}", args.session.display()))?;
    if skipped > 0 {
        warn!(skipped, "ignored malformed snapshot lines");
    }

    let output = analyze(&records, skipped, &args.severity);

    if args.json {
        let text = serde_json::to_string_pretty(&output).context("serializing report")?;
        println!("{text}");
        return Ok(());
    }

    print_report(&output);
    Ok(())
}

/// Reads every parseable record; returns the count of lines that were not.
fn load_jsonl(path: &Path) -> Result<(Vec<SnapshotRecord>, usize)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut skipped = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SnapshotRecord>(&line) {
            Ok(rec) => out.push(rec),
            Err(_) => skipped += 1,
        }
    }
    Ok((out, skipped))
}

fn analyze(records: &[SnapshotRecord], skipped: usize, severities: &[Severity]) -> AnalysisOutput {
    let mut histogram = SeverityHistogram::default();
    // id -> (source, target, latencies in record order, last severity)
    let mut per_conn: BTreeMap<String, (String, String, Vec<u32>, Severity)> = BTreeMap::new();

    for rec in records {
        let kept = if severities.is_empty() {
            rec.connections.clone()
        } else {
            filter_by_severity(&rec.connections, severities)
        };
        for c in kept {
            histogram.add(c.severity);
            let entry = per_conn.entry(c.id.clone()).or_insert_with(|| {
                (
                    c.source_server_id.clone(),
                    c.target_server_id.clone(),
                    Vec::new(),
                    c.severity,
                )
            });
            entry.2.push(c.latency_ms);
            entry.3 = c.severity;
        }
    }

    let connections = per_conn
        .into_iter()
        .map(|(id, (source, target, latencies, severity))| {
            let stats = LatencyStats::from_latencies(&latencies);
            ConnectionReport {
                id,
                source_server_id: source,
                target_server_id: target,
                samples: latencies.len(),
                min_ms: stats.min,
                median_ms: stats.median,
                avg_ms: stats.avg,
                max_ms: stats.max,
                latest_ms: latencies.last().copied().unwrap_or_default(),
                latest_severity: severity,
            }
        })
        .collect();

    AnalysisOutput {
        records: records.len(),
        skipped_lines: skipped,
        full_cycles: records.iter().filter(|r| r.kind == CycleKind::Full).count(),
        refresh_cycles: records.iter().filter(|r| r.kind == CycleKind::Refresh).count(),
        first_timestamp_ms: records.iter().map(|r| r.timestamp_ms).min(),
        last_timestamp_ms: records.iter().map(|r| r.timestamp_ms).max(),
        severity_filter: severities.to_vec(),
        histogram,
        connections,
        latest_summary: records.iter().rev().find_map(|r| r.summary.clone()),
    }
}

fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn print_report(out: &AnalysisOutput) {
    println!(
        "Session: {} records ({} full, {} refresh)",
        out.records, out.full_cycles, out.refresh_cycles
    );
    if out.skipped_lines > 0 {
        println!("  skipped {} malformed lines", out.skipped_lines);
    }
    if let (Some(first), Some(last)) = (out.first_timestamp_ms, out.last_timestamp_ms) {
        println!("  span: {:.1}s", (last - first) as f64 / 1000.0);
    }
    if !out.severity_filter.is_empty() {
        let names: Vec<String> = out.severity_filter.iter().map(|s| s.to_string()).collect();
        println!("  severity filter: {}", names.join(", "));
    }

    if let Some(s) = &out.latest_summary {
        println!(
            "\nLatest network: {} servers, avg {}ms, online={} degraded={} offline={}",
            s.total_servers, s.average_latency, s.online_count, s.degraded_count, s.offline_count
        );
        println!(
            "  providers: AWS={} GCP={} Azure={}",
            s.by_provider.aws, s.by_provider.gcp, s.by_provider.azure
        );
    }

    let h = &out.histogram;
    let total = h.total();
    println!("\nSeverity histogram ({} samples):", total);
    println!("- low    {:>6} ({:.1}%)", h.low, pct(h.low, total));
    println!("- medium {:>6} ({:.1}%)", h.medium, pct(h.medium, total));
    println!("- high   {:>6} ({:.1}%)", h.high, pct(h.high, total));

    println!("\nConnection stats (min/med/avg/max in ms):");
    for c in &out.connections {
        println!(
            "- {} count={} min={} med={} avg={} max={} latest={} ({})",
            c.id, c.samples, c.min_ms, c.median_ms, c.avg_ms, c.max_ms, c.latest_ms, c.latest_severity
        );
    }
}
