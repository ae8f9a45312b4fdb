//! memvault MCP server entrypoint.
//!
//! Builds a [`memvault_core::MemoryFacade`] and consolidation engine from
//! `MemoryConfig::from_env()` and runs one transport: stdio (the default,
//! for direct MCP client use) or HTTP (Streamable HTTP, for long-running
//! deployments). The consolidation scheduler only runs under the HTTP
//! transport, to avoid two processes racing to consolidate the same store.

mod protocol;
mod server;
mod tools;

use std::io;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use memvault_core::consolidation::ConsolidationEngine;
use memvault_core::facade::MemoryFacade;
use memvault_core::MemoryConfig;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::protocol::http::{HttpTransport, HttpTransportConfig};
use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "memvault-mcp", version, about = "MCP server for memvault-core")]
struct Args {
    /// Which transport to serve the MCP protocol over.
    #[arg(long, value_enum, default_value = "stdio")]
    transport: Transport,

    /// Host to bind when `--transport http` is selected.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind when `--transport http` is selected.
    #[arg(long, default_value_t = 3100)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("memvault-mcp v{} starting ({:?} transport)", env!("CARGO_PKG_VERSION"), args.transport);

    let config = MemoryConfig::from_env();

    let store = match memvault_core::build_store(&config) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to initialize storage backend: {}", e);
            std::process::exit(1);
        }
    };
    info!(backend = ?config.storage_backend, "storage backend ready");

    let scorer = memvault_core::build_scorer();
    let chunk_policy = memvault_core::chunk_policy_for(config.storage_backend).with_overlap(config.content_split_overlap);
    let facade = Arc::new(MemoryFacade::new(store.clone(), scorer.clone(), chunk_policy, config.include_hostname));
    let consolidation = Arc::new(ConsolidationEngine::new(store, Some(scorer)));

    match args.transport {
        Transport::Stdio => {
            let server = McpServer::new(facade, consolidation);
            info!("serving MCP over stdio");
            if let Err(e) = StdioTransport::new().run(server).await {
                error!("stdio transport error: {}", e);
                std::process::exit(1);
            }
        }
        Transport::Http => {
            if config.consolidation_enabled {
                spawn_consolidation_scheduler(&config, consolidation.clone());
            } else {
                info!("consolidation scheduler disabled via MCP_CONSOLIDATION_ENABLED");
            }

            let http_config = HttpTransportConfig { host: args.host, port: args.port };
            if let Err(e) = HttpTransport::new(http_config).run(facade, consolidation).await {
                error!("http transport error: {}", e);
                std::process::exit(1);
            }
        }
    }

    info!("memvault-mcp shutting down");
}

/// Spawn the daily/weekly/monthly consolidation scheduler. Each schedule is
/// an independent loop so a slow monthly run never delays the daily one.
fn spawn_consolidation_scheduler(config: &MemoryConfig, engine: Arc<ConsolidationEngine>) {
    spawn_schedule_loop("daily", parse_daily(&config.schedule_daily), engine.clone());
    spawn_schedule_loop("weekly", parse_weekly(&config.schedule_weekly), engine.clone());
    spawn_schedule_loop("monthly", parse_monthly(&config.schedule_monthly), engine);
}

/// A schedule reduced to "check again in N seconds, and if due, run."
/// Coarse (60s poll) rather than precise, matching the granularity the
/// published schedule strings (`HH:MM`) actually need.
struct Schedule {
    /// Day gate: `None` for daily, `Some(weekday 0=Sun..6=Sat)` for weekly,
    /// `Some(day-of-month 1..31)` for monthly.
    day: Option<u32>,
    hour: u32,
    minute: u32,
    is_weekday: bool,
}

fn parse_daily(s: &str) -> Option<Schedule> {
    let (hour, minute) = parse_hhmm(s)?;
    Some(Schedule { day: None, hour, minute, is_weekday: false })
}

fn parse_weekly(s: &str) -> Option<Schedule> {
    let (day_str, time_str) = s.split_once('-')?;
    let (hour, minute) = parse_hhmm(time_str)?;
    let weekday = weekday_index(day_str)?;
    Some(Schedule { day: Some(weekday), hour, minute, is_weekday: true })
}

fn parse_monthly(s: &str) -> Option<Schedule> {
    let (day_str, time_str) = s.split_once('-')?;
    let (hour, minute) = parse_hhmm(time_str)?;
    let day_of_month: u32 = day_str.parse().ok()?;
    Some(Schedule { day: Some(day_of_month), hour, minute, is_weekday: false })
}

fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    Some((h.parse().ok()?, m.parse().ok()?))
}

fn weekday_index(name: &str) -> Option<u32> {
    let idx = match name.to_ascii_lowercase().as_str() {
        "sun" => 0,
        "mon" => 1,
        "tue" => 2,
        "wed" => 3,
        "thu" => 4,
        "fri" => 5,
        "sat" => 6,
        _ => return None,
    };
    Some(idx)
}

fn schedule_is_due(schedule: &Schedule, now: chrono::DateTime<chrono::Utc>) -> bool {
    use chrono::{Datelike, Timelike};

    if now.hour() != schedule.hour || now.minute() != schedule.minute {
        return false;
    }
    match schedule.day {
        None => true,
        Some(d) if schedule.is_weekday => now.weekday().num_days_from_sunday() == d,
        Some(d) => now.day() == d,
    }
}

fn spawn_schedule_loop(horizon: &'static str, schedule: Option<Schedule>, engine: Arc<ConsolidationEngine>) {
    let Some(schedule) = schedule else {
        warn!(horizon, "malformed schedule string, scheduler disabled for this horizon");
        return;
    };

    tokio::spawn(async move {
        info!(horizon, "consolidation scheduler started");
        let mut last_run_minute: Option<i64> = None;

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;

            let now = chrono::Utc::now();
            let this_minute = now.timestamp() / 60;
            if Some(this_minute) == last_run_minute {
                continue;
            }

            if schedule_is_due(&schedule, now) {
                last_run_minute = Some(this_minute);
                info!(horizon, "scheduled consolidation starting");
                let report = engine.consolidate(horizon).await;
                info!(
                    horizon,
                    phase_1_scored = report.phase_1_scored,
                    phase_3_new_edges = report.phase_3_new_edges,
                    phase_4_summaries = report.phase_4_summaries,
                    phase_5_archived = report.phase_5_archived,
                    "scheduled consolidation complete"
                );
            }
        }
    });
}
