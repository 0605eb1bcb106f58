//! TRACON session harness CLI
//!
//! Runs deterministic session checks, or connects to a live server.

use anyhow::{bail, Context};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tracon_core::{CommandService, EventStream, ProtocolAdapter, ProtocolConfig};
use tracon_env::{ChannelTransport, SessionContext, TokioContext, DEFAULT_CHANNEL_CAPACITY};
use tracon_sim::scenarios::ScenarioId;
use tracon_sim::{ScenarioResult, ScenarioRunner};

/// TRACON training session harness
#[derive(Parser, Debug)]
#[command(name = "tracon-sim")]
#[command(about = "Run deterministic session checks for the TRACON simulator", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (arrival_volume, handoff_flow, protocol_handoff, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Maximum session duration in seconds
    #[arg(short, long, default_value = "900")]
    duration: f64,

    /// Ticks per second
    #[arg(long, default_value = "1")]
    tick_rate: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the session timeline to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Connect to a live server (host:port) instead of running checks
    #[arg(long)]
    connect: Option<String>,

    /// Position to sign in as on a live server
    #[arg(long, default_value = "SEA_APP")]
    callsign: String,

    /// Controller ID for the live sign-on
    #[arg(long, default_value = "1000001")]
    cid: String,

    /// Sign in as an observer
    #[arg(long)]
    observer: bool,
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder().with_max_level(level);
    let installed = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(builder.finish()),
    };
    installed.context("failed to set tracing subscriber")
}

/// Mirrors a live server session and logs what it sees.
fn run_live(args: &Args, addr: &str) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(async {
        let ctx = TokioContext::shared();
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?;
        let (reader, writer) = stream.into_split();
        let transport = ChannelTransport::connect(Arc::clone(&ctx), BufReader::new(reader), writer, DEFAULT_CHANNEL_CAPACITY);

        let events = EventStream::new();
        let subscriber = events.subscribe();
        let config = ProtocolConfig {
            callsign: args.callsign.clone(),
            name: "Trainee".to_string(),
            cid: args.cid.clone(),
            observer: args.observer,
            ..Default::default()
        };
        let mut session: Box<dyn CommandService> =
            Box::new(ProtocolAdapter::connect(Arc::clone(&ctx), events.clone(), transport, config)?);
        info!("Signed in to {} as {}", addr, session.callsign());

        let until = Duration::from_secs_f64(args.duration.max(0.0));
        while ctx.now() < until {
            session.update();
            for event in events.get(subscriber) {
                info!("{:?}", event);
            }
            if !session.connected() {
                bail!("server closed the connection");
            }
            debug!("{} aircraft, {} controllers", session.get_all_aircraft().len(), session.get_all_controllers().len());
            ctx.sleep(Duration::from_millis(200)).await;
        }

        session.disconnect();
        info!("Signed off after {:.0}s", ctx.now().as_secs_f64());
        Ok::<(), anyhow::Error>(())
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    if let Some(addr) = &args.connect {
        return run_live(&args, addr);
    }

    if !args.json {
        info!("TRACON session harness v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(err) => {
                let names: Vec<&str> = ScenarioId::all().iter().map(|id| id.name()).collect();
                bail!("{}; available: {}, all", err, names.join(", "));
            }
        }
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        bail!("--export only supports a single scenario and seed");
    }

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let mut runner = ScenarioRunner::new(seed)
            .with_tick_rate(args.tick_rate)
            .with_duration(args.duration);
        if args.export.is_some() {
            runner = runner.with_export(u64::from(args.tick_rate.max(1)) * 10);
        }

        for scenario in &scenarios {
            let mut result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if let (Some(path), Some(export)) = (&args.export, result.export.take()) {
                export
                    .write_to_file(path)
                    .with_context(|| format!("failed to write export to {}", path))?;
                info!("Exported {} frames, {} events to {}", export.frames.len(), export.events.len(), path);
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "aircraft": r.final_aircraft_count,
                    "handoffs_accepted": r.metrics.handoffs_accepted,
                    "commands_rejected": r.metrics.commands_rejected,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}
