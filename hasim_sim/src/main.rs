//! HA failover simulator CLI
//!
//! Plays the scripted host-failure incident and checks the cluster
//! invariants along the way.

use clap::Parser;
use hasim_sim::scenarios::ScenarioId;
use hasim_sim::{ClockMode, ScenarioResult, ScenarioRunner, SimConfig};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hasim")]
#[command(about = "Scripted HA failover simulator", long_about = None)]
struct Args {
    /// Scenario to run (full_incident, reset_mid_run, double_trigger, reset_after_recovery, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Wait the real 40 s script instead of using the virtual clock
    #[arg(long)]
    realtime: bool,

    /// Print phase, status and narration as they change
    #[arg(short, long)]
    watch: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-snapshot frames to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("HA Failover Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: full_incident, reset_mid_run, double_trigger, reset_after_recovery, all");
            std::process::exit(1);
        })]
    };

    if args.export.is_some() && scenarios.len() > 1 {
        eprintln!("Error: --export only supports a single scenario, not 'all'");
        std::process::exit(1);
    }

    let config = SimConfig {
        clock: if args.realtime {
            ClockMode::Realtime
        } else {
            ClockMode::Virtual
        },
        echo: args.watch && !args.json,
        export_path: args.export.clone(),
    };
    let runner = ScenarioRunner::new(config);

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for scenario in &scenarios {
        let result = runner.run(*scenario);

        if !args.json {
            if result.passed {
                info!(
                    "✓ {} PASSED ({} snapshots, {} ms)",
                    scenario.name(),
                    result.observations,
                    result.elapsed_ms
                );
            } else {
                error!(
                    "✗ {} FAILED: {}",
                    scenario.name(),
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        if !result.passed {
            failed_count += 1;
        }

        all_results.push(result);
    }

    // Summary
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
                    "clock": r.clock.name(),
                    "passed": r.passed,
                    "final_phase": r.final_phase,
                    "phases_seen": r.phases_seen,
                    "log_entries": r.log_entries,
                    "observations": r.observations,
                    "elapsed_ms": r.elapsed_ms,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {}: {}",
                        result.scenario.name(),
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
