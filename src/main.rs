//! # Protobench Metrics - Main Entry Point
//!
//! Dispatches one of the batch commands:
//! - `latency`: per-file latency statistics
//! - `summary`: per-scenario latency and jitter rollups
//! - `pcap`: capture throughput and frame statistics
//!
//! ## Exit Codes
//!
//! - `0`: the batch completed (per-item failures are reported, not fatal)
//! - `1`: batch-level failure such as an empty input directory
//! - `2`: the capture-analysis tool is not available

use clap::Parser;
use protobench_metrics::{
    cli::{Args, Command},
    logging,
    pipeline::{run_capture, run_latency, run_summary, BatchOutcome, CaptureConfig},
    TsharkAnalyzer,
};
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match logging::init(args.verbose, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    info!("Protobench Metrics v{} ({})", protobench_metrics::VERSION, args.command.name());

    let result = match &args.command {
        Command::Latency(latency) => run_latency(&latency.into()),
        Command::Summary(summary) => run_summary(&summary.into()),
        Command::Pcap(pcap) => {
            let config: CaptureConfig = pcap.into();
            let analyzer = TsharkAnalyzer::new(config.tshark.clone(), config.tool_timeout);
            if let Err(e) = analyzer.ensure_available().await {
                error!("{}", e);
                return ExitCode::from(2);
            }
            run_capture(&config, &analyzer).await
        }
    };

    match result {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn report(outcome: &BatchOutcome) {
    if outcome.failures.is_empty() {
        info!(
            "Completed: {} input(s), {} row(s) written",
            outcome.inputs_found, outcome.rows_written
        );
    } else {
        warn!(
            "Completed with {} failure(s): {} input(s), {} row(s) written",
            outcome.failures.len(),
            outcome.inputs_found,
            outcome.rows_written
        );
    }
}
