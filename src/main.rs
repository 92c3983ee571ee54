// ABOUTME: Lingocast latency probe binary
// ABOUTME: Connects to a running server and checks that average broadcast latency stays under a limit

use clap::Parser;
use lingocast::probe::{measure, LatencyStats};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "lingocast")]
#[command(author, version, about = "Measure live audio broadcast latency", long_about = None)]
struct Args {
    /// WebSocket URL of the broadcast endpoint
    #[arg(short, long, default_value = "ws://localhost:5000/audio")]
    url: String,

    /// How long to listen, in seconds
    #[arg(short, long, default_value = "5")]
    duration: f64,

    /// Average latency limit in seconds
    #[arg(short, long, default_value = "0.7")]
    max_latency: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose { "lingocast=debug" } else { "lingocast=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    println!("Connecting to {}...", args.url);
    println!("Testing for {} seconds...", args.duration);

    let latencies = match measure(&args.url, Duration::from_secs_f64(args.duration.max(0.0))).await {
        Ok(latencies) => latencies,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(stats) = LatencyStats::from_samples(&latencies) else {
        println!("TEST FAILED: No data received");
        return ExitCode::FAILURE;
    };

    println!();
    println!("{}", "=".repeat(30));
    println!("Test Results ({} samples):", stats.count);
    println!("Average Latency: {:.2} ms", stats.mean * 1000.0);
    println!("Max Latency: {:.2} ms", stats.max * 1000.0);
    println!("Min Latency: {:.2} ms", stats.min * 1000.0);
    println!("{}", "=".repeat(30));

    if stats.mean < args.max_latency {
        println!("TEST PASSED: Average latency is below {}s", args.max_latency);
        ExitCode::SUCCESS
    } else {
        println!("TEST FAILED: Average latency is above {}s", args.max_latency);
        ExitCode::FAILURE
    }
}
