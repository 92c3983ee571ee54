// ABOUTME: Lingocast server binary
// ABOUTME: Captures the microphone and broadcasts it to WebSocket clients

use clap::Parser;
use lingocast::server::{LingocastServer, ServerArgs};

#[derive(Parser, Debug)]
#[command(name = "lingocast-server")]
#[command(author, version, about = "Live microphone broadcast server", long_about = None)]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize tracing
    args.server.init_tracing();

    // Log startup info
    args.server.log_startup_info();

    // Create capture backend and configuration
    let backend = args.server.create_backend();
    let config = args.server.build_config();

    let server = LingocastServer::with_config(config).with_backend(backend);
    let registry = server.registry();
    let dispatcher = server.dispatcher();

    // Spawn a task to periodically report connected clients
    let report_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            let count = registry.len();
            if count > 0 {
                let stats = dispatcher.stats();
                tracing::info!(
                    "Connected clients: {} (frames: {}, deliveries: {}, dropped clients: {})",
                    count,
                    stats.frames(),
                    stats.deliveries(),
                    stats.pruned()
                );
            }
        }
    });

    tracing::info!("Press Ctrl+C to stop");

    let result = server.run().await;
    report_task.abort();
    result
}
