//! Gantry - worker connection probe service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use gantry::{
    config::Args,
    directory::{redact_uri, InMemoryDirectory, MongoDirectory, WorkerDirectory},
    logging::{self, TraceLog, TraceSink},
    server::{self, AppState, ProbeBoard},
    worker::ConnectionFactory,
    HttpTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let workers = args.worker_names();
    let policy = args.retry.policy();

    info!("======================================");
    info!("  Gantry - worker connection probe");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Retry policy: {:?}", policy);
    info!("Probe interval: {}s", args.probe_interval_secs);
    info!("Workers: {}", workers.len());
    for name in &workers {
        info!("  {}", name);
    }
    info!("======================================");

    // Dev mode serves the static list; otherwise MongoDB is required
    let directory: Arc<dyn WorkerDirectory> = if args.dev_mode {
        warn!("Development mode enabled - using static worker list");
        let list = args.workers.as_deref().unwrap_or_default();
        Arc::new(InMemoryDirectory::from_static_list(list)?)
    } else {
        info!("MongoDB: {}", redact_uri(&args.mongodb_uri));
        match MongoDirectory::connect(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(directory) => {
                info!("MongoDB connected successfully");
                Arc::new(directory)
            }
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let trace = Arc::new(TraceLog::new(args.trace_capacity));
    let factory = ConnectionFactory::new(directory, Arc::new(HttpTransport::new()), policy)
        .with_trace(Arc::clone(&trace) as Arc<dyn TraceSink>);

    let board = Arc::new(ProbeBoard::new());
    let probes = factory.with_retry_policy(args.probe_policy());
    for name in &workers {
        server::spawn_probe_task(
            probes.clone(),
            Arc::clone(&board),
            name.clone(),
            args.probe_interval(),
        );
    }

    let state = Arc::new(AppState {
        board,
        trace,
        workers: workers.len(),
    });

    server::run(args.listen, state).await?;

    Ok(())
}
