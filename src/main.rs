use clap::Parser;
use kafka_sniffer::{
    AuthTracker, Flow, HttpMetricsServer, Result, SnifferConfig, SnifferError, Storage,
    StreamFactory,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kafka-sniffer")]
#[command(about = "Passive Kafka protocol observer exposing client/topic/identity telemetry")]
struct Args {
    /// Bind host for the metric exposition endpoint
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port for the metric exposition endpoint
    #[arg(short, long, default_value = "9870")]
    metrics_port: u16,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// TTL in seconds for expiring relation gauges
    #[arg(long, default_value = "900")]
    metric_expiry: u64,

    /// Ceiling in bytes on a single wire frame
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    max_request_size: usize,

    /// Short TTL in seconds for per-endpoint auth sessions
    #[arg(long, default_value = "300")]
    auth_endpoint_ttl: u64,

    /// Long TTL in seconds for per-ip identity memory
    #[arg(long, default_value = "1800")]
    auth_ip_ttl: u64,

    /// Diagnostic logs at request granularity
    #[arg(short, long)]
    verbose: bool,

    /// Recorded client-to-broker byte stream to analyse offline. May be
    /// repeated; each file is treated as one flow.
    #[arg(long)]
    replay: Vec<std::path::PathBuf>,

    /// Synthetic client endpoint attributed to replayed flows
    #[arg(long, default_value = "127.0.0.1:54321")]
    replay_src: String,

    /// Synthetic broker endpoint attributed to replayed flows
    #[arg(long, default_value = "127.0.0.1:9092")]
    replay_dst: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    let config = SnifferConfig {
        host: args.host,
        metrics_port: args.metrics_port,
        metric_expiry_secs: args.metric_expiry,
        max_request_size: args.max_request_size,
        auth_endpoint_ttl_secs: args.auth_endpoint_ttl,
        auth_ip_ttl_secs: args.auth_ip_ttl,
        verbose: args.verbose,
    };
    config.validate()?;

    info!("starting kafka-sniffer");
    info!("metric expiry: {}s", config.metric_expiry_secs);
    info!("max request size: {} bytes", config.max_request_size);
    info!(
        "auth session TTLs: endpoint {}s, ip {}s",
        config.auth_endpoint_ttl_secs, config.auth_ip_ttl_secs
    );

    let storage = Arc::new(Storage::new(config.metric_expiry()));
    let auth = Arc::new(AuthTracker::new(
        config.auth_endpoint_ttl(),
        config.auth_ip_ttl(),
    ));
    let sweeper = auth.spawn_sweeper(Duration::from_secs(60));
    let factory = StreamFactory::new(Arc::clone(&storage), Arc::clone(&auth), &config);

    let (shutdown_tx, _) = broadcast::channel(16);

    let addr: SocketAddr = format!("{}:{}", config.host, config.metrics_port)
        .parse()
        .map_err(|e| SnifferError::Config(format!("invalid listen address: {e}")))?;
    let http_server = HttpMetricsServer::new(addr);
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("metrics endpoint error: {}", e);
        }
    });

    // Offline analysis: each replay file is one reassembled flow. Live
    // capture integrates through the same StreamFactory::spawn call.
    let mut flow_handles = Vec::new();
    for path in &args.replay {
        match tokio::fs::File::open(path).await {
            Ok(file) => {
                info!("replaying {} as {}", path.display(), args.replay_src);
                flow_handles.push(factory.spawn(Flow::new(
                    args.replay_src.clone(),
                    args.replay_dst.clone(),
                    file,
                )));
            }
            Err(e) => warn!("cannot open replay file {}: {}", path.display(), e),
        }
    }

    signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down gracefully");

    let _ = shutdown_tx.send(());
    for handle in flow_handles {
        handle.abort();
    }
    sweeper.abort();
    storage.close().await;
    let _ = http_handle.await;

    info!("kafka-sniffer shut down");
    Ok(())
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
