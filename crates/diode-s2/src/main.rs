//! S2 binary: the diode's egress side.

use std::{net::Ipv4Addr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use diode_core::{
    config::Config,
    supervisor::{supervise, RestartPolicy},
    AtomicMetrics, MetricsSink,
};
use diode_s2::{
    decapsulator::Decapsulator, heartbeat::HeartbeatMonitor, receiver, storage::FileStorage,
    system_env::SystemEnv, UniqueIdGenerator,
};
use tokio::net::UdpSocket;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Data diode egress gateway.
#[derive(Parser, Debug)]
#[command(name = "diode-s2")]
#[command(about = "Egress side of the data diode gateway")]
#[command(version)]
struct Args {
    /// Address to bind the UDP receiver to.
    #[arg(long, default_value = "0.0.0.0")]
    s2_ip: Ipv4Addr,

    /// UDP port to receive diode datagrams on.
    #[arg(long, default_value_t = 42001)]
    s2_port: u16,

    /// Directory accepted payloads are written into.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Heartbeat silence threshold before raising `ChannelSilent`, in
    /// milliseconds.
    #[arg(long, default_value_t = 360_000)]
    heartbeat_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = Config::default();
    config.s2_ip = args.s2_ip;
    config.s2_port = args.s2_port;
    config.data_dir = args.data_dir;
    config.heartbeat_timeout_ms = args.heartbeat_timeout_ms;

    if let Err(err) = config.validate_s2() {
        tracing::error!(%err, "configuration error");
        return std::process::ExitCode::from(2);
    }

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "unrecoverable bind error");
            std::process::ExitCode::from(3)
        },
    }
}

/// Wires up and runs every permanent S2 component until shutdown.
///
/// Startup order: clean stale `.tmp` files left by a prior crash, then bring
/// up the heartbeat monitor and storage before finally binding the receive
/// socket that starts accepting diode traffic, mirroring S1's
/// encapsulator-before-acceptor ordering from the other side of the link.
async fn run(config: Config) -> Result<(), String> {
    let env = SystemEnv::new();
    let metrics: Arc<AtomicMetrics> = Arc::new(AtomicMetrics::default());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    match diode_s2::storage::clean_stale_temp_files(&config.data_dir) {
        Ok(0) => {},
        Ok(n) => tracing::info!(removed = n, "cleaned up stale .tmp files from a prior crash"),
        Err(err) => tracing::warn!(%err, "failed to clean stale .tmp files, continuing anyway"),
    }

    let storage = Arc::new(FileStorage::new(config.data_dir.clone()));
    let unique_ids = Arc::new(UniqueIdGenerator::new());
    let heartbeat_monitor =
        Arc::new(HeartbeatMonitor::new(env.clone(), Duration::from_millis(config.heartbeat_timeout_ms)));

    let decapsulator = Decapsulator::new(
        env.clone(),
        Arc::clone(&storage),
        unique_ids,
        Arc::clone(&heartbeat_monitor),
        metrics.clone() as Arc<dyn MetricsSink>,
    );

    let mut tasks =
        vec![tokio::spawn(Arc::clone(&heartbeat_monitor).run_checker(
            metrics.clone() as Arc<dyn MetricsSink>,
            shutdown_rx.clone(),
        ))];

    let receiver_handle = tokio::spawn(run_supervised_receiver(
        env.clone(),
        config.s2_ip,
        config.s2_port,
        decapsulator,
        metrics.clone() as Arc<dyn MetricsSink>,
        shutdown_rx.clone(),
    ));
    tasks.push(receiver_handle);

    tokio::signal::ctrl_c().await.map_err(|err| err.to_string())?;
    tracing::info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        tracing::warn!("graceful drain exceeded its 5s deadline, flushing and exiting anyway");
    }

    if let Err(err) = storage.flush_buffers() {
        tracing::error!(%err, "flush_buffers failed during shutdown");
    }

    Ok(())
}

/// Binds the UDP socket (retrying with a bounded backoff) and
/// supervises the receive loop, rebinding on every restart within budget.
async fn run_supervised_receiver<E: diode_core::env::Environment, S: diode_s2::storage::Storage>(
    env: E,
    bind_ip: Ipv4Addr,
    bind_port: u16,
    decapsulator: Decapsulator<E, S>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let result = supervise(&env, "receiver", RestartPolicy::default(), || {
        let decapsulator = decapsulator.clone();
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        async move {
            let socket = bind_udp_with_retry(bind_ip, bind_port).await.map_err(|err| err.to_string())?;
            tracing::info!(addr = %bind_ip, port = bind_port, "S2 UDP receiving");
            receiver::run(socket, decapsulator, metrics, shutdown).await
        }
    })
    .await;

    if let Err(exhausted) = result {
        tracing::error!(%exhausted, "receiver permanently failed");
    }
}

/// Retries a bind up to 20 times, 5 seconds apart.
async fn bind_udp_with_retry(ip: Ipv4Addr, port: u16) -> Result<UdpSocket, String> {
    let mut attempt = 0;
    loop {
        match UdpSocket::bind((ip, port)).await {
            Ok(socket) => return Ok(socket),
            Err(err) if attempt < 19 => {
                tracing::warn!(%err, attempt, "udp bind failed, retrying");
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(5)).await;
            },
            Err(err) => return Err(format!("failed to bind {ip}:{port} after 20 attempts: {err}")),
        }
    }
}
