//! S1 binary: the diode's ingress side.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use clap::Parser;
use diode_core::{
    classifier::{AllowList, ProtocolTag},
    config::Config,
    limiter::TokenBucket,
    supervisor::{supervise, RestartPolicy},
    AtomicMetrics, MetricsSink,
};
use diode_s1::{encapsulator::Encapsulator, system_env::SystemEnv};
use tokio::{net::UdpSocket, sync::mpsc};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Data diode ingress gateway.
#[derive(Parser, Debug)]
#[command(name = "diode-s1")]
#[command(about = "Ingress side of the data diode gateway")]
#[command(version)]
struct Args {
    /// Address to bind the TCP listener to.
    #[arg(long, default_value = "0.0.0.0")]
    s1_ip: Ipv4Addr,

    /// TCP port to accept client connections on.
    #[arg(long, default_value_t = 8080)]
    s1_tcp_port: u16,

    /// Optional UDP ingress port; omit to disable the UDP listener.
    #[arg(long)]
    s1_udp_port: Option<u16>,

    /// Diode destination address (S2's UDP bind address).
    #[arg(long, default_value = "127.0.0.1")]
    s2_ip: Ipv4Addr,

    /// Diode destination port (S2's UDP bind port).
    #[arg(long, default_value_t = 42001)]
    s2_port: u16,

    /// Accepted protocol tags, comma-separated (`modbus,dnp3,mqtt,snmp,any`).
    #[arg(long, default_value = "any", value_delimiter = ',')]
    allowed_protocols: Vec<String>,

    /// Global ingress rate limit, in packets per second.
    #[arg(long, default_value_t = 1000)]
    max_packets_per_sec: u32,

    /// Per-frame payload cap, in bytes.
    #[arg(long, default_value_t = 1_000_000)]
    max_payload_bytes: usize,

    /// Heartbeat generation interval, in milliseconds.
    #[arg(long, default_value_t = 300_000)]
    heartbeat_interval_ms: u64,

    /// Enables the optional per-source-IP rate limiter tier, layered under
    /// the global limiter.
    #[arg(long, default_value_t = false)]
    enable_per_ip_limiter: bool,

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
    config.s1_ip = args.s1_ip;
    config.s1_tcp_port = args.s1_tcp_port;
    config.s1_udp_port = args.s1_udp_port;
    config.s2_ip = args.s2_ip;
    config.s2_port = args.s2_port;
    config.allowed_protocols =
        ProtocolTag::parse_many(args.allowed_protocols.iter().map(String::as_str));
    config.max_packets_per_sec = args.max_packets_per_sec;
    config.max_payload_bytes = args.max_payload_bytes;
    config.heartbeat_interval_ms = args.heartbeat_interval_ms;
    config.enable_per_ip_limiter = args.enable_per_ip_limiter;

    if let Err(err) = config.validate() {
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

/// Wires up and runs every permanent S1 component until shutdown.
///
/// Startup order follows a leaf-first control flow: the encapsulator
/// (the thing everything else feeds into) comes up first, then the
/// heartbeat generator and optional UDP listener, then finally the TCP
/// acceptor that starts admitting external clients.
async fn run(config: Config) -> Result<(), String> {
    let env = SystemEnv::new();
    let metrics: Arc<AtomicMetrics> = Arc::new(AtomicMetrics::default());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let allow_list = AllowList::new(config.allowed_protocols.clone());
    let dest = std::net::SocketAddr::new(config.s2_ip.into(), config.s2_port);
    let encapsulator = Encapsulator::bind(
        env.clone(),
        dest,
        f64::from(config.max_packets_per_sec),
        allow_list,
        metrics.clone() as Arc<dyn MetricsSink>,
        config.enable_per_ip_limiter,
    )
    .await
    .map_err(|err| err.to_string())?;

    let (submit_tx, submit_rx) = mpsc::channel(4096);

    let mut tasks = vec![tokio::spawn(encapsulator.run(submit_rx, shutdown_rx.clone()))];

    tasks.push(tokio::spawn(diode_s1::heartbeat::run(
        env.clone(),
        Duration::from_millis(config.heartbeat_interval_ms),
        submit_tx.clone(),
        shutdown_rx.clone(),
    )));

    if let Some(udp_port) = config.s1_udp_port {
        let udp_socket = UdpSocket::bind((config.s1_ip, udp_port))
            .await
            .map_err(|err| format!("udp bind failed: {err}"))?;
        tasks.push(tokio::spawn(diode_s1::acceptor::run_udp(
            udp_socket,
            config.max_payload_bytes,
            submit_tx.clone(),
            shutdown_rx.clone(),
        )));
    }

    let acceptor_handle = tokio::spawn(run_supervised_acceptor(
        env.clone(),
        config.s1_ip,
        config.s1_tcp_port,
        config.max_payload_bytes,
        submit_tx,
        metrics.clone() as Arc<dyn MetricsSink>,
        shutdown_rx.clone(),
    ));
    tasks.push(acceptor_handle);

    tokio::signal::ctrl_c().await.map_err(|err| err.to_string())?;
    tracing::info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}

/// Binds the TCP listener (retrying with a bounded backoff) and
/// supervises the accept loop, rebinding a fresh listener on every
/// restart within the budget.
async fn run_supervised_acceptor<E: diode_core::env::Environment>(
    env: E,
    bind_ip: Ipv4Addr,
    bind_port: u16,
    max_payload_bytes: usize,
    submit: mpsc::Sender<diode_s1::EncapsulateRequest>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let result = supervise(&env, "acceptor", RestartPolicy::default(), || {
        let env = env.clone();
        let submit = submit.clone();
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        async move {
            let listener = bind_tcp_with_retry(bind_ip, bind_port)
                .await
                .map_err(|err| err.to_string())?;
            tracing::info!(addr = %bind_ip, port = bind_port, "S1 TCP listening");
            let intake_limiter = TokenBucket::new(&env, 10.0, 100.0);
            diode_s1::acceptor::run_tcp(
                env,
                listener,
                intake_limiter,
                max_payload_bytes,
                submit,
                metrics,
                shutdown,
            )
            .await
        }
    })
    .await;

    if let Err(exhausted) = result {
        tracing::error!(%exhausted, "acceptor permanently failed");
    }
}

/// Retries a bind up to 20 times, 5 seconds apart, to ride out a brief OS
/// port release delay before giving up.
async fn bind_tcp_with_retry(ip: Ipv4Addr, port: u16) -> Result<tokio::net::TcpListener, String> {
    let mut attempt = 0;
    loop {
        match tokio::net::TcpListener::bind((ip, port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) if attempt < 19 => {
                tracing::warn!(%err, attempt, "tcp bind failed, retrying");
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(5)).await;
            },
            Err(err) => return Err(format!("failed to bind {ip}:{port} after 20 attempts: {err}")),
        }
    }
}
