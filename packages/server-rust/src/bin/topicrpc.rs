//! `topicrpc` runs the standard five-service deployment.
//!
//! `--role all` (the default) starts a worker with an in-memory record store
//! for each standard service and serves the HTTP gateway in one process.
//! Against a networked broker the parts run separately: `--role gateway`
//! serves HTTP only, `--role worker --service <name>` answers one service.
//! Every role runs until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use futures_util::future::join_all;
use metrics_exporter_prometheus::PrometheusBuilder;
use topicrpc_core::{TopicSpec, Topology};
use topicrpc_server::bridge::config::{BROKER_ADDRESS_ENV, DEFAULT_BROKER_ADDRESS};
use topicrpc_server::bridge::{spawn_provisioning, RetryPolicy};
use topicrpc_server::records::standard_table;
use topicrpc_server::{
    broker, BridgeConfig, Broker, GatewayClient, GatewayConfig, GatewayServer, ReplyMode,
    WorkerRuntime,
};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Gateway and every worker in one process
    All,
    /// HTTP gateway only
    Gateway,
    /// One service's worker
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReplyModeArg {
    Multiplexed,
    PerCall,
}

impl From<ReplyModeArg> for ReplyMode {
    fn from(arg: ReplyModeArg) -> Self {
        match arg {
            ReplyModeArg::Multiplexed => Self::Multiplexed,
            ReplyModeArg::PerCall => Self::PerCall,
        }
    }
}

/// CLI arguments for topicrpc
#[derive(Parser, Debug)]
#[command(name = "topicrpc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP gateway and workers bridged over a pub/sub broker", long_about = None)]
struct Args {
    /// Which part of the deployment this process runs
    #[arg(long, env = "TOPICRPC_ROLE", value_enum, default_value_t = Role::All)]
    role: Role,

    /// Service answered by `--role worker`, e.g. `patients`
    #[arg(long, env = "TOPICRPC_SERVICE", required_if_eq("role", "worker"))]
    service: Option<String>,

    /// Broker address: `memory://<label>` or `kafka://host:port`
    #[arg(long, env = BROKER_ADDRESS_ENV, default_value = DEFAULT_BROKER_ADDRESS)]
    broker: String,

    /// HTTP bind address
    #[arg(long, env = "TOPICRPC_HOST", default_value = "0.0.0.0")]
    host: String,

    /// HTTP port
    #[arg(short, long, env = "TOPICRPC_PORT", default_value_t = 8080)]
    port: u16,

    /// Allowed CORS origins, comma separated
    #[arg(long, value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Per-call reply deadline in seconds
    #[arg(long, default_value_t = 30)]
    call_timeout_secs: u64,

    /// How the gateway waits for replies
    #[arg(long, value_enum, default_value_t = ReplyModeArg::Multiplexed)]
    reply_mode: ReplyModeArg,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "TOPICRPC_METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.log_format);

    if let Some(port) = args.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()
            .context("cannot start Prometheus exporter")?;
        info!(port, "metrics exporter listening");
    }

    let bridge = BridgeConfig {
        broker_address: args.broker,
        call_timeout: Duration::from_secs(args.call_timeout_secs),
        reply_mode: args.reply_mode.into(),
        ..BridgeConfig::default()
    };
    let broker = broker::connect(&bridge.broker_address)
        .with_context(|| format!("cannot open broker {}", bridge.broker_address))?;
    let topology = Arc::new(Topology::standard());

    let topics: Vec<TopicSpec> = topology
        .required_topics()
        .iter()
        .map(|name| bridge.topic_spec(name))
        .collect();
    drop(spawn_provisioning(
        Arc::clone(&broker),
        topics,
        RetryPolicy::from(&bridge),
    ));

    let services: Vec<String> = match (args.role, args.service) {
        (Role::Worker, Some(service)) => vec![service],
        (Role::Worker, None) => anyhow::bail!("--role worker needs --service"),
        (Role::Gateway, _) => Vec::new(),
        (Role::All, _) => topology.services().map(|r| r.name().to_string()).collect(),
    };
    let mut workers = start_workers(&broker, &topology, &services, &bridge)?;

    if args.role == Role::Worker {
        info!(broker = broker.address(), services = ?services, "topicrpc worker started");
        shutdown_signal().await;
    } else {
        let gateway = Arc::new(GatewayClient::new(Arc::clone(&broker), topology, &bridge));
        let mut server = GatewayServer::new(
            GatewayConfig {
                host: args.host,
                port: args.port,
                cors_origins: args.cors_origins,
                request_timeout: bridge.call_timeout + Duration::from_secs(5),
                ..GatewayConfig::default()
            },
            gateway,
        );
        let port = server.start().await?;
        info!(port, broker = broker.address(), workers = workers.len(), "topicrpc started");

        server.serve(shutdown_signal()).await?;
    }

    join_all(workers.iter_mut().map(WorkerRuntime::stop)).await;
    info!("topicrpc stopped");
    Ok(())
}

fn start_workers(
    broker: &Arc<dyn Broker>,
    topology: &Topology,
    services: &[String],
    config: &BridgeConfig,
) -> anyhow::Result<Vec<WorkerRuntime>> {
    services
        .iter()
        .map(|service| {
            WorkerRuntime::start(Arc::clone(broker), topology, service, standard_table(service), config)
                .with_context(|| format!("cannot start worker for {service}"))
        })
        .collect()
}

fn setup_logging(format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "cannot listen for shutdown signal"),
    }
}
