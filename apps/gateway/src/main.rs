use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gw_admin::AppState;
use gw_assembly::AssemblyService;
use gw_config::ConfigHandle;
use gw_credential::{CredentialStore, ReqwestOAuthRefresher};
use gw_proxy::{NoopTrafficSink, ReqwestTransport, TransportTimeouts};
use gw_router::RoutingStrategy;
use gw_storage::FileStorage;
use tokio::sync::broadcast;

/// CLI flags, each overridable by an equivalent `GATEWAY_*` environment
/// variable (spec §6.4). Flags win over the config file; the config file
/// wins over built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "gateway", version, about = "Multi-tenant Gemini/Code Assist credential gateway")]
struct CliArgs {
    /// Path to the YAML/JSON config file (spec §6.4 conventional paths).
    #[arg(long, env = "GATEWAY_CONFIG", default_value = "./config.yaml")]
    config: String,

    /// Directory the file storage backend roots itself under, overriding
    /// `storage.data_dir` from the config file.
    #[arg(long, env = "GATEWAY_DATA_DIR")]
    data_dir: Option<String>,

    /// Bind port, overriding `server.port` from the config file.
    #[arg(long, env = "GATEWAY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CliArgs::parse();

    let config = Arc::new(ConfigHandle::open(&args.config)?);
    let initial = config.current();

    let data_dir = args.data_dir.clone().unwrap_or_else(|| initial.storage.data_dir.clone());
    let port = args.port.unwrap_or(initial.server.port);
    let base_path = initial.server.base_path.clone();

    let storage = Arc::new(FileStorage::open(&data_dir).await?);
    storage.spawn_watcher(Duration::from_secs(5));

    let refresher = Arc::new(ReqwestOAuthRefresher::new(reqwest::Client::new()));
    let credentials = Arc::new(CredentialStore::new(
        storage.clone(),
        refresher,
        initial.execution.max_concurrent_per_credential,
        initial.auto_ban.status_thresholds.clone(),
    ));
    credentials.load_credentials().await?;

    let router = Arc::new(RoutingStrategy::new(credentials.clone(), initial.routing.clone()));
    let assembly = Arc::new(AssemblyService::new(storage.clone(), Some(router.clone())));

    spawn_routing_config_sync(config.clone(), router.clone());

    let transport_timeouts = TransportTimeouts {
        connect_ms: initial.retry.connect_timeout_ms,
        response_header_ms: initial.retry.response_header_timeout_ms,
    };
    let transport: Arc<dyn gw_proxy::UpstreamTransport> = Arc::new(ReqwestTransport::new(
        transport_timeouts,
        initial.response_shaping.proxy_url.as_deref(),
    )?);

    let (events, _rx) = broadcast::channel::<gw_admin::state::GatewayEvent>(256);
    let state = AppState {
        config: config.clone(),
        storage: storage.clone(),
        credentials,
        router,
        assembly,
        transport,
        traffic: Arc::new(NoopTrafficSink),
        log_sink: Arc::new(gw_admin::state::NoopLogStreamSink),
        events,
        started_at: gw_common::now_unix(),
    };

    let app = gw_admin::router(state, &base_path);

    let bind = format!("{}:{}", initial.server.host, port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(addr = %bind, base_path = %base_path, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Keeps the router's `RoutingConfig` copy in step with the watched config
/// file (spec §5 "watchers receive a deep copy"): every reload notification
/// re-reads the current snapshot and pushes its `routing` domain into the
/// strategy's `ArcSwap`.
fn spawn_routing_config_sync(config: Arc<ConfigHandle>, router: Arc<RoutingStrategy>) {
    let mut changes = config.subscribe();
    tokio::spawn(async move {
        while changes.recv().await.is_ok() {
            router.update_config(config.current().routing.clone());
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
