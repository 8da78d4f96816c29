mod api;
mod logging;
mod relay;
mod watcher;

use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use office_core::{AgentFiles, CollaborationTiming, EventHub, Office, OfficeConfig, StaleConfig};
use relay::RelayConfig;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{error, info};
use watcher::{DirWatch, WatcherConfig};

const AGENT_DIR_NAME: &str = ".agent";
const DEFAULT_ADDR: &str = "127.0.0.1:3001";

#[derive(Clone, Debug)]
struct Config {
    watch_dir: PathBuf,
    addr: String,
    debug: bool,
    log_dir: PathBuf,
    office: OfficeConfig,
    watcher: WatcherConfig,
    relay: RelayConfig,
    subscriber_buffer: usize,
}

#[derive(Parser, Debug)]
#[command(name = "office-bridge", about = "Serve agent state files as office events")]
struct Args {
    /// Directory of agent JSON files.
    #[arg(long, default_value = "")]
    dir: String,
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 30)]
    sweep_interval: u64,
    #[arg(long, default_value_t = 120)]
    stale_after: u64,
    #[arg(long, default_value_t = 300)]
    evict_after: u64,
    #[arg(long, default_value_t = 75)]
    debounce_ms: u64,
    #[arg(long, default_value_t = 1000)]
    message_delay_ms: u64,
    #[arg(long, default_value_t = 1500)]
    return_delay_ms: u64,
    #[arg(long, default_value_t = 256)]
    subscriber_buffer: usize,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    /// Seconds between websocket pings; 0 disables them.
    #[arg(long, default_value_t = 15)]
    ping_interval: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub hub: EventHub,
    pub files: AgentFiles,
    pub relay: RelayConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    logging::init(config.debug, &config.log_dir);
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr))?;

    let hub = EventHub::new(config.subscriber_buffer);
    let dir_watch = DirWatch::establish(&config.watch_dir)
        .with_context(|| format!("cannot watch {}", config.watch_dir.display()))?;
    let office = Office::new(config.office.clone(), hub.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let files = AgentFiles::new(dir_watch.dir());
    let watch_task = tokio::spawn(watcher::run(
        dir_watch,
        office,
        config.watcher.clone(),
        shutdown_rx.clone(),
    ));

    let state = AppState {
        hub,
        files,
        relay: config.relay,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(
        event = "bridge_start",
        addr = %addr,
        dir = %config.watch_dir.display(),
        debug = config.debug
    );

    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    });
    let mut server_task = tokio::spawn(async move { server.await });

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(event = "shutdown_requested");
            None
        }
        joined = &mut server_task => Some(joined),
    };
    let _ = shutdown_tx.send(true);
    let joined = match finished {
        Some(joined) => joined,
        None => server_task.await,
    };
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(event = "bridge_error", error = %err),
        Err(err) => error!(event = "server_join_error", error = %err),
    }

    if let Err(err) = watch_task.await {
        error!(event = "watcher_join_error", error = %err);
    }
    info!(event = "bridge_stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(relay::ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/api/health", get(api::health))
        .route("/api/agents", get(api::list_agents).post(api::create_agent))
        .route(
            "/api/agents/:name",
            get(api::get_agent)
                .patch(api::update_agent)
                .delete(api::delete_agent),
        )
        .with_state(state)
}

fn load_config() -> Config {
    let args = Args::parse();
    let watch_dir = resolve_watch_dir(&args.dir);
    let addr = resolve_addr(&args.addr);
    let debug = args.debug || env_true("OFFICE_DEBUG");
    let log_dir = resolve_log_dir(&args.log_dir, &watch_dir);
    Config {
        watch_dir,
        addr,
        debug,
        log_dir,
        office: OfficeConfig {
            collaboration: CollaborationTiming {
                message_delay: Duration::from_millis(args.message_delay_ms),
                return_delay: Duration::from_millis(args.return_delay_ms),
            },
            stale: StaleConfig {
                sweep_interval: Duration::from_secs(args.sweep_interval),
                stale_after: Duration::from_secs(args.stale_after),
                evict_after: Duration::from_secs(args.evict_after),
            },
            ..OfficeConfig::default()
        },
        watcher: WatcherConfig {
            debounce: Duration::from_millis(args.debounce_ms),
            sweep_interval: Duration::from_secs(args.sweep_interval),
        },
        relay: RelayConfig {
            ping_interval: Duration::from_secs(args.ping_interval),
            write_timeout: Duration::from_secs(args.write_timeout.max(1)),
        },
        subscriber_buffer: args.subscriber_buffer,
    }
}

fn env_true(key: &str) -> bool {
    env_value(key).is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_watch_dir(dir_flag: &str) -> PathBuf {
    if !dir_flag.trim().is_empty() {
        return PathBuf::from(dir_flag);
    }
    if let Some(value) = env_value("OFFICE_AGENT_DIR") {
        return PathBuf::from(value);
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    discover_agent_dir(&cwd).unwrap_or_else(|| cwd.join(AGENT_DIR_NAME))
}

/// Look for `.agent` in `start`, its parent and its grandparent.
fn discover_agent_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(3)
        .map(|dir| dir.join(AGENT_DIR_NAME))
        .find(|candidate| candidate.is_dir())
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    if let Some(value) = env_value("OFFICE_ADDR") {
        return value;
    }
    if let Some(port) = env_value("WS_PORT").and_then(|port| port.trim().parse::<u16>().ok()) {
        return port_addr(port);
    }
    DEFAULT_ADDR.to_string()
}

fn port_addr(port: u16) -> String {
    format!("0.0.0.0:{port}")
}

fn resolve_log_dir(log_dir_flag: &str, watch_dir: &Path) -> PathBuf {
    if !log_dir_flag.trim().is_empty() {
        return PathBuf::from(log_dir_flag);
    }
    if let Some(value) = env_value("OFFICE_LOG_DIR") {
        return PathBuf::from(value);
    }
    watch_dir.join("logs")
}
