mod collectors;
mod config;
mod daemon;
mod http;
mod metrics;
mod routes;
mod server;
mod state;

use axum::serve;
use clap::Parser;
use collectors::SamplerContext;
use config::Config;
use metrics::Metrics;
use server::QueryServer;
use state::SnapshotStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostmine")]
#[command(version, about = "Samples host metrics and serves them as JSON over TCP")]
struct Cli {
    /// Detach from the controlling terminal and run in the background.
    #[arg(long)]
    daemon: bool,
    /// YAML configuration file; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
}

fn main() {
    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    init_tracing();

    let cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if cli.daemon {
        if let Err(err) = daemon::daemonize() {
            error!(error = %err, "failed to detach");
            std::process::exit(1);
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cfg));
}

async fn run(cfg: Config) {
    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };
    let listener = match server::bind(addr, cfg.backlog) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "cannot start query server");
            std::process::exit(1);
        }
    };

    let cores = collectors::detect_core_count();
    let store = SnapshotStore::new(cores);
    info!(
        listen = %addr,
        cores,
        pid = std::process::id(),
        max_interfaces = cfg.max_interfaces,
        "starting hostmine"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sampler_tasks = collectors::spawn_all(
        &cfg,
        SamplerContext {
            store: store.clone(),
            metrics: metrics.clone(),
            shutdown: shutdown_rx.clone(),
        },
    );

    let server_task = {
        let server = QueryServer::new(listener, store.clone(), metrics.clone(), cfg.server.clone());
        match server.local_addr() {
            Ok(local) => info!(listen = %local, "query server listening"),
            Err(err) => warn!(error = %err, "query server address unknown"),
        }
        tokio::spawn(server.run(shutdown_rx.clone()))
    };

    let exporter_task = cfg.metrics_listen.clone().map(|metrics_listen| {
        let metrics = metrics.clone();
        let store = store.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, store);
            let listener = match TcpListener::bind(&metrics_listen).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, listen = %metrics_listen, "failed to start metrics exporter");
                    return;
                }
            };
            info!(listen = %metrics_listen, "metrics exporter listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "metrics exporter failed");
            }
        })
    });

    wait_for_shutdown_signal().await;
    info!("shutting down");

    let _ = shutdown_tx.send(true);

    for task in sampler_tasks {
        let _ = task.await;
    }
    let _ = server_task.await;
    if let Some(task) = exporter_task {
        let _ = task.await;
    }
    info!("stopped");
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            error!(error = %err, "failed to wait for Ctrl+C");
                        }
                    }
                    _ = term.recv() => {}
                }
                return;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
