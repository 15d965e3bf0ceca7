//! swproxy entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use swproxy::cache::{CacheStore, DiskStore, MemoryStore};
use swproxy::config::Config;
use swproxy::middleware::{LoggerMiddleware, Pipeline, ProxyMiddleware};
use swproxy::proxy::OfflineProxy;
use swproxy::server::Server;
use swproxy::upstream::{HttpUpstream, Upstream};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Offline-capable HTTP cache proxy.
#[derive(Debug, Parser)]
#[command(name = "swproxy", version, about)]
struct Args {
    /// Path to a YAML config file (default: ./swproxy.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Origin to forward requests to
    #[arg(short, long)]
    upstream: Option<String>,

    /// Directory for the persistent cache store
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Partition version stamp; older partitions are evicted on activation
    #[arg(long)]
    version_stamp: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Log level is controlled by:
/// 1. `--debug` flag sets level to DEBUG
/// 2. `RUST_LOG` environment variable (if set)
/// 3. Default is INFO
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("swproxy=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swproxy=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("failed to load config")?;

    if let Some(listen) = &args.listen {
        config.listen.clone_from(listen);
    }
    if let Some(upstream) = &args.upstream {
        config.upstream.clone_from(upstream);
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if let Some(version) = args.version_stamp {
        config.version = version;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn CacheStore>> {
    match &config.cache_dir {
        Some(dir) => {
            let store = DiskStore::open(dir)
                .await
                .with_context(|| format!("failed to open cache store at {}", dir.display()))?;
            info!(path = %dir.display(), "using disk cache store");
            Ok(Arc::new(store))
        }
        None => {
            info!("using in-memory cache store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);
    tracing::debug!(?args, "swproxy starting");

    let config = resolve_config(&args)?;
    if let Ok(addr) = config.listen.parse::<std::net::SocketAddr>() {
        if !addr.ip().is_loopback() {
            warn!(
                listen = %addr,
                "listening on a non-loopback address; cached API answers are shared by all clients"
            );
        }
    }
    let store = open_store(&config).await?;
    let upstream: Arc<dyn Upstream> = Arc::new(
        HttpUpstream::new(&config.upstream).context("invalid upstream origin")?,
    );

    let proxy = Arc::new(OfflineProxy::new(config.proxy_settings(), store, upstream));

    // A failed install leaves the proxy transparent, like an uninstalled worker.
    match proxy.install().await {
        Ok(_) => {
            proxy.activate().await.context("activation failed")?;
        }
        Err(e) => {
            error!(error = %e, "install failed, forwarding all requests to the network");
        }
    }

    let handler = Pipeline::new()
        .with(Arc::new(LoggerMiddleware))
        .with(Arc::new(ProxyMiddleware::new(Arc::clone(&proxy))))
        .into_handler();

    let server = Server::bind(&config.listen).await?;
    server
        .run_until(handler, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!(pending = proxy.pending_writes(), "draining background cache writes");
    proxy.flush().await;
    Ok(())
}
