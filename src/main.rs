//! Security header proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────────┐
//!                      │                  SECURITY PROXY                        │
//!                      │                                                        │
//!   Client Request     │  ┌─────────┐   ┌──────────────┐   ┌───────────────┐   │
//!   ───────────────────┼─▶│  http   │──▶│   security   │──▶│ proxy_handler │───┼──▶ Upstream
//!                      │  │ server  │   │  middleware  │   └───────────────┘   │    App
//!                      │  └─────────┘   │ rules, rate  │                       │
//!   Client Response    │                │ limit, HTML  │                       │
//!   ◀──────────────────┼────────────────│ pipeline,    │◀──────────────────────┼───
//!                      │                │ headers      │                       │
//!                      │                └──────────────┘                       │
//!                      │  ┌──────────────────────────────────────────────────┐ │
//!                      │  │ config + watcher │ rules │ integrity │ lifecycle  │ │
//!                      │  └──────────────────────────────────────────────────┘ │
//!                      └───────────────────────────────────────────────────────┘
//!
//!   prerender: static site dir → same rules + pipeline → rewritten pages,
//!              headers.json, optional _headers / vercel-headers.json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use security_proxy::config::{load_config, ConfigWatcher, ProxyConfig};
use security_proxy::http::HttpServer;
use security_proxy::integrity::{AssetDigests, HashAlgorithm};
use security_proxy::lifecycle::{wait_for_shutdown, Shutdown};
use security_proxy::observability::{logging, metrics};
use security_proxy::pipeline::{RenderMode, RequestContext};
use security_proxy::prerender::run_prerender;
use security_proxy::rules::{HookRegistry, RuleSet};
use security_proxy::security::resolved_header_map;

#[derive(Parser)]
#[command(name = "security-proxy")]
#[command(about = "Per-route security headers, CSP and SRI for an upstream web app", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy (default)
    Serve,
    /// Apply security rules to a prerendered site
    Prerender {
        /// Directory of generated HTML and assets
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print the headers a path would receive, as JSON
    Inspect {
        #[arg(short, long, default_value = "/")]
        path: String,
    },
    /// Print integrity digests of every file under a directory, as JSON
    Hash {
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long, default_value = "sha384")]
        algorithm: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_tracing(&config.observability.log_level);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, cli.config).await,
        Commands::Prerender { input } => {
            let summary = run_prerender(&config, &input, &HookRegistry::new()).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "pages": summary.pages,
                "skipped": summary.skipped,
                "assets": summary.assets,
                "exported": summary.exported,
            }))?);
            Ok(())
        }
        Commands::Inspect { path } => {
            let rules = RuleSet::build(&config.security, &config.route_rules, &HookRegistry::new())?;
            let mut ctx = RequestContext::new(rules.rules_for_path(&path), RenderMode::Ssr);
            ctx.finalize_csp();
            let headers: BTreeMap<String, String> = resolved_header_map(&ctx).into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "route": ctx.route,
                "headers": headers,
            }))?);
            Ok(())
        }
        Commands::Hash { dir, algorithm } => {
            let algorithm = HashAlgorithm::from_name(&algorithm)
                .ok_or_else(|| format!("unsupported algorithm `{algorithm}`"))?;
            let assets = AssetDigests::hash_directory(&dir, algorithm, &config.build.base_url)?;
            println!("{}", serde_json::to_string_pretty(&assets)?);
            Ok(())
        }
    }
}

async fn serve(config: ProxyConfig, config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("security-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        route_rules = config.route_rules.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must outlive the server; dropping it stops notifications.
    let (config_updates, _watcher) = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            (updates, Some(watcher.run()?))
        }
        None => (tokio::sync::mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    let signals = shutdown.clone();
    tokio::spawn(async move { wait_for_shutdown(&signals).await });

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
