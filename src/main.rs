// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use harmony_shim::config::{self, ConfigSource as _};
use harmony_shim::engine;
use harmony_shim::proxy;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "harmony-shim",
    about = "Serves inline-XML tool calls to clients of a structured tool-calling model server"
)]
struct Cli {
    /// Path to the shim.yaml config file
    #[arg(long, default_value = "shim.yaml", env = "SHIM_CONFIG")]
    config: String,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST), env = "SHIM_HOST")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = proxy::DEFAULT_PORT, env = "SHIM_PORT")]
    port: u16,

    /// Inference server base URL; overrides upstream.base_url
    #[arg(long, env = "SHIM_UPSTREAM")]
    upstream: Option<String>,

    /// Most verbose level logged (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "SHIM_LOG_LEVEL")]
    log_level: tracing::Level,
}

fn fail(message: &str, error: &dyn std::fmt::Display) -> ! {
    tracing::error!(error = %error, "{message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let source = config::FileSource::new(&cli.config);
    let mut config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => fail("failed to load config", &e),
    };
    if let Some(url) = &cli.upstream {
        match config::normalize_base_url(url) {
            Ok(base_url) => config.upstream.base_url = base_url,
            Err(e) => fail("invalid --upstream", &e),
        }
    }
    let config = Arc::new(config);

    tracing::info!(
        source = %source.describe(),
        version = %config.version,
        upstream = %config.upstream.base_url,
        model = %config.upstream.model,
        strict_xml = config.conversion.strict_xml,
        config_hash = %config.config_hash,
        "config loaded"
    );

    let upstream: Arc<dyn proxy::UpstreamClient> = Arc::new(engine::build_engine_client(config));
    let app = proxy::build_router(upstream);

    let addr = SocketAddr::new(cli.host, cli.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => fail("failed to bind to address", &e),
    };

    tracing::info!(%addr, "harmony-shim listening");

    if let Err(e) = axum::serve(listener, app).await {
        fail("server error", &e);
    }
}
