// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! CLI tool for the flespi RPC gateway (fgw)

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "fgw")]
#[command(about = "JSON-RPC 2.0 gateway for the flespi REST API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML). Environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON-RPC endpoint (default)
    Serve {
        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List the methods callers may invoke
    Methods,
    /// Invoke one method and print its result
    Call {
        /// Dotted method name, e.g. http.gw.devices.get
        method: String,

        /// Positional params as a JSON array. Any other JSON value is sent as the only param.
        params: Option<String>,
    },
    /// Print a sample configuration file
    SampleConfig,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        bind: None,
        port: None,
    }) {
        Commands::Serve { bind, port } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
        }
        Commands::Methods => {
            init_logging(fgwlib::LogLevel::default());
            for method in fgwlib::CapabilityRegistry::flespi().iter() {
                println!("{}", method);
            }
        }
        Commands::Call { method, params } => {
            let config = load_config(cli.config.as_deref())?;
            let params = parse_params(params.as_deref())?;
            call(config, &method, params).await?;
        }
        Commands::SampleConfig => {
            print!("{}", fgwlib::GatewayConfig::sample_toml());
        }
    }

    Ok(())
}

/// Load, validate, and start logging at the configured level
#[cfg(feature = "cli")]
fn load_config(path: Option<&Path>) -> Result<fgwlib::GatewayConfig, fgwlib::GatewayError> {
    let config = fgwlib::GatewayConfig::load(path)?;
    init_logging(config.log_level);
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "cli")]
fn init_logging(level: fgwlib::LogLevel) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_filter()))
        .init();
}

#[cfg(feature = "cli")]
fn parse_params(raw: Option<&str>) -> Result<Vec<serde_json::Value>, serde_json::Error> {
    let value = match raw {
        Some(raw) => serde_json::from_str(raw)?,
        None => return Ok(Vec::new()),
    };
    Ok(match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    })
}

#[cfg(feature = "cli")]
async fn serve(config: fgwlib::GatewayConfig) -> fgwlib::Result<()> {
    use fgwlib::upstream::flespi::FlespiClient;
    use fgwlib::{
        CapabilityRegistry, Dispatcher, HttpServer, LifecycleLogger, RpcServer, UpstreamClient,
    };
    use std::sync::Arc;

    let client = Arc::new(FlespiClient::new(&config.upstream)?);
    let lifecycle = client.lifecycle().clone();
    let _logger = LifecycleLogger::attach(&lifecycle);

    let dispatcher = Dispatcher::new(client.clone(), CapabilityRegistry::flespi());
    let rpc = Arc::new(RpcServer::new(Arc::new(dispatcher)));
    let server = HttpServer::new(config.server.clone(), rpc)
        .with_lifecycle(lifecycle)
        .bind()
        .await?;

    log::info!("forwarding to {}", client.endpoint());

    // Requests are accepted while the probe is still in flight
    let probe = client.clone();
    tokio::spawn(async move {
        if let Err(e) = probe.connect().await {
            log::warn!("upstream probe failed: {}", e);
        }
    });

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    client.close();
    Ok(())
}

#[cfg(feature = "cli")]
async fn call(
    config: fgwlib::GatewayConfig,
    method: &str,
    params: Vec<serde_json::Value>,
) -> Result<(), Box<dyn std::error::Error>> {
    use fgwlib::upstream::flespi::FlespiClient;
    use fgwlib::{CapabilityRegistry, Dispatcher};
    use std::sync::Arc;

    let client = Arc::new(FlespiClient::new(&config.upstream)?);
    let dispatcher = Dispatcher::new(client.clone(), CapabilityRegistry::flespi());
    let result = dispatcher.invoke(method, params).await;
    client.close();

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
