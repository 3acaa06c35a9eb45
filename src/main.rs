//! mockwire - CLI Entry Point
//!
//! Loads a mapping configuration and replays request fixtures through it,
//! printing each log entry as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use mockwire::{MockServer, MockServerConfig, RequestDefinition};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mockwire",
    about = "HTTP mock engine - request matching and response templating",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mockwire.yaml")]
    config: PathBuf,

    /// Request fixture file (YAML or JSON, one request or a list)
    #[arg(short, long = "request", value_name = "FILE")]
    requests: Vec<PathBuf>,

    /// Hosting path base removed from request paths
    #[arg(long, value_name = "PATH")]
    path_base: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../config/default-config.yaml"));
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no mappings)");
        MockServerConfig::default()
    };

    if args.validate {
        config.validate()?;
        for problem in config.diagnostics() {
            println!("warning: {}", problem);
        }
        println!(
            "Configuration is valid ({} mappings defined)",
            config.mappings.len()
        );
        return Ok(());
    }

    if args.path_base.is_some() {
        config.settings.path_base = args.path_base;
    }
    let path_base = config.settings.path_base.clone();
    let server = Arc::new(MockServer::new(config));

    let mut requests = Vec::new();
    for path in &args.requests {
        let definitions = RequestDefinition::load(path)
            .with_context(|| format!("Failed to load request file {:?}", path))?;
        for definition in definitions {
            requests.push(definition.into_message(path_base.as_deref())?);
        }
    }
    info!(requests = requests.len(), "Replaying requests");

    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.handle(request).await })
        })
        .collect();

    for handle in handles {
        match handle.await? {
            Ok(entry) => println!("{}", serde_json::to_string_pretty(entry.as_ref())?),
            Err(e) => error!(error = %e, "Request failed"),
        }
    }

    info!(
        total = server.total_requests(),
        matched = server.total_matched(),
        unmatched = server.total_unmatched(),
        failed = server.total_failed(),
        "Done"
    );

    Ok(())
}
