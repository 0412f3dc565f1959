//! podctl
//!
//! Command-line front end for one pod. Each invocation loads the pod
//! configuration, builds its driver, runs a single operation and prints the
//! result as JSON on stdout. Logs go to stderr.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use pod_resource_manager::{ComposeRequest, DriverRegistry, PodConfig, PodManager, PowerParameters};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pod Resource Manager - discover and compose machines on virsh and RSD pods
#[derive(Parser, Debug)]
#[command(name = "podctl", author, version, about, long_about = None)]
struct Args {
    /// Pod configuration file (YAML)
    #[arg(short, long, env = "PODCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print Prometheus metrics to stderr after the operation
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inventory the pod
    Discover,
    /// Compose a machine from a request file (YAML or JSON)
    Compose {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Delete a composed machine
    Decompose {
        /// Machine power parameter, e.g. `power_id=vm1` or `node_id=12`
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Power a machine on
    PowerOn {
        system_id: String,
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Power a machine off
    PowerOff {
        system_id: String,
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Report a machine's power state
    PowerQuery {
        system_id: String,
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// List registered drivers and their settings
    Drivers,
    /// Print JSON schemas for the pod configuration and compose requests
    Schema,
}

fn parse_param(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", value))
}

fn context(params: Vec<(String, String)>) -> PowerParameters {
    params.into_iter().collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let registry = DriverRegistry::new();
    match &args.command {
        Command::Drivers => return print_json(&registry.descriptors()),
        Command::Schema => {
            return print_json(&serde_json::json!({
                "pod_config": schemars::schema_for!(PodConfig),
                "compose_request": schemars::schema_for!(ComposeRequest),
            }))
        }
        _ => {}
    }

    let path = args
        .config
        .as_deref()
        .ok_or_else(|| anyhow!("a pod configuration is required (--config or PODCTL_CONFIG)"))?;
    let config = PodConfig::load(path)
        .await
        .with_context(|| format!("loading pod configuration {}", path.display()))?;
    let manager = PodManager::from_config(&registry, &config)
        .with_context(|| format!("building {} driver for pod {}", config.driver, config.name))?;
    info!("Pod {} ({} driver), {} v{}", config.name, config.driver, pod_resource_manager::NAME, pod_resource_manager::VERSION);

    let result = run(&manager, args.command).await;
    if args.print_metrics {
        eprintln!("{}", manager.metrics().encode()?);
    }
    result
}

async fn run(manager: &PodManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Discover => print_json(&manager.discover().await?),
        Command::Compose { request } => {
            let request = load_request(&request).await?;
            print_json(&manager.compose(&request).await?)
        }
        Command::Decompose { params } => print_json(&manager.decompose(&context(params)).await?),
        Command::PowerOn { system_id, params } => {
            manager.power_on(&system_id, &context(params)).await?;
            Ok(())
        }
        Command::PowerOff { system_id, params } => {
            manager.power_off(&system_id, &context(params)).await?;
            Ok(())
        }
        Command::PowerQuery { system_id, params } => {
            let state = manager.power_query(&system_id, &context(params)).await?;
            println!("{}", state);
            Ok(())
        }
        Command::Drivers | Command::Schema => Ok(()),
    }
}

/// YAML is a superset of JSON, so one parser reads both
async fn load_request(path: &Path) -> anyhow::Result<ComposeRequest> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading compose request {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing compose request {}", path.display()))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["reqwest=warn", "hyper=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
