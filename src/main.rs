//! localup-inspect: capture, browse and replay tunneled HTTP traffic

use anyhow::{Context, Result};
use clap::Parser;
use localup_inspect::{Inspector, InspectorConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Localup request inspector
#[derive(Parser, Debug)]
#[command(name = "localup-inspect")]
#[command(about = "Inspect, search and replay HTTP requests flowing through a localup tunnel")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "LOCALUP_INSPECT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Store connection string (e.g. "sqlite://./inspect.db?mode=rwc")
    #[arg(long, env = "LOCALUP_INSPECT_DATABASE_URL")]
    database_url: Option<String>,

    /// Number of exchanges kept in the store
    #[arg(long)]
    max_logged_requests: Option<usize>,

    /// Local server replayed requests are sent to (host:port)
    #[arg(long, env = "LOCALUP_LOCAL_ADDRESS")]
    local_target: Option<String>,

    /// Subdomain recorded for requests without x-original-host
    #[arg(long)]
    subdomain: Option<String>,

    /// Dashboard port summaries are pushed to
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Query API bind address
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Keep exchanges from previous sessions
    #[arg(long)]
    keep_history: bool,

    /// Do not draw the live request table
    #[arg(long)]
    no_terminal: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let inspector = Inspector::from_config(config)
        .await
        .context("Failed to start inspector")?;

    if inspector.config().terminal.enabled {
        print_banner(inspector.config());
    }

    tokio::select! {
        result = inspector.serve() => {
            if let Err(e) = &result {
                error!("Query API stopped: {}", e);
            }
            result.context("Query API failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout belongs to the request table
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<InspectorConfig> {
    let mut config = match &cli.config {
        Some(path) => InspectorConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => InspectorConfig::default(),
    };

    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(max) = cli.max_logged_requests {
        config.max_logged_requests = max;
    }
    if let Some(target) = &cli.local_target {
        config.local_target = target.clone();
    }
    if let Some(subdomain) = &cli.subdomain {
        config.subdomain = Some(subdomain.clone());
    }
    if let Some(port) = cli.dashboard_port {
        config.dashboard_port = port;
    }
    if let Some(addr) = cli.api_addr {
        config.api_addr = addr;
    }
    if cli.keep_history {
        config.truncate_on_start = false;
    }
    if cli.no_terminal {
        config.terminal.enabled = false;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Fills the header lines reserved above the request table
fn print_banner(config: &InspectorConfig) {
    let mut lines = vec![
        format!("localup-inspect {}", env!("CARGO_PKG_VERSION")),
        String::new(),
        format!("Local target     {}", config.local_target),
        format!("Query API        http://{}/api/logs", config.api_addr),
        format!("Dashboard push   http://127.0.0.1:{}/api/logs", config.dashboard_port),
        format!("History          {} requests", config.max_logged_requests),
        String::new(),
        "HTTP Requests".to_string(),
        "-------------".to_string(),
    ];
    lines.resize(usize::from(config.terminal.header_lines), String::new());

    for line in lines {
        println!("{}", line);
    }
}
