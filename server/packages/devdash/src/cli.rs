use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;

use devdash_error::DashboardError;

use crate::command_validator;
use crate::config::{default_data_dir, DashboardConfig, DEFAULT_HOST, DEFAULT_PORT};
use crate::port_allocator::{AllocationPolicy, PortAllocator, PortAllocatorConfig, PortRange};
use crate::router::{build_router, ApiDoc, AppState};

#[derive(Parser, Debug)]
#[command(name = "devdash")]
#[command(about = "Local developer dashboard for dev servers and terminals", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dashboard HTTP server.
    Server(ServerArgs),
    /// Check a command line against the launch allow-list.
    Validate(ValidateArgs),
    /// Inspect local ports.
    Ports(PortsArgs),
    /// Print the OpenAPI document.
    Openapi,
}

#[derive(Args, Debug)]
struct ServerArgs {
    #[arg(long, env = "DEVDASH_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, env = "DEVDASH_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Where settings and terminal sessions are stored.
    #[arg(long, env = "DEVDASH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "DEVDASH_PORT_RANGE_START", default_value_t = 3000)]
    port_range_start: u16,

    #[arg(long, env = "DEVDASH_PORT_RANGE_END", default_value_t = 3999)]
    port_range_end: u16,

    #[arg(long, env = "DEVDASH_ALLOCATION_POLICY", value_enum, default_value_t = AllocationPolicy::Sticky)]
    allocation_policy: AllocationPolicy,

    #[arg(long, env = "DEVDASH_RESTART_DELAY_MS", default_value_t = 1000)]
    restart_delay_ms: u64,

    /// Log lines kept per app.
    #[arg(long, env = "DEVDASH_LOG_CAPACITY", default_value_t = 100)]
    log_capacity: usize,

    /// Output lines kept per terminal session.
    #[arg(long, env = "DEVDASH_TERMINAL_BUFFER_LINES", default_value_t = 10_000)]
    terminal_buffer_lines: usize,

    #[arg(long, env = "DEVDASH_SESSION_SAVE_INTERVAL_SECS", default_value_t = 30)]
    session_save_interval_secs: u64,

    #[arg(long, env = "DEVDASH_SESSION_EXPIRY_SECS", default_value_t = 86_400)]
    session_expiry_secs: u64,

    #[arg(long, env = "DEVDASH_HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    heartbeat_interval_secs: u64,

    #[arg(long, env = "DEVDASH_OBSERVER_TIMEOUT_SECS", default_value_t = 120)]
    observer_timeout_secs: u64,

    #[arg(long, env = "DEVDASH_STATS_INTERVAL_SECS", default_value_t = 5)]
    stats_interval_secs: u64,

    /// Shell for terminal sessions that do not name one.
    #[arg(long, env = "DEVDASH_SHELL")]
    shell: Option<String>,

    #[arg(long = "cors-allow-origin", env = "DEVDASH_CORS_ALLOW_ORIGIN", value_delimiter = ',')]
    cors_allow_origin: Vec<String>,

    #[arg(long = "cors-allow-credentials")]
    cors_allow_credentials: bool,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    command: String,
}

#[derive(Args, Debug)]
struct PortsArgs {
    #[command(subcommand)]
    command: PortsCommand,
}

#[derive(Subcommand, Debug)]
enum PortsCommand {
    /// Report occupied ports in a range.
    Scan(ScanArgs),
    /// Report a single port.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[arg(long, default_value_t = 3000)]
    start: u16,
    #[arg(long, default_value_t = 3099)]
    end: u16,
}

#[derive(Args, Debug)]
struct CheckArgs {
    port: u16,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Dashboard(#[from] DashboardError),
    #[error("server error: {0}")]
    Server(String),
    #[error("command rejected: {0}")]
    Rejected(String),
}

pub fn run_devdash() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging();
    match cli.command {
        Command::Server(args) => run_server(args),
        Command::Validate(args) => run_validate(&args),
        Command::Ports(args) => run_ports(args.command),
        Command::Openapi => write_stdout(&ApiDoc::openapi()),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
}

impl ServerArgs {
    fn to_config(&self) -> Result<DashboardConfig, CliError> {
        let mut config = DashboardConfig::with_data_dir(
            self.data_dir.clone().unwrap_or_else(default_data_dir),
        );
        config.host = self.host.clone();
        config.port = self.port;
        config.ports = PortAllocatorConfig {
            range: PortRange::new(self.port_range_start, self.port_range_end)?,
            policy: self.allocation_policy,
            ..PortAllocatorConfig::default()
        };
        config.processes.restart_delay = Duration::from_millis(self.restart_delay_ms);
        config.processes.log_capacity = self.log_capacity;
        config.terminals.buffer_lines = self.terminal_buffer_lines;
        config.terminals.save_interval = Duration::from_secs(self.session_save_interval_secs.max(1));
        config.terminals.session_expiry = Duration::from_secs(self.session_expiry_secs);
        if let Some(shell) = &self.shell {
            config.terminals.shell = shell.clone();
        }
        config.events.heartbeat_interval = Duration::from_secs(self.heartbeat_interval_secs.max(1));
        config.events.observer_timeout = Duration::from_secs(self.observer_timeout_secs);
        config.stats_interval = Duration::from_secs(self.stats_interval_secs.max(1));
        Ok(config)
    }
}

fn run_server(args: ServerArgs) -> Result<(), CliError> {
    let config = args.to_config()?;
    let cors = build_cors_layer(&args)?;
    let addr = format!("{}:{}", config.host, config.port);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    runtime.block_on(async move {
        tracing::info!(data_dir = %config.data_dir.display(), "opening dashboard state");
        let state = AppState::open(config).await;
        state.spawn_background();

        let mut router = build_router(state.clone());
        if let Some(cors) = cors {
            router = router.layer(cors);
        }

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "devdash listening");

        let shutdown = state.shutdown_token();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                tracing::info!("shutdown requested");
                shutdown.cancel();
            })
            .await
            .map_err(|err| CliError::Server(err.to_string()));

        state.shutdown().await;
        served
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn run_validate(args: &ValidateArgs) -> Result<(), CliError> {
    match command_validator::validate(&args.command) {
        Ok(()) => {
            println!("ok");
            Ok(())
        }
        Err(err) => Err(CliError::Rejected(err.to_string())),
    }
}

fn run_ports(command: PortsCommand) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;
    let allocator = PortAllocator::new(PortAllocatorConfig::default());
    match command {
        PortsCommand::Scan(args) => {
            let ports = runtime.block_on(allocator.scan_range(args.start, args.end))?;
            write_stdout(&ports)
        }
        PortsCommand::Check(args) => {
            let status = runtime.block_on(allocator.check_port(args.port));
            write_stdout(&status)
        }
    }
}

fn write_stdout(value: &impl Serialize) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)?;
    let mut out = std::io::stdout();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn build_cors_layer(args: &ServerArgs) -> Result<Option<CorsLayer>, CliError> {
    if args.cors_allow_origin.is_empty() && !args.cors_allow_credentials {
        return Ok(None);
    }

    let mut cors = CorsLayer::new();
    if args.cors_allow_origin.is_empty() {
        // Credentials cannot be combined with wildcards.
        cors = if args.cors_allow_credentials {
            cors.allow_origin(AllowOrigin::mirror_request())
        } else {
            cors.allow_origin(Any)
        };
    } else {
        let mut origins = Vec::new();
        for origin in &args.cors_allow_origin {
            let value = origin
                .parse()
                .map_err(|_| CliError::InvalidCorsOrigin(origin.clone()))?;
            origins.push(value);
        }
        cors = cors.allow_origin(origins);
    }
    if args.cors_allow_credentials {
        cors = cors
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true);
    } else {
        cors = cors.allow_methods(Any).allow_headers(Any);
    }
    Ok(Some(cors))
}
