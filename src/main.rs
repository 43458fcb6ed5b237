use clap::{Args, Parser};
use coshell_core::client::tui::{Tui, TuiView};
use coshell_core::session::{ConnectionManager, DisplayName, ManagerConfig, NameError};
use coshell_core::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use coshell_core::terminal::StreamRenderer;
use coshell_core::transport::TransportError;
use coshell_core::transport::websocket::{self, WebSocketConnector};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;
use url::Url;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    logctl::init(&cli.logging.to_config()).map_err(|err| CliError::Logging(err.to_string()))?;

    let name = match &cli.name {
        Some(raw) => DisplayName::parse(raw)?,
        None => prompt_name()?,
    };
    let server = Url::parse(&cli.server)
        .map_err(|err| CliError::InvalidServer(format!("{}: {err}", cli.server)))?;
    let endpoint = websocket::session_url(&server, name.as_str())?;
    info!(endpoint = %endpoint, name = %name, "joining shared session");

    let renderer = Arc::new(Mutex::new(StreamRenderer::new()));
    let view = TuiView::new();
    let (handle, manager_task) = ConnectionManager::spawn(
        name,
        ManagerConfig::new(endpoint),
        Arc::new(WebSocketConnector),
        renderer.clone(),
        view.clone(),
    );

    let ui = Tui::new(&view, renderer, handle);
    let ui_result = tokio::task::spawn_blocking(move || ui.run())
        .await
        .map_err(|err| CliError::Ui(err.to_string()))?;
    ui_result.map_err(|err| CliError::Ui(err.to_string()))?;

    // The TUI requested shutdown on exit; wait for the close handshake.
    let _ = manager_task.await;
    Ok(())
}

fn prompt_name() -> Result<DisplayName, CliError> {
    let stdin = io::stdin();
    loop {
        print!("display name: ");
        io::stdout().flush()?;
        let mut raw = String::new();
        if stdin.read_line(&mut raw)? == 0 {
            return Err(CliError::NameRequired);
        }
        match DisplayName::parse(&raw) {
            Ok(name) => return Ok(name),
            Err(err) => eprintln!("⚠️  {err}"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "coshell",
    about = "🖥️  Join a shared terminal session with a chat side channel",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "COSHELL_SERVER",
        default_value = "http://127.0.0.1:8080",
        help = "Base URL of the coshell server; http(s) maps to ws(s)"
    )]
    server: String,

    #[arg(
        value_name = "NAME",
        help = "Display name, 1-20 characters; prompted when omitted"
    )]
    name: Option<String>,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "COSHELL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "COSHELL_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid display name: {0}")]
    Name(#[from] NameError),
    #[error("a display name is required")]
    NameRequired,
    #[error("invalid server url {0}")]
    InvalidServer(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("terminal ui failed: {0}")]
    Ui(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
