use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Trade journal sidecar. Without a subcommand it serves JSON requests on
/// stdin, one per line, and answers on stdout.
#[derive(Debug, Parser)]
#[command(name = "tradejournald", version)]
pub struct Args {
    /// Workspace directory to open at startup (holds trades.sqlite3).
    #[arg(long, env = "TRADEJOURNAL_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log level for stderr output; RUST_LOG takes precedence.
    #[arg(long, env = "TRADEJOURNAL_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse a trade text file and write its trades as a JSON array.
    Convert {
        /// Text file with one or more trade blocks.
        path: PathBuf,
        /// Output path; defaults to the input path with a .json extension.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// stdout carries protocol responses, so every log line goes to stderr.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tradejournald={level}")));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
