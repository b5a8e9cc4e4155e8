//! Lantern CLI - drives the governed tool from a terminal.
//!
//! Every subcommand prints pretty JSON on stdout. Logs go to stderr so the
//! output stays machine-readable.
//!
//! Exit status: `0` success, `1` the tool reported findings (check,
//! preflight, unhealthy doctor), `2` any error.

mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Lantern - governance client for the workspace tool
#[derive(Parser, Debug)]
#[command(name = "lantern")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Config file (default: $LANTERN_CONFIG or ~/.lantern/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Governed tool executable, overriding the config file
    #[arg(long, global = true)]
    pub executable: Option<PathBuf>,

    /// Workspace directory the tool runs in (default: current directory)
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Check a file, or editor content read from stdin
    Check {
        /// File to check
        #[arg(required_unless_present = "stdin", conflicts_with = "stdin")]
        path: Option<PathBuf>,

        /// Read the content to check from stdin
        #[arg(long, requires = "filepath")]
        stdin: bool,

        /// Path the stdin content belongs to
        #[arg(long)]
        filepath: Option<PathBuf>,
    },

    /// Print aggregated governance state
    State,

    /// Probe which optional subcommands the tool supports
    Caps,

    /// Run the tool's self-check
    Doctor,

    /// Ask whether a change touching these paths would be allowed
    Preflight {
        paths: Vec<PathBuf>,
    },

    /// Show, set, or clear the declared intent
    Intent {
        #[command(subcommand)]
        action: Option<IntentAction>,
    },

    /// Poll the correlator and print alert transitions until Ctrl-C
    Watch,
}

#[derive(Subcommand, Debug)]
pub(crate) enum IntentAction {
    Show,
    Set { text: String },
    Clear,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run::run(cli).await {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("error: {err:#}");
            run::Status::Error.into()
        }
    }
}
