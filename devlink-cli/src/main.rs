//! devlink CLI - browse and transfer files on devices over a framed serial link.
//!
//! ## Features
//!
//! - Firmware version query
//! - Directory listing, file info, delete, mkdir and rename
//! - File download (`pull`) and chunked upload (`push`) with progress
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

mod commands;
mod config;
mod serial;

use commands::{completions, device, ports};
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors with a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup the user must fix (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// Cancelled by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// devlink - talk to embedded devices over a framed serial protocol.
///
/// Environment variables:
///   DEVLINK_PORT              - Default serial port
///   DEVLINK_BAUD              - Default baud rate (default: 115200)
///   DEVLINK_TIMEOUT           - Response timeout in seconds (default: 30)
///   DEVLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "devlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    devlink ls /\n  \
    devlink -p /dev/ttyACM0 pull /logs/boot.txt\n  \
    devlink push build/app.bin /apps/")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "DEVLINK_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "DEVLINK_BAUD")]
    baud: Option<u32>,

    /// Seconds to wait for each response [default: 30].
    #[arg(long, global = true, value_name = "SECS", env = "DEVLINK_TIMEOUT")]
    timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "DEVLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the device firmware version.
    Version {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List a directory on the device.
    Ls {
        /// Directory to list.
        #[arg(default_value = "/")]
        path: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show information about a file or directory.
    Stat {
        /// Path on the device.
        path: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Copy a file from the device.
    Pull {
        /// Path on the device.
        remote: String,

        /// Local destination (file or directory; defaults to the remote file name).
        local: Option<PathBuf>,
    },

    /// Copy a file to the device.
    Push {
        /// Local file to send.
        local: PathBuf,

        /// Destination on the device (a trailing `/` keeps the local file name).
        remote: String,
    },

    /// Delete a file on the device.
    Rm {
        /// Path on the device.
        path: String,
    },

    /// Create a directory on the device.
    Mkdir {
        /// Path on the device.
        path: String,
    },

    /// Rename or move a file on the device.
    Mv {
        /// Current path.
        from: String,

        /// New path.
        to: String,
    },

    /// Restart the device.
    Reboot,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    fn wants_json(&self) -> bool {
        match self {
            Self::ListPorts { json }
            | Self::Version { json }
            | Self::Ls { json, .. }
            | Self::Stat { json, .. } => *json,
            _ => false,
        }
    }
}

/// Default log filter for the given flags.
///
/// JSON output keeps stderr to warnings so scripts see clean streams.
fn default_log_level(cli: &Cli) -> &'static str {
    if cli.quiet {
        return "warn";
    }
    match cli.verbose {
        0 if cli
            .command
            .wants_json() =>
        {
            "warn"
        },
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Map an error to the process exit code.
fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Config(_) => 3,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<devlink::Error>() {
            return match lib_err {
                devlink::Error::Interrupted => 130,
                devlink::Error::Config(_) => 3,
                devlink::Error::NotConnected
                | devlink::Error::Disconnected
                | devlink::Error::Serial(_) => 4,
                _ => 1,
            };
        }
    }
    1
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for_error(&err)
        },
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(default_log_level(&cli)))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "devlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // First Ctrl-C asks the current operation to stop; a second one exits.
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    devlink::set_interrupt_checker(was_interrupted);

    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => ports::cmd_list_ports(*json),
        Commands::Version { json } => device::cmd_version(&cli, &mut config, *json),
        Commands::Ls { path, json } => device::cmd_ls(&cli, &mut config, path, *json),
        Commands::Stat { path, json } => device::cmd_stat(&cli, &mut config, path, *json),
        Commands::Pull { remote, local } => {
            device::cmd_pull(&cli, &mut config, remote, local.as_deref())
        },
        Commands::Push { local, remote } => device::cmd_push(&cli, &mut config, local, remote),
        Commands::Rm { path } => device::cmd_rm(&cli, &mut config, path),
        Commands::Mkdir { path } => device::cmd_mkdir(&cli, &mut config, path),
        Commands::Mv { from, to } => device::cmd_mv(&cli, &mut config, from, to),
        Commands::Reboot => device::cmd_reboot(&cli, &mut config),
        Commands::Completions { shell } => {
            completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
