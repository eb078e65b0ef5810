//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// vigilant - watch upstream files and open notification pull requests
#[derive(Debug, Parser)]
#[command(
    name = "vg",
    about = "Watches files in source repositories and opens notification pull requests in target repositories",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help()
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the watcher in the foreground until interrupted
    Run,

    /// Run a single cycle over every pair and exit
    Once,

    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Internal: Run as daemon process (used by `daemon start`)
    #[command(hide = true)]
    RunDaemon,

    /// Validate and print the resolved configuration
    Config {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List stored watermarks
    Watermarks {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show recent cycle reports
    History {
        /// Number of cycles to show
        #[arg(short = 'n', long, default_value = "10")]
        lines: usize,
    },

    /// Show daemon logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon, letting a running cycle finish
    Stop {
        /// SIGKILL the daemon if it has not exited 30 s after SIGTERM
        #[arg(long)]
        force: bool,
    },

    /// Check daemon status
    Status {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Ask the running daemon for an immediate cycle
    Trigger,
}

/// Output format for status/listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigilant")
        .join("logs")
        .join("vigilant.log");
    debug!(?path, "get_log_path: returning path");
    path
}

fn after_help() -> String {
    format!("Daemon logs are written to: {}", get_log_path().display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_once() {
        let cli = Cli::parse_from(["vg", "once"]);
        assert!(matches!(cli.command, Command::Once));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["vg"]).is_err());
    }

    #[test]
    fn test_cli_parse_daemon_start_foreground() {
        let cli = Cli::parse_from(["vg", "daemon", "start", "--foreground"]);
        assert!(matches!(
            cli.command,
            Command::Daemon {
                command: DaemonCommand::Start { foreground: true }
            }
        ));
    }

    #[test]
    fn test_cli_parse_daemon_stop() {
        let cli = Cli::parse_from(["vg", "daemon", "stop"]);
        assert!(matches!(
            cli.command,
            Command::Daemon {
                command: DaemonCommand::Stop { force: false }
            }
        ));

        let cli = Cli::parse_from(["vg", "daemon", "stop", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Daemon {
                command: DaemonCommand::Stop { force: true }
            }
        ));
    }

    #[test]
    fn test_cli_parse_daemon_trigger() {
        let cli = Cli::parse_from(["vg", "daemon", "trigger"]);
        assert!(matches!(
            cli.command,
            Command::Daemon {
                command: DaemonCommand::Trigger
            }
        ));
    }

    #[test]
    fn test_cli_parse_daemon_status_json() {
        let cli = Cli::parse_from(["vg", "daemon", "status", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::Daemon {
                command: DaemonCommand::Status {
                    format: OutputFormat::Json
                }
            }
        ));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["vg", "config", "--config", "/tmp/vg.yml", "-l", "debug"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/vg.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Command::Config {
                format: OutputFormat::Text
            }
        ));
    }

    #[test]
    fn test_cli_parse_logs() {
        let cli = Cli::parse_from(["vg", "logs", "--follow", "-n", "100"]);
        assert!(matches!(
            cli.command,
            Command::Logs {
                follow: true,
                lines: 100
            }
        ));
    }

    #[test]
    fn test_cli_parse_history_default() {
        let cli = Cli::parse_from(["vg", "history"]);
        assert!(matches!(cli.command, Command::History { lines: 10 }));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("vigilant/logs/vigilant.log"));
    }
}
