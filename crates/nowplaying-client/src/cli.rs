//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nowplaying_core::{LogFormat, TracingConfig};
use tracing::Level;

/// nowplaying - mirror what you are listening to in your chat status
#[derive(Debug, Parser)]
#[command(name = "nowplaying")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "NOWPLAYING_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Log line format: pretty, compact or json
    #[arg(long, value_name = "FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Print the authorization URL instead of opening a browser
    #[arg(long, global = true)]
    pub no_browser: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Logging setup for this invocation.
    ///
    /// `run` logs at info, one-shot commands only warn.
    pub fn tracing_config(&self) -> TracingConfig {
        if self.debug {
            let config = TracingConfig::cli_debug();
            return match self.log_format {
                Some(format) => config.with_format(format),
                None => config,
            };
        }
        if self.log_format == Some(LogFormat::Json) {
            return TracingConfig::daemon();
        }

        let level = match self.command {
            None | Some(Command::Run) => Level::INFO,
            Some(_) => Level::WARN,
        };
        let config = TracingConfig::default().with_level(level);
        match self.log_format {
            Some(format) => config.with_format(format),
            None => config,
        }
    }
}

/// Available commands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Sync the status until interrupted (default)
    Run,

    /// Authorize with the music provider and store the tokens
    Auth {
        /// Authorize again even if tokens are stored
        #[arg(long, short)]
        force: bool,
    },

    /// Forget stored tokens
    Logout,

    /// Clear the chat status once
    Clear,

    /// Show whether tokens are stored and a sync is running
    Status,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("nowplaying").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = parse(&[]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.tracing_config().default_level, Level::INFO);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["auth", "--force", "--no-browser", "-c", "/tmp/np.toml"]);

        assert_eq!(cli.command, Some(Command::Auth { force: true }));
        assert!(cli.no_browser);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/np.toml")));
    }

    #[test]
    fn one_shot_commands_log_warnings_only() {
        let cli = parse(&["status"]);
        assert_eq!(cli.tracing_config().default_level, Level::WARN);
    }

    #[test]
    fn json_selects_daemon_preset() {
        let cli = parse(&["run", "--log-format", "json"]);
        let config = cli.tracing_config();

        assert_eq!(config.format, LogFormat::Json);
        assert!(config.include_span_events);
    }

    #[test]
    fn debug_wins_over_json_level() {
        let cli = parse(&["--debug", "--log-format", "json"]);
        let config = cli.tracing_config();

        assert_eq!(config.default_level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = Cli::try_parse_from(["nowplaying", "--log-format", "xml"]).unwrap_err();
        assert!(err.to_string().contains("unknown log format"));
    }

    #[test]
    fn config_actions() {
        assert_eq!(
            parse(&["config", "validate"]).command,
            Some(Command::Config {
                action: ConfigAction::Validate
            })
        );
    }
}
