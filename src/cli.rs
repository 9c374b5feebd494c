//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the Magellan executor.

use clap::{Parser, Subcommand};

/// Magellan Executor - Distributed annealing-search executor
///
/// Connects to the Magellan scheduler, receives search task launches,
/// runs simulated annealing per task, and reports status updates back.
#[derive(Parser, Debug)]
#[command(name = "magellan-executor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the executor
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the executor (connects to the scheduler and processes tasks)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "MAGELLAN_CONFIG")]
        config: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Show the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Create a default configuration file
    Init {
        /// Path for the new configuration file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_config() {
        let cli = Cli::try_parse_from(["magellan-executor", "run", "--config", "/tmp/c.toml"])
            .unwrap();
        match cli.command {
            Commands::Run { config } => assert_eq!(config.as_deref(), Some("/tmp/c.toml")),
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_verbosity_flags() {
        let cli = Cli::try_parse_from(["magellan-executor", "-vv", "version"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_parse_config_init() {
        let cli = Cli::try_parse_from([
            "magellan-executor", "config", "init", "--path", "/tmp/x.toml", "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert_eq!(path.as_deref(), Some("/tmp/x.toml"));
                assert!(force);
            }
            _ => panic!("expected config init"),
        }
    }
}
