//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the Atom worker.

use clap::{Parser, Subcommand};

/// Atom Worker - remote job worker for the Atom Network
///
/// Logs in once, keeps a persistent connection to the coordinator,
/// runs the service requests it receives and reports the results.
#[derive(Parser, Debug)]
#[command(name = "atom-worker")]
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

/// Available commands for the worker
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and store the session token
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "ATOM_PASSWORD", hide_env_values = true)]
        password: String,

        /// Path to configuration file
        #[arg(short, long, env = "ATOM_CONFIG")]
        config: Option<String>,
    },

    /// Run the worker (connects to the coordinator and processes jobs)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "ATOM_CONFIG")]
        config: Option<String>,
    },

    /// Stored session management
    Session {
        #[command(subcommand)]
        subcommand: SessionSubcommand,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Session subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionSubcommand {
    /// List stored sessions, most recent first
    List {
        /// Path to configuration file
        #[arg(short, long, env = "ATOM_CONFIG")]
        config: Option<String>,
    },

    /// Remove the stored session for an account
    Logout {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Path to configuration file
        #[arg(short, long, env = "ATOM_CONFIG")]
        config: Option<String>,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
