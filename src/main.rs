//! Atom Worker - remote job worker
//!
//! This is the main entry point for the `atom-worker` binary.
//! The worker logs in, connects to the coordinator with the stored session,
//! executes the service requests it receives and reports the results.

mod cli;

use clap::Parser;
use tracing::{info, warn, Level};

use atom_worker::auth::{authenticate, Credentials, HttpAuthService};
use atom_worker::config::{self, WorkerConfig};
use atom_worker::error::{Error, Result};
use atom_worker::session::SessionStore;
use atom_worker::{logging, version, Worker};

use crate::cli::{Cli, Commands, ConfigSubcommand, SessionSubcommand};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let level = simple_level(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            logging::init_simple(Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Session { subcommand } => {
            logging::init_simple(level)?;
            handle_session_command(subcommand)
        }
        Commands::Login {
            email,
            password,
            config,
        } => {
            let config = WorkerConfig::load(config.as_deref())?;
            logging::init_simple(level)?;
            login(&config, Credentials::new(email, password))
        }
        Commands::Run { config } => {
            let config = WorkerConfig::load(config.as_deref())?;

            // The guards must be kept alive for the lifetime of the program
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

            let build = version::build_info();
            info!(
                version = %build.full_version(),
                target = %build.target,
                profile = %build.profile,
                "Starting Atom Worker"
            );

            run_worker(config)
        }
    }
}

fn simple_level(verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

fn current_thread_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))
}

/// Log in against the auth service and persist the session
fn login(config: &WorkerConfig, credentials: Credentials) -> Result<()> {
    let service = HttpAuthService::new(&config.auth)?;
    let store = SessionStore::open(config.session_store_path());

    let session = current_thread_runtime()?.block_on(authenticate(&service, &store, &credentials))?;

    println!("Logged in as {}", session.identity);
    Ok(())
}

/// Run the worker in normal operation mode
fn run_worker(config: WorkerConfig) -> Result<()> {
    let worker = match Worker::from_config(config) {
        Ok(worker) => worker,
        Err(Error::NoSession) => {
            warn!("No login found, not connecting");
            println!("No login found. Please login using 'atom-worker login --email <EMAIL>'.");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().clamp(1, 4))
        .thread_name("atom-worker")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(worker.run())
}

/// Handle session subcommands
fn handle_session_command(subcommand: SessionSubcommand) -> Result<()> {
    match subcommand {
        SessionSubcommand::List { config } => {
            let cfg = WorkerConfig::load(config.as_deref())?;
            let sessions = SessionStore::open(cfg.session_store_path()).list()?;

            if sessions.is_empty() {
                println!("No stored sessions.");
            }
            for session in sessions {
                println!("{}\t{}", session.identity, session.issued_at.to_rfc3339());
            }
        }
        SessionSubcommand::Logout { email, config } => {
            let cfg = WorkerConfig::load(config.as_deref())?;
            if SessionStore::open(cfg.session_store_path()).remove(&email)? {
                println!("Logged out {}", email);
            } else {
                println!("No session stored for {}", email);
            }
        }
    }

    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = WorkerConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let path = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", path.display());
        }
        ConfigSubcommand::Validate { config } => {
            WorkerConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
