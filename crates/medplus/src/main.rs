//! MedPlus session harness
//!
//! Runs the role synchronizer and route guard against the local state under
//! `$MEDPLUS_HOME` (default `~/.medplus`). Every invocation restores the
//! stored session, applies one command, and prints where the guard left the
//! app.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medplus_logging::LogConfig;
use medplus_session::{Role, SessionConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "medplus", about = "MedPlus session and role harness")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Root of local state (store, profiles.json, logs)
    #[arg(long, global = true, env = medplus_session::config::HOME_ENV)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in as a user and sync their role
    Login {
        /// User id; a new one is generated when omitted
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// Sign out and clear the persisted role
    Logout,

    /// Refresh the session token (same user, new session id)
    Refresh,

    /// Show session, role and route state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Switch presentation mode (doctor accounts only)
    #[command(name = "switch-role")]
    SwitchRole {
        /// patient or doctor; toggles when omitted
        role: Option<Role>,
    },

    /// Visit a route and let the guard decide
    Navigate {
        /// Route path, e.g. /doctor/availability
        path: String,
    },

    /// Manage the local profiles table
    Profile {
        #[command(subcommand)]
        action: cli::profile::ProfileAction,
    },
}

impl Commands {
    fn wants_json(&self) -> bool {
        matches!(self, Commands::Status { json: true })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = SessionConfig::from_env();
    if let Some(home) = cli.home.clone() {
        config.home = home;
    }

    let _log_guard = match medplus_logging::init_logging(LogConfig {
        app_name: "medplus",
        verbose: cli.verbose,
        log_dir: config.logs_dir(),
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    let json = cli.command.wants_json();
    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json {
                let payload = serde_json::json!({ "error": format!("{:#}", err) });
                println!("{}", payload);
            } else {
                eprintln!("Error: {:#}", err);
            }
            ExitCode::from(1)
        }
    }
}

fn run_command(command: Commands, config: SessionConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        match command {
            Commands::Login { user, email } => {
                let report = cli::session::login(&config, user.as_deref(), email).await?;
                cli::output::print_report(&report, false)
            }
            Commands::Logout => {
                let report = cli::session::logout(&config).await?;
                cli::output::print_report(&report, false)
            }
            Commands::Refresh => {
                let report = cli::session::refresh(&config).await?;
                cli::output::print_report(&report, false)
            }
            Commands::Status { json } => {
                let report = cli::session::status(&config).await?;
                cli::output::print_report(&report, json)
            }
            Commands::SwitchRole { role } => {
                let report = cli::session::switch_role(&config, role).await?;
                cli::output::print_report(&report, false)
            }
            Commands::Navigate { path } => {
                let report = cli::session::navigate(&config, &path).await?;
                cli::output::print_report(&report, false)
            }
            Commands::Profile { action } => cli::profile::run(&config, action).await,
        }
    })
}
