//! culprit command-line interface.
//!
//! Minimizes recorded traces down to the inputs that cause a violation.
//!
//! # Quick Start
//!
//! ```bash
//! # Inspect a recorded bundle
//! culprit show trace.json
//!
//! # Minimize it against the loop check
//! culprit minimize trace.json --invariant check_loops
//!
//! # List invariant checks
//! culprit checks
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use culprit_config::DriverKind;

/// culprit - find the minimal causal sequence behind a recorded failure.
#[derive(Parser)]
#[command(name = "culprit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding culprit.toml and culprit.local.toml.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Minimize a trace bundle to its minimal causal sequence.
    Minimize {
        /// Trace bundle (.json, .bin or .trace).
        bundle: PathBuf,

        /// Invariant check to reproduce (defaults to the bundle's).
        #[arg(short, long)]
        invariant: Option<String>,

        /// Minimization driver.
        #[arg(short, long, value_enum)]
        driver: Option<Driver>,

        /// Peek window past each input, in milliseconds.
        #[arg(long)]
        peek_window_ms: Option<u64>,

        /// Where to write the minimized bundle.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Trust that the full trace reproduces the violation.
        #[arg(long)]
        skip_seed_check: bool,
    },

    /// Print a summary of a trace bundle.
    Show {
        /// Trace bundle (.json, .bin or .trace).
        bundle: PathBuf,

        /// List every event.
        #[arg(short, long)]
        events: bool,
    },

    /// List the available invariant checks.
    Checks,

    /// Show the effective configuration.
    Config {
        /// Output format (toml, json).
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Driver {
    Basic,
    Efficient,
}

impl From<Driver> for DriverKind {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::Basic => DriverKind::Basic,
            Driver::Efficient => DriverKind::Efficient,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Minimize {
            bundle,
            invariant,
            driver,
            peek_window_ms,
            output,
            skip_seed_check,
        } => {
            let overrides = commands::minimize::Overrides {
                invariant,
                driver: driver.map(DriverKind::from),
                peek_window_ms,
                output,
                skip_seed_check,
            };
            commands::minimize::run(&cli.project, &bundle, overrides)
        }
        Commands::Show { bundle, events } => commands::show::run(&bundle, events),
        Commands::Checks => {
            commands::checks::run();
            Ok(())
        }
        Commands::Config { format } => commands::config::show(&cli.project, &format),
    }
}
