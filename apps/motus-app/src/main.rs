//! Motus motion controller CLI.
//!
//! Provides two modes of operation:
//! - `run`: Execute a configured motion against an ideal integrator
//! - `info`: Print the problem layout of a configured motion

mod config;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::MotionConfig;
use crate::runner::MotionRunner;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Horizon-QP motion controller.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a motion until it finishes or the tick limit is hit.
    Run {
        /// Motion description (TOML).
        #[arg(short, long)]
        config: PathBuf,

        /// Maximum control cycles.
        #[arg(short, long, default_value_t = 1000)]
        ticks: usize,

        /// Print every tick.
        #[arg(long)]
        trace: bool,
    },

    /// Print the QP layout of a motion.
    Info {
        /// Motion description (TOML).
        #[arg(short, long)]
        config: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn run_motion(config: MotionConfig, ticks: usize, trace: bool) -> Result<(), motus_core::MotusError> {
    let mut runner = MotionRunner::new(config)?;
    let summary = runner.run(ticks, |report| {
        if trace {
            println!("t={:.3} {:?}", report.time, report.positions);
        }
    })?;
    println!(
        "ticks={}, finished={}, relaxed_attempts={}",
        summary.ticks,
        summary.finished,
        runner.controller().statistics().relaxed_attempts
    );
    for (name, position) in &summary.final_positions {
        println!("  {name:<20} {position:.6}");
    }
    Ok(())
}

fn run_info(config: MotionConfig) -> Result<(), motus_core::MotusError> {
    let runner = MotionRunner::new(config)?;
    let controller = runner.controller();
    let dims = controller.dimensions();
    println!("motus v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("order: {}", controller.order());
    println!("{dims:?}");
    println!();
    println!("columns:");
    for label in controller.column_labels() {
        println!("  {label}");
    }
    println!("rows:");
    for label in controller.row_labels() {
        println!("  {label}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Commands::Run {
            config,
            ticks,
            trace,
        } => MotionConfig::from_file(&config)
            .map_err(Into::into)
            .and_then(|c| run_motion(c, ticks, trace)),
        Commands::Info { config } => MotionConfig::from_file(&config)
            .map_err(Into::into)
            .and_then(run_info),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
