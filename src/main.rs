//! ferrite-steer CLI
//!
//! Usage:
//!   ferrite-steer move --src-root raw --folder run3 --dest-root clean --steps steps.json
//!   ferrite-steer augment --root clean --folder run3 --steps flip.json --limit 500
//!   ferrite-steer train --session session.json
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=ferrite_steer=debug`) to change verbosity.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ferrite_steer::{move_dataset, run_session, MaterializeMode, Pipeline, SessionConfig};

#[derive(Parser)]
#[command(
    name = "ferrite-steer",
    about = "Transform steering-angle datasets and train a regressor on them",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform a dataset folder into a new numbered folder under another root
    Move {
        /// Root containing the source folder
        #[arg(long)]
        src_root: PathBuf,

        /// Name of the dataset folder to read
        #[arg(long)]
        folder: String,

        /// Root the new folder is created under
        #[arg(long)]
        dest_root: PathBuf,

        /// JSON array of steps, e.g. [{"F": "flipNonZero", "args": []}]
        #[arg(long)]
        steps: Option<PathBuf>,

        /// Process at most this many index rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Append transformed copies of a dataset folder's samples to itself
    Augment {
        /// Root containing the folder
        #[arg(long)]
        root: PathBuf,

        /// Name of the dataset folder to augment in place
        #[arg(long)]
        folder: String,

        /// JSON array of steps
        #[arg(long)]
        steps: Option<PathBuf>,

        /// Process at most this many index rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Train the steering regressor described by a session file
    Train {
        /// Session JSON file
        #[arg(long)]
        session: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Move { src_root, folder, dest_root, steps, limit } => {
            materialize(&src_root, &folder, &dest_root, steps.as_deref(), limit, MaterializeMode::Move)
        }
        Commands::Augment { root, folder, steps, limit } => {
            materialize(&root, &folder, &root, steps.as_deref(), limit, MaterializeMode::Augment)
        }
        Commands::Train { session } => train(&session),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = ?e.kind(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn materialize(
    src_root: &Path,
    folder: &str,
    dest_root: &Path,
    steps: Option<&Path>,
    limit: Option<usize>,
    mode: MaterializeMode,
) -> ferrite_steer::Result<()> {
    let pipeline = match steps {
        Some(path) => Pipeline::load_json(path)?,
        None => Pipeline::default(),
    };
    let summary = move_dataset(src_root, folder, dest_root, &pipeline, limit, mode)?;
    info!(
        destination = %summary.destination.display(),
        rows_read = summary.rows_read,
        accepted = summary.accepted,
        rejected = summary.rejected,
        index_rows = summary.index_rows,
        "dataset written"
    );
    Ok(())
}

fn train(session_path: &Path) -> ferrite_steer::Result<()> {
    let session = SessionConfig::load_json(session_path)?;
    let report = run_session(&session)?;
    info!(
        run_id = %report.run_id,
        best_train_loss = report.best_train_loss,
        best_valid_loss = report.best_valid_loss,
        "run complete"
    );
    Ok(())
}
