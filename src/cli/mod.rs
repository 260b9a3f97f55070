// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with `clap` and hands off to Layer 2.
//
// Two commands are supported:
//   1. `train`  — trains a basecaller on a chunk dataset
//   2. `export` — writes a trained model as one JSON document
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ExportArgs, TrainArgs};

use crate::ml::trainer::FitOutcome;

#[derive(Parser, Debug)]
#[command(
    name = "basecaller",
    version = "0.1.0",
    about = "Train nanopore basecalling models and export them as JSON documents."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Routes to the use case; never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)  => run_train(args),
            Commands::Export(args) => run_export(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Training from chunks in: {}", args.directory.display());

    match TrainUseCase::new(args.into()).execute()? {
        FitOutcome::Completed { last_epoch } => {
            println!("Training complete at epoch {last_epoch}.");
        }
        FitOutcome::Interrupted { last_epoch } => {
            println!("Training interrupted; latest checkpoint is epoch {last_epoch}.");
        }
    }
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    use crate::application::export_use_case::ExportUseCase;

    ExportUseCase::new(args.model_directory, args.weights, args.output).execute()
}
