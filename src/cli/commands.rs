// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `export`
// and all their configurable flags.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_use_case::TrainConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a basecaller on a chunk dataset
    Train(TrainArgs),

    /// Write a trained model as a single JSON document
    Export(ExportArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Output directory for checkpoints, logs and config.json
    pub training_directory: PathBuf,

    /// Model config to train from scratch
    #[arg(long, conflicts_with = "pretrained")]
    pub config: Option<PathBuf>,

    /// Model directory to fine-tune; its config and latest weights are used
    #[arg(long)]
    pub pretrained: Option<PathBuf>,

    /// Chunk dataset directory (chunks.json, references.json, reference_lengths.json)
    #[arg(long, default_value = "data")]
    pub directory: PathBuf,

    #[arg(long, default_value_t = 2e-3)]
    pub lr: f64,

    /// Seed for batch shuffling
    #[arg(long, default_value_t = 25)]
    pub seed: u64,

    #[arg(long, default_value_t = 5)]
    pub epochs: usize,

    #[arg(long, default_value_t = 64)]
    pub batch: usize,

    /// Number of training chunks to load, 0 for all
    #[arg(long, default_value_t = 0)]
    pub chunks: usize,

    /// Disable dynamic loss scaling
    #[arg(long)]
    pub no_amp: bool,

    /// Resume into (or overwrite) an existing training directory
    #[arg(short, long)]
    pub force: bool,
}

/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            training_directory: a.training_directory,
            config:             a.config,
            pretrained:         a.pretrained,
            directory:          a.directory,
            lr:                 a.lr,
            seed:               a.seed,
            epochs:             a.epochs,
            batch:              a.batch,
            chunks:             a.chunks,
            amp:                !a.no_amp,
            force:              a.force,
        }
    }
}

/// All arguments for the `export` command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Training directory holding config.json and checkpoints
    pub model_directory: PathBuf,

    /// Include the latest checkpoint's weights
    #[arg(long)]
    pub weights: bool,

    /// Write to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_defaults() {
        let cli = Cli::try_parse_from(["basecaller", "train", "run1"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.training_directory, PathBuf::from("run1"));
        assert_eq!(cfg.directory, PathBuf::from("data"));
        assert_eq!(cfg.lr, 2e-3);
        assert_eq!(cfg.seed, 25);
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.batch, 64);
        assert!(cfg.amp);
        assert!(!cfg.force);
    }

    #[test]
    fn test_train_flags() {
        let cli = Cli::try_parse_from([
            "basecaller", "train", "run1", "--no-amp", "-f", "--epochs", "2", "--pretrained", "old",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        assert!(!cfg.amp);
        assert!(cfg.force);
        assert_eq!(cfg.epochs, 2);
        assert_eq!(cfg.pretrained, Some(PathBuf::from("old")));
    }

    #[test]
    fn test_config_conflicts_with_pretrained() {
        let res = Cli::try_parse_from([
            "basecaller", "train", "run1", "--config", "c.json", "--pretrained", "old",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn test_export_args() {
        let cli = Cli::try_parse_from(["basecaller", "export", "run1", "--weights"]).unwrap();
        let Commands::Export(args) = cli.command else { panic!("expected export") };
        assert!(args.weights);
        assert!(args.output.is_none());
    }
}
