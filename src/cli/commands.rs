// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Two subcommands: `train` and `evaluate`.
//
// `train` starts from a preset (or a JSON config file) and
// lets a handful of flags override it; the full set of
// hyperparameters lives in TrainConfig, not on the command line.

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::{fs, path::PathBuf};

use crate::application::train_use_case::TrainConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a tokenizer: continuous → codebook init → discrete
    Train(TrainArgs),

    /// Score a saved continuous or discrete checkpoint directory
    Evaluate(EvaluateArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preset {
    /// Small model, short continuous phase
    Debug,
    /// Full-size model and codebook
    Full,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON file with TrainConfig fields; missing fields come from the preset
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Hyperparameter preset used when no --config is given
    #[arg(long, value_enum, default_value_t = Preset::Debug)]
    pub preset: Preset,

    /// File or directory of files to train on
    #[arg(long)]
    pub corpus: Option<String>,

    /// Resume from a `*_continuous_checkpoints` or `*_discrete_checkpoints` directory
    #[arg(long)]
    pub restore_dir: Option<String>,

    /// Prefix of the checkpoint and metrics directories
    #[arg(long)]
    pub run_id: Option<String>,

    /// Parent directory for all checkpoint directories
    #[arg(long)]
    pub checkpoint_root: Option<String>,

    /// Number of discrete train/eval/checkpoint cycles
    #[arg(long)]
    pub discrete_cycles: Option<usize>,

    /// Keep at most this many artifacts in the discrete directory
    #[arg(long)]
    pub max_checkpoints: Option<usize>,
}

impl TrainArgs {
    /// Preset or config file first, then the explicit flags on top.
    pub fn into_config(self) -> Result<TrainConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("Malformed config file '{}'", path.display()))?
            }
            None => match self.preset {
                Preset::Debug => TrainConfig::debug(),
                Preset::Full  => TrainConfig::full(),
            },
        };

        if let Some(corpus) = self.corpus {
            cfg.corpus = corpus;
        }
        if let Some(dir) = self.restore_dir {
            cfg.restore_dir = Some(dir);
        }
        if let Some(run_id) = self.run_id {
            cfg.run_id = run_id;
        }
        if let Some(root) = self.checkpoint_root {
            cfg.checkpoint_root = root;
        }
        if let Some(cycles) = self.discrete_cycles {
            cfg.discrete_cycles = cycles;
        }
        if self.max_checkpoints.is_some() {
            cfg.max_checkpoints = self.max_checkpoints;
        }
        Ok(cfg)
    }
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Checkpoint directory written by `train`
    #[arg(long)]
    pub restore_dir: String,

    /// Evaluate on a different corpus than the one trained on
    #[arg(long)]
    pub corpus: Option<String>,

    /// Number of evaluation batches
    #[arg(long)]
    pub num_evals: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn train_args(argv: &[&str]) -> TrainArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Train(args) => args,
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_flags_override_preset() {
        let cfg = train_args(&[
            "vq-tokenizer-trainer", "train", "--preset", "full",
            "--corpus", "wiki.txt", "--run-id", "r1", "--discrete-cycles", "3",
        ])
        .into_config()
        .unwrap();

        assert_eq!(cfg.corpus, "wiki.txt");
        assert_eq!(cfg.run_id, "r1");
        assert_eq!(cfg.discrete_cycles, 3);
        assert_eq!(cfg.d_model, TrainConfig::full().d_model);
        assert_eq!(cfg.restore_dir, None);
    }

    #[test]
    fn test_config_file_is_loaded() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{ "eval_every": 7, "max_checkpoints": 5 }"#).unwrap();

        let cfg = train_args(&["vq-tokenizer-trainer", "train", "--config", path.to_str().unwrap()])
            .into_config()
            .unwrap();
        assert_eq!(cfg.eval_every, 7);
        assert_eq!(cfg.max_checkpoints, Some(5));
    }

    #[test]
    fn test_evaluate_requires_restore_dir() {
        assert!(Cli::try_parse_from(["vq-tokenizer-trainer", "evaluate"]).is_err());
    }
}
