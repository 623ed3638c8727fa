// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and hands off to
// Layer 2. Nothing here trains or loads anything.
//
//   1. `train`    — run the phased VQ training
//   2. `evaluate` — score a saved checkpoint directory

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "vq-tokenizer-trainer",
    version = "0.1.0",
    about = "Train a vector-quantised byte tokenizer in continuous, codebook-init and discrete phases."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let cfg = args.into_config()?;
    tracing::info!("Starting run '{}' on corpus '{}'", cfg.run_id, cfg.corpus);

    let report = TrainUseCase::new(cfg).execute()?;
    println!("Training complete at step {}.", report.final_step);
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let report = EvaluateUseCase::new(&args.restore_dir, args.corpus, args.num_evals).execute()?;
    println!(
        "Loss: {:.4} | Accuracy: {:.2}% over {} batch(es)",
        report.mean_loss, report.accuracy_percent, report.batches
    );
    Ok(())
}
