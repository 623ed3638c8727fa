// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores encoder, decoder and optimizer state with
// Burn's NamedMpkFileRecorder at full precision, so a restored
// model has bit-identical parameters.
//
// Every artifact is identified by a CheckpointId (role, step).
// The id renders the file name and parses it back; nothing
// else in the crate reads or builds checkpoint file names.
//
// File layout of one checkpoint directory:
//   run_continuous_checkpoints/
//     encoder_model_step_500.mpk
//     decoder_model_step_500.mpk
//     optimizer_state_step_500.mpk
//     train_config.json        ← architecture for `evaluate`
//
// A directory without artifacts for a role is a cold start:
// `load` hands back the untouched module and step 0.

use anyhow::{Context, Result};
use burn::{
    module::Module,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::domain::{error::TrainError, phase::{ModelRole, Phase}};
use crate::ml::model::{Decoder, Encoder};

type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

const CONFIG_FILE: &str = "train_config.json";

// ─── CheckpointId ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointId {
    pub role: ModelRole,
    pub step: usize,
}

impl CheckpointId {
    pub fn new(role: ModelRole, step: usize) -> Self {
        Self { role, step }
    }

    /// File name without the recorder's extension.
    pub fn file_stem(&self) -> String {
        format!("{}_step_{}", self.role.file_prefix(), self.step)
    }

    /// Recover the id from a file name such as `decoder_model_step_42.mpk`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.split('.').next()?;
        ModelRole::ALL.iter().find_map(|&role| {
            let step = stem
                .strip_prefix(role.file_prefix())?
                .strip_prefix("_step_")?
                .parse()
                .ok()?;
            Some(Self { role, step })
        })
    }
}

// ─── CheckpointManager ────────────────────────────────────────────────────────

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Open a checkpoint directory, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(id.file_stem())
    }

    /// Write the encoder and decoder snapshots for `step`.
    pub fn save<B: Backend>(&self, encoder: &Encoder<B>, decoder: &Decoder<B>, step: usize) -> Result<()> {
        self.save_module(ModelRole::Encoder, encoder, step)?;
        self.save_module(ModelRole::Decoder, decoder, step)?;
        tracing::info!("Saved models at step {} to {}", step, self.dir.display());
        Ok(())
    }

    pub fn save_module<B: Backend, M: Module<B>>(&self, role: ModelRole, module: &M, step: usize) -> Result<()> {
        let path = self.path_for(CheckpointId::new(role, step));
        module
            .clone()
            .save_file(path.clone(), &CheckpointRecorder::new())
            .with_context(|| format!("Failed to save {role} checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved {} checkpoint: step {}", role, step);
        Ok(())
    }

    /// Load the highest-step artifact for `role` into `module`.
    ///
    /// Returns `(module, 0)` untouched when the directory holds no
    /// artifact for the role.
    pub fn load<B: Backend, M: Module<B>>(
        &self,
        role:   ModelRole,
        module: M,
        device: &B::Device,
    ) -> Result<(M, usize)> {
        let Some(id) = self.latest(role)? else {
            tracing::info!(
                "No checkpoints found for {} in {}. Starting from scratch.",
                role,
                self.dir.display()
            );
            return Ok((module, 0));
        };

        let path   = self.path_for(id);
        let module = module
            .load_file(path.clone(), &CheckpointRecorder::new(), device)
            .with_context(|| format!("Cannot load {role} checkpoint '{}'", path.display()))?;
        tracing::info!("Restored {} from {} (step {})", role, path.display(), id.step);
        Ok((module, id.step))
    }

    /// Persist the optimizer's moment estimates for `step`.
    pub fn save_optimizer<B, M, O>(&self, optimizer: &O, step: usize) -> Result<()>
    where
        B: AutodiffBackend,
        M: burn::module::AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let path = self.path_for(CheckpointId::new(ModelRole::Optimizer, step));
        let recorder = CheckpointRecorder::new();
        <CheckpointRecorder as Recorder<B>>::record(&recorder, optimizer.to_record(), path.clone())
            .with_context(|| format!("Failed to save optimizer state to '{}'", path.display()))?;
        tracing::debug!("Saved optimizer state: step {}", step);
        Ok(())
    }

    /// Restore optimizer state saved at exactly `step`.
    /// Returns the optimizer unchanged and `false` when there is none.
    pub fn load_optimizer<B, M, O>(&self, optimizer: O, step: usize, device: &B::Device) -> Result<(O, bool)>
    where
        B: AutodiffBackend,
        M: burn::module::AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let id = CheckpointId::new(ModelRole::Optimizer, step);
        if !self.artifacts()?.iter().any(|(found, _)| *found == id) {
            return Ok((optimizer, false));
        }

        let path = self.path_for(id);
        let recorder = CheckpointRecorder::new();
        let record: O::Record = <CheckpointRecorder as Recorder<B>>::load(&recorder, path.clone(), device)
            .with_context(|| format!("Cannot load optimizer state '{}'", path.display()))?;
        tracing::info!("Restored optimizer state from {}", path.display());
        Ok((optimizer.load_record(record), true))
    }

    /// Every recognised artifact in the directory with its path.
    pub fn artifacts(&self) -> Result<Vec<(CheckpointId, PathBuf)>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot read checkpoint directory '{}'", self.dir.display()))?;

        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(CheckpointId::parse);
            if let Some(id) = id {
                found.push((id, path));
            }
        }
        Ok(found)
    }

    /// Highest-step artifact for `role`, if any.
    pub fn latest(&self, role: ModelRole) -> Result<Option<CheckpointId>> {
        Ok(self
            .artifacts()?
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| id.role == role)
            .max_by_key(|id| id.step))
    }

    /// Delete the oldest artifacts until at most `max_checkpoints` remain.
    ///
    /// Age is creation time (modification time where the filesystem
    /// does not record creation), ties broken by step. Files that
    /// cannot be removed are logged and skipped. Returns how many
    /// artifacts were deleted.
    pub fn prune(&self, max_checkpoints: usize) -> Result<usize> {
        let mut artifacts: Vec<(SystemTime, CheckpointId, PathBuf)> = self
            .artifacts()?
            .into_iter()
            .map(|(id, path)| {
                let created = fs::metadata(&path)
                    .and_then(|m| m.created().or_else(|_| m.modified()))
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (created, id, path)
            })
            .collect();

        if artifacts.len() <= max_checkpoints {
            return Ok(0);
        }

        artifacts.sort_by_key(|(created, id, _)| (*created, id.step));
        let excess  = artifacts.len() - max_checkpoints;
        let mut removed = 0;
        for (_, _, path) in artifacts.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    tracing::info!("Removed old checkpoint: {}", path.display());
                }
                Err(e) => tracing::warn!("Could not remove '{}': {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Save the training configuration next to the checkpoints.
    pub fn save_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Was this directory written by 'train'?",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }
}

// ─── PhaseCheckpoints ─────────────────────────────────────────────────────────

/// The two checkpoint directories of one run:
/// `{root}/{run_id}_continuous_checkpoints` and `{root}/{run_id}_discrete_checkpoints`.
pub struct PhaseCheckpoints {
    pub continuous: CheckpointManager,
    pub discrete:   CheckpointManager,
}

impl PhaseCheckpoints {
    pub fn open(root: impl AsRef<Path>, run_id: &str) -> Result<Self> {
        let root = root.as_ref();
        Ok(Self {
            continuous: CheckpointManager::new(phase_dir(root, run_id, Phase::Continuous))?,
            discrete:   CheckpointManager::new(phase_dir(root, run_id, Phase::Discrete))?,
        })
    }

    /// CodebookInit has no directory of its own; its state is still continuous.
    pub fn for_phase(&self, phase: Phase) -> &CheckpointManager {
        match phase {
            Phase::Discrete => &self.discrete,
            Phase::Continuous | Phase::CodebookInit => &self.continuous,
        }
    }
}

pub fn phase_dir(root: &Path, run_id: &str, phase: Phase) -> PathBuf {
    root.join(format!("{}_{}_checkpoints", run_id, phase.dir_tag()))
}

/// Which phase a restore directory holds, judged by its name.
pub fn restore_phase(dir: &Path) -> Result<Phase, TrainError> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if name.contains(Phase::Discrete.dir_tag()) {
        Ok(Phase::Discrete)
    } else if name.contains(Phase::Continuous.dir_tag()) {
        Ok(Phase::Continuous)
    } else {
        Err(TrainError::UnrecognizedRestoreDir(dir.display().to_string()))
    }
}
