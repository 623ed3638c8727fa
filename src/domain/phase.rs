// ============================================================
// Layer 3 — Phases and Roles
// ============================================================
// A run moves through three phases, in order, at most once:
//
//   Continuous ──► CodebookInit ──► Discrete (loops until the
//                                   cycle budget is spent)
//
// Restoring a discrete checkpoint jumps straight to Discrete.
// The phase belongs to the orchestrator, not to the model.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Encoder and decoder train with quantisation disabled
    Continuous,
    /// One-shot clustering of encoder outputs into a codebook
    CodebookInit,
    /// Training through the quantisation boundary
    Discrete,
}

impl Phase {
    /// Directory-name tag used for this phase's checkpoints.
    pub fn dir_tag(&self) -> &'static str {
        match self {
            Phase::Continuous   => "continuous",
            Phase::CodebookInit => "codebook_init",
            Phase::Discrete     => "discrete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_tag())
    }
}

/// What a persisted artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelRole {
    Encoder,
    Decoder,
    /// Adam moments for the joint encoder+decoder parameters
    Optimizer,
}

impl ModelRole {
    pub const ALL: [ModelRole; 3] = [ModelRole::Encoder, ModelRole::Decoder, ModelRole::Optimizer];

    /// Filename stem prefix, e.g. `encoder_model` in `encoder_model_step_500`.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ModelRole::Encoder   => "encoder_model",
            ModelRole::Decoder   => "decoder_model",
            ModelRole::Optimizer => "optimizer_state",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Encoder   => f.write_str("encoder"),
            ModelRole::Decoder   => f.write_str("decoder"),
            ModelRole::Optimizer => f.write_str("optimizer"),
        }
    }
}
