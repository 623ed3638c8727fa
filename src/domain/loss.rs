// ============================================================
// Layer 3 — LossRecord
// ============================================================
// The four scalar loss terms of a single training step.
//
//   reconstruction — cross-entropy of the decoded tokens
//   vq             — pulls codebook entries toward encoder outputs
//   commitment     — pulls encoder outputs toward codebook entries
//   diversity      — weighted pairwise-similarity penalty
//
// Records are ephemeral; a training cycle reduces its records
// to a single mean record with LossRecord::mean.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub reconstruction: f64,
    pub vq:             f64,
    pub commitment:     f64,
    pub diversity:      f64,
}

impl LossRecord {
    /// Sum of the four terms, i.e. the value that was backpropagated.
    pub fn total(&self) -> f64 {
        self.reconstruction + self.vq + self.commitment + self.diversity
    }

    /// Element-wise mean of a sequence of records.
    /// The mean of nothing is the all-zero record.
    pub fn mean(records: &[LossRecord]) -> LossRecord {
        if records.is_empty() {
            return LossRecord::default();
        }
        let n = records.len() as f64;
        let sum = records.iter().fold(LossRecord::default(), |acc, r| LossRecord {
            reconstruction: acc.reconstruction + r.reconstruction,
            vq:             acc.vq + r.vq,
            commitment:     acc.commitment + r.commitment,
            diversity:      acc.diversity + r.diversity,
        });
        LossRecord {
            reconstruction: sum.reconstruction / n,
            vq:             sum.vq / n,
            commitment:     sum.commitment / n,
            diversity:      sum.diversity / n,
        }
    }

    /// Named scalars in the order the metric sink receives them.
    pub fn scalars(&self, prefix: &str) -> Vec<(String, f64)> {
        vec![
            (format!("{prefix}_loss_recon"),     self.reconstruction),
            (format!("{prefix}_vq_loss"),        self.vq),
            (format!("{prefix}_commit_loss"),    self.commitment),
            (format!("{prefix}_diversity_loss"), self.diversity),
        ]
    }
}
