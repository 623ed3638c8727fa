// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training core talks to two external collaborators
// through traits so that tests can swap in synthetic ones:
//
//   BatchStream — a re-iterable source of TokenBatches
//                 (SequenceDataset in production)
//   MetricSink  — accepts named scalars per step
//                 (CsvMetricSink in production, optional)

use anyhow::Result;
use crate::domain::batch::TokenBatch;

// ─── BatchStream ──────────────────────────────────────────────────────────────
/// A source of fixed-shape token batches.
///
/// Every call to `batches` starts a fresh pass over the data,
/// the same way a data loader is re-iterated each epoch.
pub trait BatchStream {
    fn batches(&self) -> Box<dyn Iterator<Item = TokenBatch> + '_>;
}

// ─── MetricSink ───────────────────────────────────────────────────────────────
/// Any component that records named scalars.
///
/// A failing sink never stops training; the orchestrator logs
/// the error and carries on.
pub trait MetricSink {
    fn record(&mut self, step: usize, scalars: &[(String, f64)]) -> Result<()>;
}
