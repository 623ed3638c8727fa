// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Filesystem concerns shared by training and evaluation:
//
//   checkpoint.rs — Checkpoint Manager
//                   Encoder / decoder / optimizer snapshots
//                   keyed by (role, step), cold-start loads,
//                   pruning, and the run's TrainConfig as JSON
//                   so `evaluate` can rebuild the model.
//
//   metrics.rs    — CSV metric sink
//                   Long-format `step,key,value` rows for
//                   every scalar the trainer emits.

/// Checkpoint save / restore / prune
pub mod checkpoint;

/// CSV implementation of MetricSink
pub mod metrics;
