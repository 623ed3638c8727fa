// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe the training run itself:
// what a batch is, what a step's losses are, which phase the
// run is in and what can go wrong.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Everything tensor-shaped lives in Layer 5 (ml). The types
// here cross layer boundaries: the data layer produces
// TokenBatches, the ml layer produces LossRecords, the infra
// layer stores checkpoints keyed by ModelRole.

/// Fixed-shape integer token batches
pub mod batch;

/// The four named loss terms of one step
pub mod loss;

/// Training phases and model roles
pub mod phase;

/// Typed failures (configuration, consistency, degenerate input)
pub mod error;

/// Abstractions over batch sources and metric sinks
pub mod traits;
