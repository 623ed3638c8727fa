// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Coordinates the other layers to accomplish one job
// (training a tokenizer or scoring a saved one).
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No argument parsing or printing (that's Layer 1)
//   - Only workflow coordination and configuration

// The phased training workflow and its configuration
pub mod train_use_case;

// Scoring a saved checkpoint directory
pub mod evaluate_use_case;
