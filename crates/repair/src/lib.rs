//! Taskloom Repair - model-assisted fixes for failed code payloads
//!
//! A failure is first analyzed into a category with position and hints.
//! The repair loop then asks a [`ModelPort`] for corrected code, extracts the
//! fenced block from the reply, and optionally accepts it only when it passes
//! the syntax check and the safety validation.

#![warn(missing_docs)]

mod analysis;
mod model;
mod service;

pub use analysis::{analyze, ErrorAnalysis, ErrorCategory};
pub use model::{GenerationConstraints, GenerationError, ModelPort};
pub use service::{extract_code, RepairConfig, RepairResult, RepairService};
