//! Taskloom Decompose - hierarchical node construction
//!
//! Turns code steps into graph nodes. Steps whose label signals heavy or
//! untrusted work are wrapped in a collapsed group parent owning a container
//! child with a computed resource envelope.

#![warn(missing_docs)]

mod decomposer;
mod dependencies;

pub use decomposer::{DecomposeError, Decomposer, DecomposerConfig, StepSpec};
pub use dependencies::detect_dependencies;
