//! Window extraction and parsing
//!
//! Turns a padded batch into overlapping `1 + h` windows for a train,
//! validation or predict step, and splits those windows into the named
//! tensors a sequence model consumes.

mod extractor;
mod parser;

pub use extractor::{create_windows, StepKind, WindowConfig, WindowsBatch};
pub use parser::{ParsedWindows, WindowParser};
