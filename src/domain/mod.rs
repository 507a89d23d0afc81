//! Core data structures shared across the pipeline.

pub mod message;
pub mod task;

pub use message::{AudioKind, Transcript, VoiceMessage};
pub use task::{ExtractedTask, Priority, TaskCandidate};
