//! rollcall-core — attendance matching engine.
//!
//! Types for face detections and roster entries, the distance matcher that
//! resolves a probe embedding to a known name, and the recognizer adapter
//! that wraps external detection/embedding models behind a trait.

pub mod matcher;
pub mod recognizer;
pub mod types;

pub use matcher::{best_match, MatchOutcome};
pub use recognizer::{OnnxRecognizer, Recognizer, RecognizerError};
pub use types::{BoundingBox, Detection, Embedding, RosterEntry};
