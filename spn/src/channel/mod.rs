//! Channel layer: control-sequence filtering, transcript buffering and
//! prompt heuristics.
//!
//! Everything in here is pure text processing; the transport layer feeds it
//! raw bytes and the driver layer consumes the results.

pub mod buffer;
pub mod filter;
pub mod prompt;

pub use buffer::{PromptBoundary, PromptCounter, TranscriptBuffer};
pub use filter::{StreamFilter, filter_text, strip_control_sequences};
pub use prompt::{ExtractedPrompt, Strategy, extract_prompt};
