//! Channel layer: output buffering, pattern helpers and mode resolution.
//!
//! Raw device bytes are cleaned of terminal control sequences as they
//! arrive, and only the tail of the buffer is searched for prompts.

mod buffer;
mod patterns;
mod resolver;

pub use buffer::PatternBuffer;
pub use patterns::{compile_pattern, pin_prompt, strip_echo, strip_prompted_echo};
pub use resolver::{error_message, Candidate, Expectation, Landing, ModeResolver, Resolved};
