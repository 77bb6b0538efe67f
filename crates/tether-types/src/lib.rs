//! Shared types and error vocabulary for Tether.

pub mod error;
pub mod extract;
pub mod tool;

pub use error::{ErrorKind, Failure, Outcome};
pub use extract::{ExtractedContent, ExtractionError, ReadOptions};
pub use tool::*;
