//! On-disk artifact: a commented header followed by up to four sections.
//!
//! ```text
//! # warmstart-artifact v1
//! # generated at: 2025-01-31 12:00:00
//! # do not edit manually
//! [allocate]
//! alloc $0 new app.Config
//! [fields]
//! set $0 app.Config::name = 'demo'
//! [globals]
//! global 'config' = $0
//! ```
pub mod parse;
pub mod write;

/// First line of every artifact.
pub const FORMAT_MARKER: &str = "# warmstart-artifact v1";

pub use parse::{parse, read, verify};
pub use write::ArtifactWriter;
