//! Foundation types for the uralex engine.
//!
//! This module provides the types everything else is built on:
//! - [`Descriptor`] - the in-memory record tree produced by grammar loaders
//! - [`GrammarError`], [`ErrorLog`] - non-fatal error reporting
//! - [`GrammarOptions`] - the numeric knobs governing compilation and parsing
//!
//! This module has NO dependencies on other uralex modules.

mod descriptor;
mod error;
mod options;

pub use descriptor::Descriptor;
pub use error::{ErrorEntry, ErrorLog, GrammarError};
pub use options::GrammarOptions;
