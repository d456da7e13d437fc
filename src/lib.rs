//! # uralex
//!
//! Core library for rule-driven morphological analysis of agglutinative
//! languages. A declarative grammar: paradigms, lexemes, derivations,
//! stem conversions, clitics, lexical rules and a blacklist: is compiled
//! into a search structure; tokens are analyzed into sets of wordforms
//! (lemma, grammatical tags, gloss, segmented surface form).
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! parser    → token-level analysis: stem search, inflexion levels, clitics
//!   ↓
//! grammar   → grammar container: loading, derivation expansion, compilation
//!   ↓
//! fst       → non-deterministic morphological transducer (ε + loop states)
//!   ↓
//! morph     → domain objects: inflexions, paradigms, lexemes, wordforms, …
//!   ↓
//! base      → primitives: descriptor tree, error sink, options
//! ```

/// Foundation types: descriptor tree, error reporting, options
pub mod base;

/// Domain objects: inflexions, paradigms, derivations, lexemes, clitics,
/// lexical rules, wordforms
pub mod morph;

/// Non-deterministic morphological transducer for stems and affixes
pub mod fst;

/// Grammar container: loading, derivation expansion, compilation
pub mod grammar;

/// Token-level analyzer
pub mod parser;

// Re-export the types almost every consumer needs
pub use base::{Descriptor, ErrorLog, GrammarError, GrammarOptions};
pub use grammar::{Grammar, GrammarSources};
pub use morph::Wordform;
pub use parser::{Parser, ParsingMethod};
