//! Domain objects of the morphological engine.
//!
//! Leaves first: regex tests and reduplications, stem conversions, then
//! inflexions and paradigms (with the paradigm compiler), derivations,
//! lexemes, clitics, lexical rules, and finally the wordform: the
//! analysis record everything produces.

mod clitic;
mod derivation;
mod inflexion;
mod lex_rule;
mod lexeme;
mod paradigm;
mod periphrastic;
mod redupl;
mod regex_test;
mod stem_conversion;
mod wordform;

pub(crate) use paradigm::join_inflexions;

pub use clitic::{Clitic, CliticSide};
pub use derivation::{Derivation, deriv_for_paradigm};
pub use inflexion::{GlossType, Inflexion, InflexionPart, ParadigmLink, Position};
pub use lex_rule::LexRule;
pub use lexeme::{ExceptionForm, Lexeme, SubLexeme};
pub use paradigm::Paradigm;
pub use periphrastic::{Periphrastic, PeriphrasticPart};
pub use redupl::{Reduplication, ReduplSide, Replacement};
pub use regex_test::RegexTest;
pub use stem_conversion::StemConversion;
pub use wordform::{Wordform, join_stem_flex};
