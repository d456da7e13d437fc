//! Numeric knobs governing paradigm compilation and parsing.

use std::time::Duration;

/// Configuration of a [`Grammar`](crate::grammar::Grammar) and of the
/// parsers built over it. Supplied at construction and frozen with the
/// grammar.
#[derive(Clone, Debug)]
pub struct GrammarOptions {
    /// Max number of times one paradigm (during compilation) or one
    /// inflexion (during parsing) may occur in a single chain.
    pub recurs_limit: u32,
    /// Max number of non-empty joins one inflexion may accumulate
    /// during compilation.
    pub deriv_limit: u32,
    /// Max number of compilation rounds, counting every join.
    pub total_deriv_limit: u32,
    /// Max length of a compiled inflexion, metacharacters excluded.
    pub flex_length_limit: usize,
    /// Max number of derivation paradigms entered per analysis.
    pub max_derivations: usize,
    /// Max number of nested empty inflexions per parse state.
    pub max_empty_inflexions: usize,
    /// Stop extending an inflexion once it is long enough, deep enough
    /// or the compile budget has run out, carrying it forward as is.
    pub partial_compile: bool,
    /// Length at which partial compilation stops extending an inflexion.
    pub min_flex_length: usize,
    /// Soft wall-clock cap for compiling one paradigm.
    pub max_compile_time: Duration,
    /// Max prefix length indexed by the hash stem-search method.
    pub max_stem_start_len: usize,
    /// Tokens longer than this are rejected outright.
    pub max_token_length: usize,
    /// Cache `token → analyses` inside each parser.
    pub remember_parses: bool,
}

impl Default for GrammarOptions {
    fn default() -> Self {
        Self {
            recurs_limit: 2,
            deriv_limit: 5,
            total_deriv_limit: 10,
            flex_length_limit: 20,
            max_derivations: 2,
            max_empty_inflexions: 2,
            partial_compile: true,
            min_flex_length: 4,
            max_compile_time: Duration::from_secs(60),
            max_stem_start_len: 6,
            max_token_length: 512,
            remember_parses: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = GrammarOptions::default();
        assert_eq!(opts.recurs_limit, 2);
        assert_eq!(opts.deriv_limit, 5);
        assert_eq!(opts.total_deriv_limit, 10);
        assert_eq!(opts.flex_length_limit, 20);
        assert_eq!(opts.max_token_length, 512);
        assert!(opts.partial_compile);
        assert!(!opts.remember_parses);
    }
}
