//! Regex tests: the guards that decide whether an inflexion, clitic or
//! lexical rule is applicable to a given stem, neighboring affix or
//! wordform field.

use regex::Regex;
use smol_str::SmolStr;

use crate::base::{ErrorLog, GrammarError};

/// A compiled regex aimed at a named field.
///
/// Fields prefixed `next-`/`prev-` target the neighbor in a join context
/// and are resolved at join time; `stem`, `wf`, `lemma`, `gramm`,
/// `gloss` and other lexeme properties are resolved at match time.
#[derive(Clone, Debug)]
pub struct RegexTest {
    pub field: SmolStr,
    pub pattern: String,
    rx: Regex,
}

impl PartialEq for RegexTest {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.pattern == other.pattern
    }
}

impl RegexTest {
    /// Compile a test. A malformed pattern is reported and replaced with
    /// an empty pattern, which matches everywhere.
    pub fn new(field: impl Into<SmolStr>, pattern: impl Into<String>, log: &ErrorLog) -> Self {
        let field = field.into();
        let pattern = pattern.into();
        let rx = match Regex::new(&pattern) {
            Ok(rx) => rx,
            Err(_) => {
                log.report(GrammarError::BadRegex {
                    field: field.to_string(),
                    pattern: pattern.clone(),
                });
                Regex::new("").expect("empty pattern compiles")
            }
        };
        Self { field, pattern, rx }
    }

    /// Retarget the test at a different field, keeping the pattern.
    pub fn with_field(&self, field: impl Into<SmolStr>) -> Self {
        Self {
            field: field.into(),
            pattern: self.pattern.clone(),
            rx: self.rx.clone(),
        }
    }

    /// Whether the pattern matches anywhere in `s`.
    pub fn perform(&self, s: &str) -> bool {
        self.rx.is_match(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perform_matches_anywhere() {
        let log = ErrorLog::new();
        let t = RegexTest::new("stem", "yos$", &log);
        assert!(t.perform("piyos"));
        assert!(!t.perform("yospi"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_bad_pattern_reported_and_matches_all() {
        let log = ErrorLog::new();
        let t = RegexTest::new("stem", "[unclosed", &log);
        assert_eq!(log.len(), 1);
        assert!(t.perform("anything"));
    }

    #[test]
    fn test_equality_by_field_and_pattern() {
        let log = ErrorLog::new();
        let a = RegexTest::new("stem", "a+", &log);
        let b = RegexTest::new("stem", "a+", &log);
        let c = RegexTest::new("prev", "a+", &log);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
