//! Periphrastic constructions: declarative descriptions of multi-token
//! patterns (`[field="rx"]` parts with quantifiers). Parsed and
//! validated here; matching them against token streams is an outer
//! layer.

use std::sync::LazyLock;

use regex::Regex;

use crate::base::{ErrorLog, GrammarError};

use super::regex_test::RegexTest;

/// Max number of tokens a `*` or `+` quantifier may span.
pub const MAX_SCOPE: usize = 16;

static RX_PARTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]([^\s\[\]]*)").expect("static pattern"));
static RX_FIELD_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([^= \t]+) *= *"([^"]*)""#).expect("static pattern"));
static RX_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([0-9]*)(,?)([0-9]*)\}$").expect("static pattern"));

/// One slot of a periphrastic construction: either a literal wordform
/// or a bundle of field tests, with a token-count range.
#[derive(Clone, Debug)]
pub struct PeriphrasticPart {
    /// Literal surface form, when the slot is not test-based.
    pub wf: Option<String>,
    pub regex_tests: Vec<RegexTest>,
    pub min_qty: usize,
    pub max_qty: usize,
}

impl PeriphrasticPart {
    pub fn parse(text: &str, quantifier: &str, log: &ErrorLog) -> PeriphrasticPart {
        let mut part = PeriphrasticPart {
            wf: None,
            regex_tests: Vec::new(),
            min_qty: 1,
            max_qty: 1,
        };
        if !text.contains('=') {
            part.wf = Some(text.trim().to_string());
            return part;
        }
        let mut found = false;
        for c in RX_FIELD_TEST.captures_iter(text.trim()) {
            found = true;
            part.regex_tests
                .push(RegexTest::new(c[1].to_string(), c[2].to_string(), log));
        }
        if !found {
            log.report(GrammarError::MalformedDescriptor(format!(
                "wrong periphrastic construction: {text}"
            )));
            return part;
        }
        match quantifier {
            "" => {}
            "*" => {
                part.min_qty = 0;
                part.max_qty = MAX_SCOPE;
            }
            "+" => {
                part.min_qty = 1;
                part.max_qty = MAX_SCOPE;
            }
            q if q.starts_with('{') && q.ends_with('}') => match RX_RANGE.captures(q) {
                None => log.report(GrammarError::MalformedDescriptor(format!(
                    "wrong quantifier {q} in {text}"
                ))),
                Some(c) => {
                    part.min_qty = c[1].parse().unwrap_or(0);
                    part.max_qty = if !c[3].is_empty() {
                        c[3].parse().unwrap_or(part.min_qty)
                    } else if !c[2].is_empty() {
                        MAX_SCOPE
                    } else {
                        part.min_qty
                    };
                }
            },
            q => log.report(GrammarError::MalformedDescriptor(format!(
                "wrong quantifier {q} in {text}"
            ))),
        }
        part
    }
}

/// A whole construction: a sequence of quantified parts.
#[derive(Clone, Debug)]
pub struct Periphrastic {
    pub parts: Vec<PeriphrasticPart>,
}

impl Periphrastic {
    pub fn parse(text: &str, log: &ErrorLog) -> Option<Periphrastic> {
        let parts: Vec<PeriphrasticPart> = RX_PARTS
            .captures_iter(text)
            .map(|c| PeriphrasticPart::parse(&c[1], &c[2], log))
            .collect();
        if parts.is_empty() {
            log.report(GrammarError::MalformedDescriptor(format!(
                "wrong periphrastic construction: {text}"
            )));
            return None;
        }
        Some(Periphrastic { parts })
    }
}
