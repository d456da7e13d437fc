//! Clitics: bound morphemes peeled off the edge of a token before
//! morphological analysis and re-attached to the host's analyses.

use std::collections::BTreeSet;

use crate::base::{Descriptor, ErrorLog, GrammarError};

use super::regex_test::RegexTest;
use super::wordform::Wordform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliticSide {
    Proclitic,
    Enclitic,
}

/// A minimal lexeme-like record; the stem is the surface string used
/// for matching at the token edge.
#[derive(Clone, Debug)]
pub struct Clitic {
    pub lemma: String,
    pub lexref: String,
    pub stem: String,
    pub gramm: String,
    pub gloss: String,
    pub side: CliticSide,
    pub regex_tests: Vec<RegexTest>,
    pub other_data: Vec<(String, String)>,
}

impl Clitic {
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> Option<Clitic> {
        if descr.children.is_empty() {
            log.report_with(
                GrammarError::NoContent {
                    item: "a clitic",
                    detail: descr.value.clone(),
                },
                Some(descr),
            );
            return None;
        }
        let names: BTreeSet<&str> = descr.child_names().collect();
        if !names.contains("lex") {
            log.report_with(GrammarError::MissingObligatoryFields("a clitic"), Some(descr));
            return None;
        }
        let mut clitic = Clitic {
            lemma: String::new(),
            lexref: String::new(),
            stem: String::new(),
            gramm: String::new(),
            gloss: String::new(),
            side: CliticSide::Enclitic,
            regex_tests: Vec::new(),
            other_data: Vec::new(),
        };
        let mut stem_seen = false;
        for obj in &descr.children {
            match obj.name.as_str() {
                "lex" => set_unique(&mut clitic.lemma, "lex", obj, log),
                "lexref" => set_unique(&mut clitic.lexref, "lexref", obj, log),
                "stem" => {
                    if stem_seen {
                        log.report(GrammarError::DuplicateField {
                            field: "stem",
                            item: clitic.lemma.clone(),
                        });
                    }
                    stem_seen = true;
                    clitic.stem = obj.value.clone();
                }
                "gramm" => set_unique(&mut clitic.gramm, "gramm", obj, log),
                "gloss" => set_unique(&mut clitic.gloss, "gloss", obj, log),
                "type" => match obj.value.as_str() {
                    "pro" => clitic.side = CliticSide::Proclitic,
                    "en" => clitic.side = CliticSide::Enclitic,
                    _ => log.report_with(
                        GrammarError::MalformedDescriptor(format!(
                            "wrong clitic type in {}: {}",
                            clitic.lemma, obj.value
                        )),
                        Some(obj),
                    ),
                },
                name if name.starts_with("regex-") => clitic
                    .regex_tests
                    .push(RegexTest::new(&name[6..], obj.value.clone(), log)),
                _ => clitic
                    .other_data
                    .push((obj.name.to_string(), obj.value.clone())),
            }
        }
        if clitic.stem.is_empty() {
            clitic.stem = clitic.lemma.clone();
        }
        Some(clitic)
    }

    /// Check the clitic against the bare host string; only `wf` tests
    /// can be evaluated at this point.
    pub fn is_compatible_str(&self, host: &str) -> bool {
        if host.is_empty() {
            return false;
        }
        self.regex_tests
            .iter()
            .filter(|t| t.field == "wf")
            .all(|t| t.perform(host))
    }

    /// Check the clitic against a full host analysis.
    pub fn is_compatible(&self, wf: &Wordform) -> bool {
        self.regex_tests.iter().all(|t| wf.matches_test(t))
    }
}

fn set_unique(slot: &mut String, name: &'static str, obj: &Descriptor, log: &ErrorLog) {
    if obj.value.is_empty() {
        log.report_with(
            GrammarError::MalformedDescriptor(format!("wrong {name} in a clitic")),
            Some(obj),
        );
        return;
    }
    if !slot.is_empty() {
        log.report(GrammarError::DuplicateField {
            field: name,
            item: obj.value.clone(),
        });
    }
    *slot = obj.value.clone();
}
