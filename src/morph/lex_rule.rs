//! Lexical rules: second-order enrichment applied after the primary
//! morphological analysis. A rule triggers on a stem or lemma match
//! plus regex tests over wordform fields, and appends extra data
//! fields to the analysis.

use crate::base::{Descriptor, ErrorLog, GrammarError};

use super::regex_test::RegexTest;
use super::wordform::Wordform;

#[derive(Clone, Debug)]
pub struct LexRule {
    pub stem: Option<String>,
    pub lemma: Option<String>,
    pub search: Vec<RegexTest>,
    pub add: Vec<(String, String)>,
}

impl LexRule {
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> LexRule {
        let mut rule = LexRule {
            stem: None,
            lemma: None,
            search: Vec::new(),
            add: Vec::new(),
        };
        for obj in &descr.children {
            match obj.name.as_str() {
                "search" => rule.process_search(&obj.children, log),
                "add" => rule.process_add(&obj.children),
                _ => log.report_with(
                    GrammarError::UnrecognizedField {
                        field: obj.name.to_string(),
                        context: "a lexical rule description",
                    },
                    Some(obj),
                ),
            }
        }
        rule
    }

    fn process_search(&mut self, children: &[Descriptor], log: &ErrorLog) {
        for rule in children {
            match rule.name.as_str() {
                "lex" => self.lemma = Some(rule.value.clone()),
                "stem" => self.stem = Some(rule.value.clone()),
                _ => self
                    .search
                    .push(RegexTest::new(rule.name.clone(), rule.value.clone(), log)),
            }
        }
    }

    fn process_add(&mut self, children: &[Descriptor]) {
        for rule in children {
            self.add
                .push((rule.name.to_string(), rule.value.clone()));
        }
    }

    /// Apply the rule to one analysis, returning the enriched copy, or
    /// `None` when the trigger or a search test fails.
    pub fn apply(&self, wf: &Wordform) -> Option<Wordform> {
        if self.stem.as_deref() != Some(wf.stem.as_str())
            && self.lemma.as_deref() != Some(wf.lemma.as_str())
        {
            return None;
        }
        if !self.search.iter().all(|test| wf.matches_test(test)) {
            return None;
        }
        let mut enriched = wf.clone();
        enriched.other_data.extend(self.add.iter().cloned());
        Some(enriched)
    }
}
