//! Stem conversion: deriving missing numbered stem variants from
//! existing ones by ordered regex replacements.

use std::collections::BTreeMap;

use crate::base::{Descriptor, ErrorLog, GrammarError};

use super::redupl::Replacement;

/// A named set of rules keyed by `(base stem number → new stem number)`.
#[derive(Clone, Debug, Default)]
pub struct StemConversion {
    pub name: String,
    /// base stem number → new stem number → ordered replacements
    rules: BTreeMap<usize, BTreeMap<usize, Vec<Replacement>>>,
}

impl StemConversion {
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> Self {
        let mut sc = Self {
            name: descr.value.clone(),
            rules: BTreeMap::new(),
        };
        let mut stem_base: Option<usize> = None;
        for obj in &descr.children {
            match obj.name.as_str() {
                "stem-base" => match obj.value.parse::<usize>() {
                    Ok(n) => stem_base = Some(n),
                    Err(_) => {
                        log.report_with(
                            GrammarError::BadStemNumber(obj.value.clone()),
                            Some(descr),
                        );
                        return sc;
                    }
                },
                "new-stem" => {
                    let Ok(new_stem) = obj.value.parse::<usize>() else {
                        log.report_with(
                            GrammarError::BadStemNumber(obj.value.clone()),
                            Some(descr),
                        );
                        return sc;
                    };
                    let Some(base) = stem_base else {
                        log.report_with(
                            GrammarError::MalformedDescriptor(
                                "new-stem before stem-base in a stem conversion".to_string(),
                            ),
                            Some(descr),
                        );
                        continue;
                    };
                    sc.add_conversion(base, new_stem, &obj.children, log);
                }
                _ => log.report_with(
                    GrammarError::UnrecognizedField {
                        field: obj.name.to_string(),
                        context: "a stem conversion description",
                    },
                    Some(obj),
                ),
            }
        }
        sc
    }

    fn add_conversion(
        &mut self,
        base: usize,
        new_stem: usize,
        children: &[Descriptor],
        log: &ErrorLog,
    ) {
        for repl in children {
            if repl.name != "replace" {
                log.report_with(
                    GrammarError::UnrecognizedField {
                        field: repl.name.to_string(),
                        context: "a stem conversion description",
                    },
                    Some(repl),
                );
                continue;
            }
            self.rules
                .entry(base)
                .or_default()
                .entry(new_stem)
                .or_default()
                .push(Replacement::from_descriptor(repl, log));
        }
    }

    /// Fill the gaps in a stems table (stem number → variants). Explicit
    /// variants are never overwritten; missing ones are produced from the
    /// base stem by running the replacement list over every variant.
    pub fn convert(&self, stems: &mut Vec<Vec<String>>) {
        for (&base, targets) in &self.rules {
            if base >= stems.len() {
                break;
            }
            for (&new_stem, replacements) in targets {
                if stems.len() <= new_stem {
                    stems.resize(new_stem + 1, Vec::new());
                }
                if stems[new_stem].is_empty() {
                    stems[new_stem] = stems[base]
                        .iter()
                        .map(|stem| {
                            let mut s = stem.clone();
                            for rule in replacements {
                                s = rule.convert(&s);
                            }
                            s
                        })
                        .collect();
                }
            }
        }
    }
}
