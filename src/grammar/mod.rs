//! The grammar container: every registry the engine needs, explicit
//! loading of each input kind, derivation materialization, and the
//! compile step that freezes the whole structure.
//!
//! Nothing here is global: a [`Grammar`] value is built once, compiled
//! once, then shared read-only between parsers.

use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::base::{Descriptor, ErrorLog, GrammarError, GrammarOptions};
use crate::morph::{
    Clitic, Derivation, LexRule, Lexeme, Paradigm, StemConversion, deriv_for_paradigm,
};

/// One blacklist entry: every listed field must match for an analysis
/// to be suppressed.
pub type BadAnalysis = Vec<(SmolStr, Regex)>;

/// Descriptor slices for every input kind of [`Grammar::load`].
#[derive(Clone, Copy, Default)]
pub struct GrammarSources<'a> {
    pub stem_conversions: &'a [Descriptor],
    pub paradigms: &'a [Descriptor],
    pub lexemes: &'a [Descriptor],
    pub lex_rules: &'a [Descriptor],
    pub derivations: &'a [Descriptor],
    pub clitics: &'a [Descriptor],
    pub bad_analyses: &'a [Descriptor],
}

/// A loaded (and eventually compiled) grammar.
pub struct Grammar {
    pub options: GrammarOptions,
    pub log: Arc<ErrorLog>,
    pub paradigms: IndexMap<String, Paradigm>,
    pub lexemes: Vec<Lexeme>,
    pub derivations: IndexMap<String, Derivation>,
    pub stem_conversions: FxHashMap<String, StemConversion>,
    pub clitics: Vec<Clitic>,
    pub lex_rules_by_stem: FxHashMap<String, Vec<LexRule>>,
    pub lex_rules_by_lemma: FxHashMap<String, Vec<LexRule>>,
    pub bad_analyses: Vec<BadAnalysis>,
    compiled: bool,
}

impl Grammar {
    pub fn new(options: GrammarOptions) -> Self {
        Self {
            options,
            log: ErrorLog::new(),
            paradigms: IndexMap::new(),
            lexemes: Vec::new(),
            derivations: IndexMap::new(),
            stem_conversions: FxHashMap::default(),
            clitics: Vec::new(),
            lex_rules_by_stem: FxHashMap::default(),
            lex_rules_by_lemma: FxHashMap::default(),
            bad_analyses: Vec::new(),
            compiled: false,
        }
    }

    /// Load every input kind in dependency order and return the (not
    /// yet compiled) grammar.
    pub fn load(sources: GrammarSources<'_>, options: GrammarOptions) -> Grammar {
        let mut grammar = Grammar::new(options);
        grammar.load_stem_conversions(sources.stem_conversions);
        grammar.load_paradigms(sources.paradigms);
        grammar.load_lexemes(sources.lexemes);
        grammar.load_lex_rules(sources.lex_rules);
        grammar.load_derivations(sources.derivations);
        grammar.load_clitics(sources.clitics);
        grammar.load_bad_analyses(sources.bad_analyses);
        grammar
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Load stem conversion rules; must precede lexemes.
    pub fn load_stem_conversions(&mut self, descrs: &[Descriptor]) -> usize {
        if !self.lexemes.is_empty() {
            self.log.report(GrammarError::LoadOrder {
                phase: "stem conversions",
            });
            return 0;
        }
        for descr in descrs {
            let sc = StemConversion::from_descriptor(descr, &self.log);
            self.stem_conversions.insert(sc.name.clone(), sc);
        }
        self.stem_conversions.len()
    }

    /// Load paradigms; must precede lexemes. Compilation is deferred to
    /// [`compile`](Self::compile).
    pub fn load_paradigms(&mut self, descrs: &[Descriptor]) -> usize {
        if !self.lexemes.is_empty() {
            self.log
                .report(GrammarError::LoadOrder { phase: "paradigms" });
            return 0;
        }
        for descr in descrs {
            let para = Paradigm::from_descriptor(descr, &self.log);
            self.paradigms.insert(para.name.clone(), para);
        }
        self.paradigms.len()
    }

    pub fn load_lexemes(&mut self, descrs: &[Descriptor]) -> usize {
        for descr in descrs {
            if let Some(lex) =
                Lexeme::from_descriptor(descr, &self.paradigms, &self.stem_conversions, &self.log)
            {
                self.lexemes.push(lex);
            }
        }
        self.lexemes.len()
    }

    pub fn load_lex_rules(&mut self, descrs: &[Descriptor]) -> usize {
        for descr in descrs {
            let rule = LexRule::from_descriptor(descr, &self.log);
            if let Some(stem) = &rule.stem {
                self.lex_rules_by_stem
                    .entry(stem.clone())
                    .or_default()
                    .push(rule);
            } else if let Some(lemma) = &rule.lemma {
                self.lex_rules_by_lemma
                    .entry(lemma.clone())
                    .or_default()
                    .push(rule);
            } else {
                self.log.report_with(
                    GrammarError::MalformedDescriptor(
                        "a lexical rule contains neither a lemma nor a stem".to_string(),
                    ),
                    Some(descr),
                );
            }
        }
        self.lex_rules_by_stem.len() + self.lex_rules_by_lemma.len()
    }

    pub fn load_clitics(&mut self, descrs: &[Descriptor]) -> usize {
        for descr in descrs {
            if let Some(clitic) = Clitic::from_descriptor(descr, &self.log) {
                self.clitics.push(clitic);
            }
        }
        self.clitics.len()
    }

    /// Load derivations, materialize their graph for every paradigm,
    /// register each as a pseudo-paradigm and mirror the lexemes into
    /// derivational territory.
    pub fn load_derivations(&mut self, descrs: &[Descriptor]) -> usize {
        for descr in descrs {
            let mut named = descr.clone();
            named.value = format!("#deriv#{}", descr.value);
            self.derivations
                .insert(named.value.clone(), Derivation::new(named));
        }
        if descrs.is_empty() {
            return 0;
        }
        let paradigm_snapshot: Vec<Paradigm> = self.paradigms.values().cloned().collect();
        for paradigm in &paradigm_snapshot {
            deriv_for_paradigm(paradigm, &mut self.derivations, &self.options, &self.log);
        }
        let unified_names: Vec<String> = self
            .derivations
            .keys()
            .filter(|name| name.starts_with("#deriv#paradigm#"))
            .cloned()
            .collect();
        for name in unified_names {
            let mut deriv = self.derivations.get(&name).cloned().expect("listed above");
            deriv.build_links(&self.derivations, &self.log);
            deriv.extend_leaves(&self.derivations, &self.options);
            debug!(target: "uralex", derivation = %name, "links built, leaves extended");
            self.derivations.insert(name, deriv);
        }
        for (name, deriv) in &self.derivations {
            let para = deriv.to_paradigm(&self.log);
            self.paradigms.insert(name.clone(), para);
        }
        let paradigms = &self.paradigms;
        for lex in &mut self.lexemes {
            lex.add_derivations(paradigms);
        }
        self.derivations.len()
    }

    /// Load blacklist entries. Each descriptor's children are
    /// `field: pattern` pairs; patterns are anchored on both sides.
    pub fn load_bad_analyses(&mut self, descrs: &[Descriptor]) -> usize {
        for descr in descrs {
            let mut entry: BadAnalysis = Vec::new();
            let mut ok = true;
            for obj in &descr.children {
                let anchored = format!("^{}$", obj.value.trim_matches(|c| c == '^' || c == '$'));
                match Regex::new(&anchored) {
                    Ok(rx) => entry.push((obj.name.clone(), rx)),
                    Err(_) => {
                        self.log.report(GrammarError::BadRegex {
                            field: obj.name.to_string(),
                            pattern: obj.value.clone(),
                        });
                        ok = false;
                        break;
                    }
                }
            }
            if ok && !entry.is_empty() {
                self.bad_analyses.push(entry);
            }
        }
        self.bad_analyses.len()
    }

    /// Compile the grammar: fold derivation inflexions into their base
    /// paradigms, compile every paradigm, then specialize the
    /// sublexemes (reduplication and regex forks). Idempotent; the
    /// grammar is frozen afterwards.
    pub fn compile(&mut self) {
        if self.compiled {
            return;
        }
        self.add_deriv_links_to_paradigms();
        let snapshot = self.paradigms.clone();
        for (_, paradigm) in self.paradigms.iter_mut() {
            paradigm.compile_paradigm(&snapshot, &self.options, &self.log);
        }
        self.specialize_sublexemes();
        self.compiled = true;
        info!(
            target: "uralex",
            paradigms = self.paradigms.len(),
            lexemes = self.lexemes.len(),
            "grammar compiled"
        );
    }

    /// Add to every paradigm the inflexions of its unified derivation.
    fn add_deriv_links_to_paradigms(&mut self) {
        let pairs: Vec<(String, String)> = self
            .paradigms
            .keys()
            .filter_map(|name| {
                let deriv_name = format!("#deriv#paradigm#{name}");
                self.paradigms
                    .contains_key(&deriv_name)
                    .then(|| (name.clone(), deriv_name))
            })
            .collect();
        for (base, deriv_name) in pairs {
            let deriv_flex = self.paradigms[&deriv_name].flex.clone();
            debug!(
                target: "uralex",
                paradigm = %base,
                inflexions = deriv_flex.len(),
                "derivational inflexions folded in"
            );
            self.paradigms
                .get_mut(&base)
                .expect("key listed above")
                .flex
                .extend(deriv_flex);
        }
    }

    /// Reduplication and regex specialization of every sublexeme,
    /// redirecting it to a forked paradigm where needed.
    fn specialize_sublexemes(&mut self) {
        let Grammar {
            paradigms,
            lexemes,
            log,
            ..
        } = self;
        for lex_idx in 0..lexemes.len() {
            for sub_idx in 0..lexemes[lex_idx].sub_lexemes.len() {
                // Reduplication fork.
                let para_name = lexemes[lex_idx].sub_lexemes[sub_idx].paradigm.clone();
                let Some(paradigm) = paradigms.get(&para_name) else {
                    log.report(GrammarError::UnknownParadigm(para_name));
                    continue;
                };
                if paradigm.contains_reduplications {
                    let fork =
                        paradigm.redupl_fork(&lexemes[lex_idx].sub_lexemes[sub_idx].stem, log);
                    let fork_name = fork.name.clone();
                    paradigms.entry(fork_name.clone()).or_insert(fork);
                    lexemes[lex_idx].sub_lexemes[sub_idx].paradigm = fork_name;
                }
                // Regex fork.
                let para_name = lexemes[lex_idx].sub_lexemes[sub_idx].paradigm.clone();
                let forked = {
                    let lex = &lexemes[lex_idx];
                    let sl = &lex.sub_lexemes[sub_idx];
                    let Some(paradigm) = paradigms.get_mut(&para_name) else {
                        continue;
                    };
                    paradigm.regex_fork(&|test| lex.sublex_matches(sl, test, log))
                };
                if let Some((fork_name, fork)) = forked {
                    paradigms.entry(fork_name.clone()).or_insert(fork);
                    lexemes[lex_idx].sub_lexemes[sub_idx].paradigm = fork_name;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_sources() -> (Vec<Descriptor>, Vec<Descriptor>) {
        let paradigms = vec![Descriptor::node(
            "paradigm",
            "Nct",
            vec![
                Descriptor::node("flex", ".", vec![]),
                Descriptor::node(
                    "flex",
                    ".yos",
                    vec![
                        Descriptor::leaf("gramm", "NOM,PL"),
                        Descriptor::leaf("gloss", "PL"),
                    ],
                ),
            ],
        )];
        let lexemes = vec![Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "pi"),
                Descriptor::leaf("stem", "pi."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
                Descriptor::leaf("gloss", "child"),
            ],
        )];
        (paradigms, lexemes)
    }

    #[test]
    fn test_load_and_compile() {
        let (paradigms, lexemes) = toy_sources();
        let mut grammar = Grammar::load(
            GrammarSources {
                paradigms: &paradigms,
                lexemes: &lexemes,
                ..Default::default()
            },
            GrammarOptions::default(),
        );
        assert_eq!(grammar.paradigms.len(), 1);
        assert_eq!(grammar.lexemes.len(), 1);
        grammar.compile();
        assert!(grammar.is_compiled());
        assert!(grammar.log.is_empty(), "{:?}", grammar.log.entries());
    }

    #[test]
    fn test_compile_is_idempotent() {
        let (paradigms, lexemes) = toy_sources();
        let mut grammar = Grammar::load(
            GrammarSources {
                paradigms: &paradigms,
                lexemes: &lexemes,
                ..Default::default()
            },
            GrammarOptions::default(),
        );
        grammar.compile();
        let flexes_before: Vec<String> = grammar.paradigms["Nct"]
            .flex
            .iter()
            .map(|f| f.flex.clone())
            .collect();
        grammar.compile();
        let flexes_after: Vec<String> = grammar.paradigms["Nct"]
            .flex
            .iter()
            .map(|f| f.flex.clone())
            .collect();
        assert_eq!(flexes_before, flexes_after);
    }

    #[test]
    fn test_load_order_enforced() {
        let (paradigms, lexemes) = toy_sources();
        let mut grammar = Grammar::new(GrammarOptions::default());
        grammar.load_paradigms(&paradigms);
        grammar.load_lexemes(&lexemes);
        assert_eq!(grammar.load_stem_conversions(&[]), 0);
        assert!(grammar.log.contains(&GrammarError::LoadOrder {
            phase: "stem conversions"
        }));
    }

    #[test]
    fn test_bad_analyses_anchoring() {
        let mut grammar = Grammar::new(GrammarOptions::default());
        let n = grammar.load_bad_analyses(&[Descriptor::node(
            "bad-analysis",
            "",
            vec![Descriptor::leaf("gramm", ".*PL.*")],
        )]);
        assert_eq!(n, 1);
        let (field, rx) = &grammar.bad_analyses[0][0];
        assert_eq!(field, "gramm");
        assert!(rx.is_match("N,NOM,PL"));
        assert!(!rx.is_match("N,NOM"));
    }

    #[test]
    fn test_derivations_registered_as_paradigms() {
        let paradigms = vec![Descriptor::node(
            "paradigm",
            "V",
            vec![
                Descriptor::node("flex", ".", vec![]),
                Descriptor::node("deriv-link", "V-caus", vec![]),
            ],
        )];
        let derivations = vec![Descriptor::node(
            "deriv-type",
            "V-caus",
            vec![
                Descriptor::leaf("stem", ".t."),
                Descriptor::leaf("gramm", "+CAUS"),
            ],
        )];
        let lexemes = vec![Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "myn"),
                Descriptor::leaf("stem", "myn."),
                Descriptor::leaf("paradigm", "V"),
                Descriptor::leaf("gramm", "V"),
            ],
        )];
        let grammar = Grammar::load(
            GrammarSources {
                paradigms: &paradigms,
                lexemes: &lexemes,
                derivations: &derivations,
                ..Default::default()
            },
            GrammarOptions::default(),
        );
        assert!(grammar.paradigms.contains_key("#deriv#paradigm#V"));
        assert!(grammar
            .paradigms
            .contains_key("#deriv#V-caus#paradigm#V"));
        // the lexeme gained a mirror sublexeme into derivational territory
        let lex = &grammar.lexemes[0];
        assert!(lex
            .sub_lexemes
            .iter()
            .any(|sl| sl.paradigm == "#deriv#paradigm#V"));
        assert!(grammar.log.is_empty(), "{:?}", grammar.log.entries());
    }
}
