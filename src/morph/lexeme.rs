//! Lexemes and sublexemes.
//!
//! A lexeme couples a lemma with its numbered stems, paradigm names,
//! tags and gloss. At construction it is decomposed into sublexemes,
//! each carrying a single stem and a single paradigm reference; stems
//! equal in every respect collapse into one sublexeme holding the set
//! of their numbers. A stem number of `-1` marks the incorporation
//! variant.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::base::{Descriptor, ErrorLog, GrammarError};

use super::inflexion::Inflexion;
use super::paradigm::Paradigm;
use super::regex_test::RegexTest;
use super::stem_conversion::StemConversion;
use super::wordform::Wordform;

/// Other-data fields used as the stem gloss when no gloss is given.
const DEFAULT_GLOSS_FIELDS: [&str; 2] = ["transl_en", "transl_ru"];

/// A `(stem, paradigm)` specialization of a lexeme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubLexeme {
    /// Numbers of the stems collapsed into this sublexeme; `{-1}` means
    /// the stem can only be incorporated.
    pub num_stem: BTreeSet<i32>,
    pub stem: String,
    pub paradigm: String,
    pub gramm: String,
    pub gloss: String,
    pub no_incorporation: bool,
}

/// An irregular wordform declared on a lexeme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionForm {
    pub form: String,
    pub gramm: String,
    /// Whether the same combination of grammatical values also has a
    /// regular equivalent.
    pub coexist: bool,
}

impl ExceptionForm {
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> Self {
        let mut ex = ExceptionForm {
            form: String::new(),
            gramm: descr.value.clone(),
            coexist: false,
        };
        for obj in &descr.children {
            match obj.name.as_str() {
                "coexist" => match obj.value.as_str() {
                    "yes" => ex.coexist = true,
                    "no" => ex.coexist = false,
                    _ => log.report_with(GrammarError::BadCoexistValue, Some(descr)),
                },
                "form" => ex.form = obj.value.clone(),
                _ => {}
            }
        }
        if ex.form.is_empty() {
            log.report_with(GrammarError::ExceptionWithoutForm, Some(descr));
        }
        ex
    }
}

/// A lexeme: lemma, stems, paradigms, tags, gloss, free other data,
/// exception forms, and the sublexemes derived from all of these.
#[derive(Clone, Debug, Default)]
pub struct Lexeme {
    pub lemma: String,
    pub lexref: String,
    pub stem: String,
    pub stem_incorp: String,
    pub paradigms: Vec<String>,
    pub gramm: String,
    pub gramm_incorp: String,
    pub gloss: String,
    pub gloss_incorp: String,
    pub sub_lexemes: Vec<SubLexeme>,
    pub exceptions: FxHashMap<BTreeSet<String>, Vec<ExceptionForm>>,
    pub other_data: Vec<(String, String)>,
}

impl Lexeme {
    /// Build a lexeme from its descriptor. Paradigms and stem
    /// conversions must already be loaded; `None` means the descriptor
    /// was too broken to produce sublexemes.
    pub fn from_descriptor(
        descr: &Descriptor,
        paradigms: &IndexMap<String, Paradigm>,
        stem_conversions: &FxHashMap<String, StemConversion>,
        log: &ErrorLog,
    ) -> Option<Lexeme> {
        if descr.children.is_empty() {
            log.report_with(
                GrammarError::NoContent {
                    item: "a lexeme",
                    detail: descr.value.clone(),
                },
                Some(descr),
            );
            return None;
        }
        let names: BTreeSet<&str> = descr.child_names().collect();
        if !["lex", "stem", "paradigm"].iter().all(|f| names.contains(f)) {
            log.report_with(GrammarError::MissingObligatoryFields("a lexeme"), Some(descr));
            return None;
        }
        let mut lex = Lexeme::default();
        let mut fields: Vec<&Descriptor> = descr.children.iter().collect();
        fields.sort_by_key(|obj| field_sorting_key(&obj.name));
        for obj in fields {
            match obj.name.as_str() {
                "lex" => lex.set_unique_field("lex", &mut |l| &mut l.lemma, obj, log),
                "lexref" => lex.set_unique_field("lexref", &mut |l| &mut l.lexref, obj, log),
                "stem" => lex.set_unique_field("stem", &mut |l| &mut l.stem, obj, log),
                "stem-incorp" => {
                    lex.set_unique_field("stem-incorp", &mut |l| &mut l.stem_incorp, obj, log)
                }
                "gramm" => lex.set_unique_field("gramm", &mut |l| &mut l.gramm, obj, log),
                "gramm-incorp" => {
                    lex.set_unique_field("gramm-incorp", &mut |l| &mut l.gramm_incorp, obj, log)
                }
                "gloss" => lex.set_unique_field("gloss", &mut |l| &mut l.gloss, obj, log),
                "gloss-incorp" => {
                    lex.set_unique_field("gloss-incorp", &mut |l| &mut l.gloss_incorp, obj, log)
                }
                "paradigm" => lex.paradigms.push(obj.value.clone()),
                "except" => lex.add_exception(obj, log),
                _ => lex
                    .other_data
                    .push((obj.name.to_string(), obj.value.clone())),
            }
        }
        lex.check_gloss();
        lex.generate_sublexemes(paradigms, stem_conversions, log);
        debug!(target: "uralex", lemma = %lex.lemma, sublexemes = lex.sub_lexemes.len(), "lexeme loaded");
        Some(lex)
    }

    fn set_unique_field(
        &mut self,
        name: &'static str,
        field: &mut dyn FnMut(&mut Lexeme) -> &mut String,
        obj: &Descriptor,
        log: &ErrorLog,
    ) {
        if obj.value.is_empty() {
            log.report_with(
                GrammarError::MalformedDescriptor(format!("wrong {name} in {}", self.lemma)),
                Some(obj),
            );
            return;
        }
        let slot = field(self);
        if !slot.is_empty() {
            log.report(GrammarError::DuplicateField {
                field: name,
                item: obj.value.clone(),
            });
        }
        *slot = obj.value.clone();
    }

    fn add_exception(&mut self, obj: &Descriptor, log: &ErrorLog) {
        let ex = ExceptionForm::from_descriptor(obj, log);
        let tag_set: BTreeSet<String> = ex.gramm.split(',').map(str::to_string).collect();
        let forms = self.exceptions.entry(tag_set).or_default();
        if forms.iter().all(|existing| existing != &ex) {
            forms.push(ex);
        }
    }

    /// Fall back to a default other-data gloss, then to `STEM`.
    fn check_gloss(&mut self) {
        if self.gloss.is_empty() {
            for field in DEFAULT_GLOSS_FIELDS {
                if let Some(value) = self.get_data(field).first() {
                    self.gloss = value.to_string();
                    break;
                }
            }
        }
        if self.gloss.is_empty() {
            self.gloss = "STEM".to_string();
        }
    }

    pub fn get_data(&self, field: &str) -> Vec<&str> {
        self.other_data
            .iter()
            .filter(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Number of distinct stem numbers across the sublexemes.
    pub fn num_stems(&self) -> usize {
        let mut nums: BTreeSet<i32> = BTreeSet::new();
        for sl in &self.sub_lexemes {
            nums.extend(&sl.num_stem);
        }
        nums.len()
    }

    fn generate_sublexemes(
        &mut self,
        paradigms: &IndexMap<String, Paradigm>,
        stem_conversions: &FxHashMap<String, StemConversion>,
        log: &ErrorLog,
    ) {
        self.sub_lexemes.clear();
        let mut stems = separate_parts(&self.stem);
        let paradigm_groups: Vec<Vec<Vec<String>>> =
            self.paradigms.iter().map(|p| separate_parts(p)).collect();
        let grams = separate_parts(&self.gramm);
        let glosses = separate_parts(&self.gloss);

        // Inherit conversion links declared by the referenced paradigms.
        for group in &paradigm_groups {
            for part in group {
                for variant in part {
                    if let Some(p) = paradigms.get(variant) {
                        for cl in &p.conversion_links {
                            self.other_data
                                .push(("conversion-link".to_string(), cl.clone()));
                        }
                    }
                }
            }
        }
        self.generate_stems(&mut stems, stem_conversions, log);

        if ![1, stems.len()].contains(&grams.len()) {
            log.report(GrammarError::MalformedDescriptor(format!(
                "wrong number of gramtags ({}) in {}",
                self.gramm, self.lemma
            )));
            return;
        }
        if ![0, 1, stems.len()].contains(&glosses.len()) {
            log.report(GrammarError::MalformedDescriptor(format!(
                "wrong number of glosses ({}) in {}",
                self.gloss, self.lemma
            )));
            return;
        }
        for group in &paradigm_groups {
            if ![1, stems.len()].contains(&group.len()) {
                log.report(GrammarError::MalformedDescriptor(format!(
                    "wrong number of paradigms in {}",
                    self.lemma
                )));
                return;
            }
        }

        let mut no_incorporation = false;
        if !self.stem_incorp.is_empty() {
            no_incorporation = true;
            let stem_incorp = self.stem_incorp.clone();
            let gramm_incorp = self.gramm_incorp.clone();
            let gloss_incorp = self.gloss_incorp.clone();
            self.append_sublexeme(-1, &stem_incorp, "", &gramm_incorp, &gloss_incorp, false);
        }
        for (i_stem, stem_part) in stems.iter().enumerate() {
            let cur_gloss = match glosses.len() {
                0 => "",
                1 => glosses[0][0].as_str(),
                _ => glosses[i_stem][0].as_str(),
            }
            .to_string();
            let cur_gramm = if grams.len() == 1 {
                grams[0][0].clone()
            } else {
                grams[i_stem][0].clone()
            };
            let mut cur_paradigms: Vec<String> = Vec::new();
            for group in &paradigm_groups {
                let part = if group.len() == 1 { &group[0] } else { &group[i_stem] };
                cur_paradigms.extend(part.iter().cloned());
            }
            for cur_stem in stem_part.clone() {
                for cur_paradigm in &cur_paradigms {
                    self.append_sublexeme(
                        i_stem as i32,
                        &cur_stem,
                        cur_paradigm,
                        &cur_gramm,
                        &cur_gloss,
                        no_incorporation,
                    );
                }
            }
        }
    }

    fn append_sublexeme(
        &mut self,
        i_stem: i32,
        stem: &str,
        paradigm: &str,
        gramm: &str,
        gloss: &str,
        no_incorporation: bool,
    ) {
        for sl in &mut self.sub_lexemes {
            if sl.stem == stem
                && sl.paradigm == paradigm
                && sl.gramm == gramm
                && sl.gloss == gloss
                && sl.no_incorporation == no_incorporation
            {
                sl.num_stem.insert(i_stem);
                return;
            }
        }
        self.sub_lexemes.push(SubLexeme {
            num_stem: BTreeSet::from([i_stem]),
            stem: stem.to_string(),
            paradigm: paradigm.to_string(),
            gramm: gramm.to_string(),
            gloss: gloss.to_string(),
            no_incorporation,
        });
    }

    /// Fill the gaps in the stems table through the conversion links.
    fn generate_stems(
        &self,
        stems: &mut Vec<Vec<String>>,
        stem_conversions: &FxHashMap<String, StemConversion>,
        log: &ErrorLog,
    ) {
        let names: BTreeSet<&str> = self
            .other_data
            .iter()
            .filter(|(field, _)| field == "conversion-link")
            .map(|(_, value)| value.as_str())
            .collect();
        for name in names {
            match stem_conversions.get(name) {
                Some(sc) => sc.convert(stems),
                None => log.report(GrammarError::UnknownStemConversion(name.to_string())),
            }
        }
    }

    /// Whether the given sublexeme accepts the given inflexion: stem
    /// numbers must overlap (unless the lexeme has a single stem) and
    /// every regex test must pass.
    pub fn check_compatibility(&self, sl: &SubLexeme, flex: &Inflexion, log: &ErrorLog) -> bool {
        if let Some(stem_num) = &flex.stem_num {
            if (&sl.num_stem & stem_num).is_empty() && self.num_stems() > 1 {
                return false;
            }
        }
        flex
            .regex_tests
            .iter()
            .all(|test| self.sublex_matches(sl, test, log))
    }

    /// Perform one regex test against a sublexeme, resolving the field
    /// against the stem, a lexeme property, or the free other data.
    pub fn sublex_matches(&self, sl: &SubLexeme, test: &RegexTest, log: &ErrorLog) -> bool {
        match test.field.as_str() {
            "stem" | "prev" => test.perform(&sl.stem),
            "paradigm" => {
                log.report(GrammarError::ParadigmRegexTest);
                false
            }
            "lex" => test.perform(&self.lemma),
            "gramm" => test.perform(&self.gramm),
            "gloss" => test.perform(&self.gloss),
            "lexref" => test.perform(&self.lexref),
            "stem-incorp" => test.perform(&self.stem_incorp),
            "gramm-incorp" => test.perform(&self.gramm_incorp),
            "gloss-incorp" => test.perform(&self.gloss_incorp),
            field => {
                let results: Vec<bool> = self
                    .other_data
                    .iter()
                    .filter(|(name, _)| name == field)
                    .map(|(_, value)| test.perform(value))
                    .collect();
                !results.is_empty() && results.into_iter().all(|ok| ok)
            }
        }
    }

    /// Generate every wordform this lexeme can take, one per
    /// sublexeme × inflexion of its (compiled) paradigm.
    pub fn generate_wordforms(
        &self,
        paradigms: &IndexMap<String, Paradigm>,
        log: &ErrorLog,
    ) -> Vec<Wordform> {
        let mut wordforms = Vec::new();
        for sl in &self.sub_lexemes {
            let Some(paradigm) = paradigms.get(&sl.paradigm) else {
                log.report(GrammarError::UnknownParadigm(sl.paradigm.clone()));
                continue;
            };
            for flex in &paradigm.flex {
                if let Some(wf) = Wordform::build(self, sl, flex, log) {
                    wordforms.push(wf);
                }
            }
        }
        wordforms
    }

    /// Mirror every sublexeme into derivational territory: for each
    /// sublexeme whose paradigm has a unified derivation, add a twin
    /// pointing at the derivation paradigm with the same stem.
    pub fn add_derivations(&mut self, paradigms: &IndexMap<String, Paradigm>) {
        let mut mirrors = Vec::new();
        for sl in &self.sub_lexemes {
            let deriv_name = format!("#deriv#paradigm#{}", sl.paradigm);
            if paradigms.contains_key(&deriv_name) {
                let mut mirror = sl.clone();
                mirror.paradigm = deriv_name;
                mirrors.push(mirror);
            }
        }
        self.sub_lexemes.extend(mirrors);
    }
}

/// Sort key putting the core fields first, in a fixed order.
fn field_sorting_key(name: &str) -> String {
    match ["lex", "lexref", "stem", "paradigm", "gramm", "gloss"]
        .iter()
        .position(|f| *f == name)
    {
        Some(i) => format!("!{i}"),
        None => name.to_string(),
    }
}

/// Split a lexeme field into per-stem parts (`|`) and free variants of
/// one part (`//`).
fn separate_parts(s: &str) -> Vec<Vec<String>> {
    s.split('|')
        .map(|part| part.split("//").map(str::to_string).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_paradigms(log: &ErrorLog) -> IndexMap<String, Paradigm> {
        let mut paradigms = IndexMap::new();
        let p = Paradigm::from_descriptor(
            &Descriptor::node(
                "paradigm",
                "Nct",
                vec![Descriptor::node("flex", ".", vec![])],
            ),
            log,
        );
        paradigms.insert(p.name.clone(), p);
        paradigms
    }

    fn lexeme(descr: Descriptor) -> Lexeme {
        let log = ErrorLog::new();
        let paradigms = minimal_paradigms(&log);
        let lex =
            Lexeme::from_descriptor(&descr, &paradigms, &FxHashMap::default(), &log).unwrap();
        assert!(log.is_empty(), "unexpected errors: {:?}", log.entries());
        lex
    }

    #[test]
    fn test_basic_lexeme() {
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "pi"),
                Descriptor::leaf("stem", "pi."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
                Descriptor::leaf("gloss", "child"),
            ],
        ));
        assert_eq!(lex.sub_lexemes.len(), 1);
        let sl = &lex.sub_lexemes[0];
        assert_eq!(sl.stem, "pi.");
        assert_eq!(sl.paradigm, "Nct");
        assert_eq!(sl.num_stem, BTreeSet::from([0]));
        assert_eq!(lex.num_stems(), 1);
    }

    #[test]
    fn test_equal_stems_collapse() {
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "val"),
                Descriptor::leaf("stem", "val.|val."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
            ],
        ));
        assert_eq!(lex.sub_lexemes.len(), 1);
        assert_eq!(lex.sub_lexemes[0].num_stem, BTreeSet::from([0, 1]));
        assert_eq!(lex.num_stems(), 2);
    }

    #[test]
    fn test_stem_variants_fork_sublexemes() {
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "kyl"),
                Descriptor::leaf("stem", "kyl.//kyli."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
            ],
        ));
        assert_eq!(lex.sub_lexemes.len(), 2);
        assert!(lex.sub_lexemes.iter().any(|sl| sl.stem == "kyl."));
        assert!(lex.sub_lexemes.iter().any(|sl| sl.stem == "kyli."));
    }

    #[test]
    fn test_incorporation_sublexeme() {
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "pi"),
                Descriptor::leaf("stem", "pi."),
                Descriptor::leaf("stem-incorp", "pi"),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
            ],
        ));
        let incorp = lex
            .sub_lexemes
            .iter()
            .find(|sl| sl.num_stem.contains(&-1))
            .expect("incorporation sublexeme");
        assert_eq!(incorp.stem, "pi");
        assert!(lex.sub_lexemes.iter().any(|sl| sl.no_incorporation));
    }

    #[test]
    fn test_default_gloss_from_translation() {
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "pi"),
                Descriptor::leaf("stem", "pi."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
                Descriptor::leaf("transl_en", "boy"),
            ],
        ));
        assert_eq!(lex.gloss, "boy");
    }

    #[test]
    fn test_missing_obligatory_fields() {
        let log = ErrorLog::new();
        let paradigms = minimal_paradigms(&log);
        let lex = Lexeme::from_descriptor(
            &Descriptor::node("lexeme", "", vec![Descriptor::leaf("lex", "pi")]),
            &paradigms,
            &FxHashMap::default(),
            &log,
        );
        assert!(lex.is_none());
        assert!(log.contains(&GrammarError::MissingObligatoryFields("a lexeme")));
    }

    #[test]
    fn test_exception_forms() {
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "myny"),
                Descriptor::leaf("stem", "myn."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "V"),
                Descriptor::node(
                    "except",
                    "V,imp",
                    vec![
                        Descriptor::leaf("form", "myn"),
                        Descriptor::leaf("coexist", "no"),
                    ],
                ),
            ],
        ));
        let tags: BTreeSet<String> = ["V", "imp"].iter().map(|s| s.to_string()).collect();
        let forms = lex.exceptions.get(&tags).expect("exception forms");
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].form, "myn");
        assert!(!forms[0].coexist);
    }

    #[test]
    fn test_sublex_regex_check_on_other_data() {
        let log = ErrorLog::new();
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "pi"),
                Descriptor::leaf("stem", "pi."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
                Descriptor::leaf("sem", "animate"),
            ],
        ));
        let sl = &lex.sub_lexemes[0];
        let hit = RegexTest::new("sem", "^anim", &log);
        let miss = RegexTest::new("sem", "^inanim", &log);
        let absent = RegexTest::new("class", ".*", &log);
        assert!(lex.sublex_matches(sl, &hit, &log));
        assert!(!lex.sublex_matches(sl, &miss, &log));
        assert!(!lex.sublex_matches(sl, &absent, &log));
    }

    #[test]
    fn test_paradigm_regex_test_is_illegal() {
        let log = ErrorLog::new();
        let lex = lexeme(Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "pi"),
                Descriptor::leaf("stem", "pi."),
                Descriptor::leaf("paradigm", "Nct"),
                Descriptor::leaf("gramm", "N"),
            ],
        ));
        let test = RegexTest::new("paradigm", "Nct", &log);
        assert!(!lex.sublex_matches(&lex.sub_lexemes[0], &test, &log));
        assert!(log.contains(&GrammarError::ParadigmRegexTest));
    }
}
