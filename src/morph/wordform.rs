//! Wordforms: the analysis records produced by the parser, and the
//! assembly walk that interleaves stem parts with inflexion parts to
//! build the surface form, its segmentation and its gloss.

use std::sync::LazyLock;

use regex::Regex;

use crate::base::{ErrorLog, GrammarError};

use super::inflexion::{GlossType, Inflexion};
use super::lexeme::{Lexeme, SubLexeme};
use super::regex_test::RegexTest;

static RX_STEM_PARTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.|[^.]+").expect("static pattern"));
static RX_CLEAN_LEFT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([>~\-])-+").expect("static pattern"));
static RX_CLEAN_RIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+([<~])$").expect("static pattern"));

/// Other-data fields included in the XML serialization.
const PRINTABLE_OTHER_FIELDS: [&str; 9] = [
    "trans_ru", "trans_en", "trans_de", "lex2", "gramm2", "trans_ru2", "trans_en2", "trans_de2",
    "root",
];

/// One complete analysis of a token: surface form, lemma, tags, gloss
/// and segmentation. Value-equal over all fields; output sets are
/// deduplicated by this equality.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Wordform {
    pub wf: String,
    pub lemma: String,
    pub gramm: String,
    pub gloss: String,
    pub wf_glossed: String,
    pub stem: String,
    pub other_data: Vec<(String, String)>,
}

impl Wordform {
    /// Assemble a wordform from a sublexeme and a fully compiled
    /// inflexion, or refuse (with a report for structural defects,
    /// silently for plain incompatibility).
    pub fn build(
        lex: &Lexeme,
        sl: &SubLexeme,
        flex: &Inflexion,
        log: &ErrorLog,
    ) -> Option<Wordform> {
        if let Some(stem_num) = &flex.stem_num {
            if let Some(&max_num) = stem_num.iter().max() {
                let n = lex.num_stems() as i32;
                if 1 < n && n <= max_num {
                    log.report(GrammarError::BadStemNumber(format!(
                        "lexeme {}, inflexion {}",
                        lex.lemma, flex.flex
                    )));
                    return None;
                }
            }
        }
        if flex.flex_parts.len() > 1 {
            log.report(GrammarError::UncompiledInflexion(flex.flex.clone()));
            return None;
        }
        if !lex.check_compatibility(sl, flex, log) {
            return None;
        }
        let mut wf = Wordform {
            stem: sl.stem.clone(),
            ..Default::default()
        };
        if flex.replace_grammar {
            wf.gramm = flex.gramm.clone();
        } else {
            wf.gramm = sl.gramm.clone();
            if !sl.gramm.is_empty() && !flex.gramm.is_empty() {
                wf.gramm.push(',');
            }
            wf.gramm.push_str(&flex.gramm);
        }
        let mut stem = sl.stem.clone();
        if flex.start_with_self && !stem.starts_with('.') {
            stem.insert(0, '.');
        }
        let (surface, glossed, gloss) = join_stem_flex(&stem, &sl.gloss, flex, false);
        wf.wf = surface;
        wf.wf_glossed = glossed;
        wf.gloss = gloss;
        wf.add_lemma(lex, flex, log);
        if flex.keep_other_data {
            wf.other_data = lex.other_data.clone();
        }
        Some(wf)
    }

    /// The lemma is the lexeme's one unless the inflexion carries a
    /// lemma changer, which rebuilds it from a suitable sublexeme.
    fn add_lemma(&mut self, lex: &Lexeme, flex: &Inflexion, log: &ErrorLog) {
        let Some(changer) = &flex.lemma_changer else {
            self.lemma = lex.lemma.clone();
            return;
        };
        let mut suitable: Vec<&SubLexeme> = lex
            .sub_lexemes
            .iter()
            .filter(|sl| match &changer.stem_num {
                None => true,
                Some(nums) => !(&sl.num_stem & nums).is_empty(),
            })
            .collect();
        if suitable.is_empty() && lex.num_stems() == 1 {
            suitable = lex.sub_lexemes.iter().collect();
        }
        let Some(first) = suitable.first() else {
            log.report(GrammarError::NoStemsForLemma(changer.flex.clone()));
            self.lemma = String::new();
            return;
        };
        match Wordform::build(lex, first, changer, log) {
            Some(lemma_wf) => self.lemma = lemma_wf.wf,
            None => self.lemma = String::new(),
        }
    }

    /// Perform one regex test against a wordform field or its other
    /// data.
    pub fn matches_test(&self, test: &RegexTest) -> bool {
        let field = if test.field == "lex" {
            "lemma"
        } else {
            test.field.as_str()
        };
        match field {
            "wf" => test.perform(&self.wf),
            "gloss" => test.perform(&self.gloss),
            "lemma" => test.perform(&self.lemma),
            "gramm" => test.perform(&self.gramm),
            "wfGlossed" => test.perform(&self.wf_glossed),
            _ => {
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

    /// Value of a named field, for blacklist matching.
    pub fn field_value(&self, field: &str) -> Option<&str> {
        match field {
            "wf" => Some(&self.wf),
            "lemma" => Some(&self.lemma),
            "gramm" => Some(&self.gramm),
            "gloss" => Some(&self.gloss),
            "wfGlossed" => Some(&self.wf_glossed),
            "stem" => Some(&self.stem),
            _ => None,
        }
    }

    /// XML representation of the analysis in the format of the Russian
    /// National Corpus.
    pub fn to_xml(&self, glossing: bool) -> String {
        let mut r = format!("<ana lex=\"{}\" gr=\"{}\"", self.lemma, self.gramm);
        if glossing {
            r.push_str(&format!(
                " parts=\"{}\" gloss=\"{}\"",
                self.wf_glossed, self.gloss
            ));
        }
        for (field, value) in &self.other_data {
            if PRINTABLE_OTHER_FIELDS.contains(&field.as_str()) {
                r.push_str(&format!(" {}=\"{}\"", field, value.replace('"', "'")));
            }
        }
        r.push_str("></ana>");
        r
    }
}

/// Interleave a stem with the single flex-parts group of an inflexion,
/// building the surface form, the segmented form and the morpheme gloss
/// in parallel. Prefix-side affixes are accumulated separately and
/// prepended; infix glosses are wrapped in `<…>`; reduplications are
/// marked with `~`.
pub fn join_stem_flex(
    stem: &str,
    stem_gloss: &str,
    flex: &Inflexion,
    mut stem_started: bool,
) -> (String, String, String) {
    let mut wf = String::new();
    let mut wf_glossed = String::new();
    let mut gloss = String::new();
    let mut pfx_part = String::new();
    let mut ifxs = String::new();
    let mut main_part = String::new();
    let stem_parts: Vec<String> = RX_STEM_PARTS
        .find_iter(stem)
        .map(|m| m.as_str().to_string())
        .collect();
    let flex_parts = flex.flex_parts.first().cloned().unwrap_or_default();
    let stem_specs: String = flex_parts
        .iter()
        .filter(|fp| fp.gloss_type == GlossType::StemSpec)
        .map(|fp| format!(".{}", fp.gloss))
        .collect();
    let mut pos = [0usize, 0usize];
    let mut side = 0usize;
    let mut gloss_type = GlossType::Stem;
    while pos[0] < stem_parts.len() || pos[1] < flex_parts.len() {
        if side == 0 && pos[0] == stem_parts.len() {
            side = 1;
        } else if side == 1 && pos[1] == flex_parts.len() {
            side = 0;
        }
        let is_slot = if side == 0 {
            stem_parts[pos[0]] == "." || stem_parts[pos[0]] == "[.]"
        } else {
            flex_parts[pos[1]].flex == "." || flex_parts[pos[1]].flex == "[.]"
        };
        if is_slot {
            pos[side] += 1;
            if side == 0 {
                side = 1;
            } else {
                if pos[1] == 1 && pos[0] != 1 {
                    continue;
                }
                gloss_type = flex_parts[pos[1] - 1].gloss_type;
                side = 0;
            }
            continue;
        }
        if side == 1 && flex_parts[pos[1]].gloss_type == GlossType::StartWithSelf {
            pos[1] += 1;
            continue;
        }
        if side == 0 {
            let cur = &stem_parts[pos[0]];
            wf.push_str(cur);
            stem_started = true;
            wf_glossed.push_str(cur);
            if matches!(gloss_type, GlossType::Stem | GlossType::StemForced) {
                main_part.push_str(stem_gloss);
                main_part.push_str(&stem_specs);
            }
        } else {
            let cur = &flex_parts[pos[1]];
            wf.push_str(&cur.flex.replace('0', ""));
            let cur_flex = if cur.flex.is_empty() && cur.gloss_type != GlossType::Empty {
                "∅".to_string()
            } else {
                cur.flex.clone()
            };
            match cur.gloss_type {
                GlossType::Afx => {
                    if stem_started {
                        main_part.push_str(&format!("-{}-", cur.gloss));
                    } else {
                        pfx_part.push_str(&format!("-{}-", cur.gloss));
                    }
                    wf_glossed.push_str(&format!("-{cur_flex}-"));
                }
                GlossType::Ifx => {
                    ifxs.push_str(&format!("<{}>", cur.gloss));
                    wf_glossed.push_str(&format!("<{cur_flex}>"));
                }
                GlossType::ReduplRight => {
                    stem_started = true;
                    main_part.push_str(&format!("-{}~", cur.gloss));
                    wf_glossed.push_str(&format!("-{}~", cur.flex));
                }
                GlossType::ReduplLeft => {
                    stem_started = true;
                    main_part.push_str(&format!("~{}-", cur.gloss));
                    wf_glossed.push_str(&format!("~{}-", cur.flex));
                }
                GlossType::StemSpec => {
                    wf_glossed.push_str(&cur.flex);
                }
                GlossType::Stem | GlossType::StemForced => {
                    stem_started = true;
                    wf_glossed.push_str(&cur.flex);
                    main_part.push_str(stem_gloss);
                    main_part.push_str(&stem_specs);
                }
                GlossType::Empty => {
                    stem_started = true;
                    wf_glossed.push_str(&cur.flex);
                }
                GlossType::NextFlex | GlossType::StartWithSelf => {}
            }
        }
        pos[side] += 1;
        gloss = format!("{pfx_part}{ifxs}{main_part}");
    }
    gloss = clean_separators(&gloss);
    let wf_glossed = clean_separators(&wf_glossed);
    (wf, wf_glossed, gloss)
}

/// Collapse doubled separators and trim dangling ones.
fn clean_separators(s: &str) -> String {
    let s = RX_CLEAN_LEFT.replace_all(s, "$1");
    let s = s.trim_matches(|c| c == '-' || c == '~');
    let s = RX_CLEAN_RIGHT.replace_all(s, "$1");
    s.trim_matches(|c| c == '-' || c == '~').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Descriptor;

    fn inflexion(value: &str, gloss: Option<&str>) -> Inflexion {
        let log = ErrorLog::new();
        let mut children = Vec::new();
        if let Some(g) = gloss {
            children.push(Descriptor::leaf("gloss", g));
        }
        Inflexion::from_descriptor(&Descriptor::node("flex", value, children), &log)
    }

    #[test]
    fn test_bare_stem() {
        let flex = inflexion(".", None);
        let (wf, glossed, gloss) = join_stem_flex("pi.", "child", &flex, false);
        assert_eq!(wf, "pi");
        assert_eq!(glossed, "pi");
        assert_eq!(gloss, "child");
    }

    #[test]
    fn test_suffix() {
        let flex = inflexion(".yos", Some("PL"));
        let (wf, glossed, gloss) = join_stem_flex("pi.", "child", &flex, false);
        assert_eq!(wf, "piyos");
        assert_eq!(glossed, "pi-yos");
        assert_eq!(gloss, "child-PL");
    }

    #[test]
    fn test_prefix_accumulated_before_stem() {
        let flex = inflexion("ug|.", Some("NEG"));
        let (wf, glossed, gloss) = join_stem_flex(".pot.", "go.out", &flex, false);
        assert_eq!(wf, "ugpot");
        assert_eq!(glossed, "ug-pot");
        assert_eq!(gloss, "NEG-go.out");
    }

    #[test]
    fn test_infix_glossing() {
        let flex = inflexion(".a.", Some("INS"));
        let (wf, glossed, gloss) = join_stem_flex("k.l.", "word", &flex, false);
        assert_eq!(wf, "kal");
        assert_eq!(glossed, "k<a>l");
        assert_eq!(gloss, "<INS>word");
    }

    #[test]
    fn test_zero_affix_glossed_as_empty_set() {
        let flex = inflexion(".0", Some("SG"));
        let (wf, glossed, gloss) = join_stem_flex("pi.", "child", &flex, false);
        assert_eq!(wf, "pi");
        assert_eq!(glossed, "pi-∅");
        assert_eq!(gloss, "child-SG");
    }

    #[test]
    fn test_wordform_build_folds_grammar() {
        let log = ErrorLog::new();
        let lex = Lexeme {
            lemma: "pi".to_string(),
            stem: "pi.".to_string(),
            gramm: "N".to_string(),
            gloss: "child".to_string(),
            sub_lexemes: vec![SubLexeme {
                num_stem: std::collections::BTreeSet::from([0]),
                stem: "pi.".to_string(),
                paradigm: "Nct".to_string(),
                gramm: "N".to_string(),
                gloss: "child".to_string(),
                no_incorporation: false,
            }],
            ..Default::default()
        };
        let flex = {
            let mut f = inflexion(".yos", Some("PL"));
            f.gramm = "NOM,PL".to_string();
            f
        };
        let wf = Wordform::build(&lex, &lex.sub_lexemes[0], &flex, &log).unwrap();
        assert_eq!(wf.wf, "piyos");
        assert_eq!(wf.gramm, "N,NOM,PL");
        assert_eq!(wf.lemma, "pi");
        assert_eq!(wf.gloss, "child-PL");
        assert_eq!(wf.wf_glossed, "pi-yos");
    }

    #[test]
    fn test_uncompiled_inflexion_rejected() {
        let log = ErrorLog::new();
        let lex = Lexeme {
            lemma: "pi".to_string(),
            sub_lexemes: vec![SubLexeme {
                num_stem: std::collections::BTreeSet::from([0]),
                stem: "pi.".to_string(),
                paradigm: "Nct".to_string(),
                gramm: "N".to_string(),
                gloss: "child".to_string(),
                no_incorporation: false,
            }],
            ..Default::default()
        };
        let mut flex = inflexion(".yos", None);
        flex.flex_parts.push(vec![]);
        flex.flex_parts.push(vec![]);
        assert!(Wordform::build(&lex, &lex.sub_lexemes[0], &flex, &log).is_none());
        assert!(!log.is_empty());
    }

    #[test]
    fn test_to_xml() {
        let wf = Wordform {
            wf: "piyos".to_string(),
            lemma: "pi".to_string(),
            gramm: "N,PL".to_string(),
            gloss: "child-PL".to_string(),
            wf_glossed: "pi-yos".to_string(),
            stem: "pi.".to_string(),
            other_data: vec![
                ("trans_en".to_string(), "\"child\"".to_string()),
                ("hidden".to_string(), "x".to_string()),
            ],
        };
        assert_eq!(
            wf.to_xml(true),
            "<ana lex=\"pi\" gr=\"N,PL\" parts=\"pi-yos\" gloss=\"child-PL\" trans_en=\"'child'\"></ana>"
        );
        assert_eq!(wf.to_xml(false), "<ana lex=\"pi\" gr=\"N,PL\"></ana>");
    }

    #[test]
    fn test_matches_test_fields() {
        let log = ErrorLog::new();
        let wf = Wordform {
            wf: "piyos".to_string(),
            lemma: "pi".to_string(),
            gramm: "N,PL".to_string(),
            other_data: vec![("sem".to_string(), "animate".to_string())],
            ..Default::default()
        };
        assert!(wf.matches_test(&RegexTest::new("wf", "yos$", &log)));
        assert!(wf.matches_test(&RegexTest::new("lex", "^pi$", &log)));
        assert!(wf.matches_test(&RegexTest::new("sem", "anim", &log)));
        assert!(!wf.matches_test(&RegexTest::new("gramm", "ACC", &log)));
        assert!(!wf.matches_test(&RegexTest::new("nosuch", ".", &log)));
    }
}
