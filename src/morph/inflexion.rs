//! Inflexions: the atomic affix templates paradigms are made of.
//!
//! An inflexion template like `<1>.|yos` is parsed into typed parts:
//! stem slots (`.`, `[.]`), literal affix segments, infixes, junction
//! markers (`<.>`), reduplication slots (`[~k]`) and stem-number
//! prefixes (`<1,2>`). Glosses are split on `¦` and aligned positionally
//! with the affix segments.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use smol_str::SmolStr;

use crate::base::{Descriptor, ErrorLog, GrammarError};

use super::redupl::{ReduplSide, Reduplication};
use super::regex_test::RegexTest;

static RX_FLEX_SPLITTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\.>|\.|\[[^\[\]]*\]|[^.<>|\[\]]+").expect("static pattern"));
static RX_STEM_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^<([0-9,]+)>(.*)$").expect("static pattern"));
static RX_STEM_NUMBER_LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^<[0-9,]*>").expect("static pattern"));
static RX_CLEAN_GLOSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[\]!~]+").expect("static pattern"));
static RX_META: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[<>\[\]().0-9~!|,]").expect("static pattern"));
static RX_EMPTY_FLEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[.<>\[\]0-9,]*$").expect("static pattern"));
static RX_REDUPL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[~([^\[\]]*)\]$").expect("static pattern"));
static RX_REDUPL_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[~[^\[\]]*\]").expect("static pattern"));
static RX_STEM_PARTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.|[^.]+").expect("static pattern"));
static RX_REDUPL_FRAGMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\.>|[^<>]+").expect("static pattern"));

/// Whether an inflexion may be the last one of a wordform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    Unspecified,
    NonFinal,
    Final,
    Both,
}

impl Position {
    /// Parse a `position` value; unknown values are reported.
    pub fn from_value(value: &str, log: &ErrorLog, source: Option<&Descriptor>) -> Position {
        match value {
            "final" => Position::Final,
            "both" => Position::Both,
            "non-final" => Position::NonFinal,
            _ => {
                log.report_with(GrammarError::BadPosition(value.to_string()), source);
                Position::Unspecified
            }
        }
    }
}

/// The role of one inflexion part within the wordform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlossType {
    Empty,
    /// Outer affix (prefix or suffix).
    Afx,
    /// Infix, i.e. an affix segment inside the stem.
    Ifx,
    ReduplRight,
    ReduplLeft,
    Stem,
    /// Stem repetition forced by a `!` gloss or a reduplication.
    StemForced,
    /// Stem-specific annotation, glossed as a `.suffix` on the stem.
    StemSpec,
    /// `<.>` junction: the next inflexion level starts here.
    NextFlex,
    /// The inflexion begins before the stem.
    StartWithSelf,
}

/// One typed segment of an inflexion template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InflexionPart {
    pub flex: String,
    pub gloss: String,
    pub gloss_type: GlossType,
}

impl InflexionPart {
    pub fn new(flex: impl Into<String>, gloss: impl Into<String>, gloss_type: GlossType) -> Self {
        Self {
            flex: flex.into(),
            gloss: gloss.into(),
            gloss_type,
        }
    }
}

/// A link to a subsequent paradigm, possibly restricting its position.
///
/// Links are shared, not copied: cloning an inflexion clones `Arc`s.
#[derive(Debug)]
pub struct ParadigmLink {
    pub name: SmolStr,
    pub subsequent: Vec<Arc<ParadigmLink>>,
    pub position: Position,
}

impl ParadigmLink {
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> Arc<Self> {
        if descr.value.is_empty() {
            log.report_with(
                GrammarError::MalformedDescriptor("paradigm link without a name".to_string()),
                Some(descr),
            );
        }
        let mut link = ParadigmLink {
            name: SmolStr::new(&descr.value),
            subsequent: Vec::new(),
            position: Position::Unspecified,
        };
        for obj in &descr.children {
            match obj.name.as_str() {
                "paradigm" => link.subsequent.push(ParadigmLink::from_descriptor(obj, log)),
                "position" => link.position = Position::from_value(&obj.value, log, Some(obj)),
                _ => log.report_with(
                    GrammarError::UnrecognizedField {
                        field: obj.name.to_string(),
                        context: "a link to a paradigm",
                    },
                    Some(obj),
                ),
            }
        }
        Arc::new(link)
    }

    /// A bare link with no position restriction and no further links.
    pub fn simple(name: impl Into<SmolStr>) -> Arc<Self> {
        Arc::new(ParadigmLink {
            name: name.into(),
            subsequent: Vec::new(),
            position: Position::Unspecified,
        })
    }
}

/// True if a rendered flex value contains no surface segments.
pub(crate) fn flex_is_empty(value: &str) -> bool {
    RX_EMPTY_FLEX.is_match(value)
}

/// Parse a `[~k]` marker into its number.
pub(crate) fn parse_redupl_marker(s: &str) -> Option<i64> {
    RX_REDUPL_MARKER
        .captures(s)
        .and_then(|c| c[1].parse::<i64>().ok())
}

/// An inflexion: an ordered list of flex-part groups plus everything
/// that governs where it may attach. A fully compiled inflexion has
/// exactly one group; groups of an uncompiled one are joined left to
/// right during paradigm compilation.
#[derive(Clone, Debug)]
pub struct Inflexion {
    /// String rendering of the template. Rebuilt from `flex_parts` by
    /// [`rebuild_value`](Self::rebuild_value); callers must keep it in
    /// sync before using it.
    pub flex: String,
    /// Which numbered stems this inflexion can attach to.
    pub stem_num: Option<BTreeSet<i32>>,
    /// Which numbered stems subsequent inflexions must accept.
    pub stem_num_out: Option<BTreeSet<i32>>,
    /// Whether `stem_num` must coincide with `stem_num_out` at any time.
    pub pass_stem_num: bool,
    /// Grammatical tags, comma-separated.
    pub gramm: String,
    /// Gloss parts joined by `¦`.
    pub gloss: String,
    pub position: Position,
    pub reduplications: BTreeMap<i64, Reduplication>,
    pub regex_tests: Vec<RegexTest>,
    pub subsequent: Vec<Arc<ParadigmLink>>,
    pub flex_parts: Vec<Vec<InflexionPart>>,
    /// Replace the accumulated grammar instead of appending to it.
    pub replace_grammar: bool,
    /// Pass the lexeme's other data through to the wordform.
    pub keep_other_data: bool,
    pub other_data: Vec<(String, String)>,
    /// An inflexion which rebuilds the lemma of the wordform.
    pub lemma_changer: Option<Box<Inflexion>>,
    /// Start with the inflexion when joining it to a stem or to a
    /// previous inflexion.
    pub start_with_self: bool,
}

impl Default for Inflexion {
    fn default() -> Self {
        Self {
            flex: String::new(),
            stem_num: None,
            stem_num_out: None,
            pass_stem_num: true,
            gramm: String::new(),
            gloss: String::new(),
            position: Position::Unspecified,
            reduplications: BTreeMap::new(),
            regex_tests: Vec::new(),
            subsequent: Vec::new(),
            flex_parts: vec![Vec::new()],
            replace_grammar: false,
            keep_other_data: true,
            other_data: Vec::new(),
            lemma_changer: None,
            start_with_self: false,
        }
    }
}

impl Inflexion {
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> Self {
        let mut infl = Inflexion {
            flex: descr.value.clone(),
            ..Default::default()
        };
        for obj in &descr.children {
            match obj.name.as_str() {
                "gramm" => infl.add_gramm(obj, log),
                "gloss" => infl.add_gloss(obj, log),
                "paradigm" => infl
                    .subsequent
                    .push(ParadigmLink::from_descriptor(obj, log)),
                "redupl" => infl.add_reduplication(obj, log),
                "lex" => infl.add_lemma_changer(obj, log),
                name if name.starts_with("regex-") => infl
                    .regex_tests
                    .push(RegexTest::new(&name[6..], obj.value.clone(), log)),
                _ => infl
                    .other_data
                    .push((obj.name.to_string(), obj.value.clone())),
            }
        }
        infl.generate_parts(log);
        infl
    }

    fn add_gramm(&mut self, obj: &Descriptor, log: &ErrorLog) {
        if !self.gramm.is_empty() {
            log.report(GrammarError::DuplicateField {
                field: "gramm",
                item: self.flex.clone(),
            });
        }
        self.gramm = obj.value.clone();
    }

    fn add_gloss(&mut self, obj: &Descriptor, log: &ErrorLog) {
        if obj.value.is_empty() {
            log.report_with(
                GrammarError::MalformedDescriptor(format!("wrong gloss in {}", self.flex)),
                Some(obj),
            );
            return;
        }
        if !self.gloss.is_empty() {
            log.report(GrammarError::DuplicateField {
                field: "gloss",
                item: self.flex.clone(),
            });
        }
        self.gloss = obj.value.replace('|', "¦");
    }

    fn add_reduplication(&mut self, obj: &Descriptor, log: &ErrorLog) {
        let Ok(num) = obj.value.parse::<i64>() else {
            log.report_with(GrammarError::BadReduplication(self.flex.clone()), Some(obj));
            return;
        };
        if self.reduplications.contains_key(&num) {
            log.report_with(
                GrammarError::DuplicateField {
                    field: "redupl",
                    item: self.flex.clone(),
                },
                Some(obj),
            );
        }
        self.reduplications
            .insert(num, Reduplication::from_children(&obj.children, log));
    }

    fn add_lemma_changer(&mut self, obj: &Descriptor, log: &ErrorLog) {
        let descr = Descriptor::leaf("flex", obj.value.clone());
        let mut changer = Inflexion::from_descriptor(&descr, log);
        changer.start_with_self = true;
        self.lemma_changer = Some(Box::new(changer));
    }

    /// Add a link to a subsequent paradigm; with `check_if_exists`, skip
    /// links to paradigms already linked.
    pub fn add_paradigm_link(&mut self, link: Arc<ParadigmLink>, check_if_exists: bool) {
        if check_if_exists && self.subsequent.iter().any(|p| p.name == link.name) {
            return;
        }
        self.subsequent.push(link);
    }

    /// Strip a `<1,2>` stem-number prefix from the template, recording
    /// the numbers, and return the remainder.
    fn remove_stem_number(&mut self, log: &ErrorLog) -> String {
        if let Some(c) = RX_STEM_NUMBER.captures(&self.flex) {
            let nums: Result<BTreeSet<i32>, _> =
                c[1].split(',').map(|x| x.trim().parse::<i32>()).collect();
            match nums {
                Ok(set) => {
                    let rest = c[2].to_string();
                    if self.stem_num_out.is_none() {
                        self.stem_num_out = Some(set.clone());
                    }
                    self.stem_num = Some(set);
                    return rest;
                }
                Err(_) => {
                    log.report(GrammarError::BadStemNumber(self.flex.clone()));
                    return RX_STEM_NUMBER_LOOSE.replace(&self.flex, "").into_owned();
                }
            }
        }
        self.flex.clone()
    }

    /// Split the template into typed parts and align glosses with them.
    /// Only the first flex-parts group is filled here; further groups
    /// may be added during paradigm compilation.
    fn generate_parts(&mut self, log: &ErrorLog) {
        self.flex_parts = vec![Vec::new()];
        let flex = self.remove_stem_number(log);
        let tokens: Vec<String> = RX_FLEX_SPLITTER
            .find_iter(&flex)
            .map(|m| m.as_str().to_string())
            .collect();
        let gloss_parts: Vec<String> = if self.gloss.is_empty() {
            vec![String::new(); tokens.len()]
        } else {
            self.gloss.split('¦').map(str::to_string).collect()
        };
        let mut i_gloss = 0usize;
        let mut i_redupl = 0i64;
        let mut stem_started = false;
        let mut stem_forced_repeat = false;
        for token in &tokens {
            let mut gloss_type = GlossType::Afx;
            // Glosses align with the parts that are not stem slots and
            // not bracketed segments.
            if !token.contains('.') && !(token.starts_with('[') && token.ends_with(']')) {
                let Some(g) = gloss_parts.get(i_gloss) else {
                    log.report(GrammarError::GlossMismatch {
                        flex: self.flex.clone(),
                        gloss: self.gloss.clone(),
                    });
                    return;
                };
                if g.starts_with('!') {
                    stem_forced_repeat = true;
                }
                gloss_type = if stem_started && !stem_forced_repeat {
                    GlossType::Ifx
                } else {
                    GlossType::Afx
                };
                if g.chars().count() >= 2 && g.starts_with('[') && g.ends_with(']') {
                    gloss_type = GlossType::StemSpec;
                } else if g.starts_with('~') {
                    gloss_type = GlossType::ReduplLeft;
                } else if g.ends_with('~') {
                    gloss_type = GlossType::ReduplRight;
                }
            }
            if token == "0" {
                let g = gloss_parts.get(i_gloss).cloned().unwrap_or_default();
                self.flex_parts[0].push(InflexionPart::new("", g, gloss_type));
                i_gloss += 1;
            } else if token.starts_with("[~") && token.ends_with(']') {
                let inner = &token[2..token.len() - 1];
                let (cur_num, marker) = if inner.is_empty() {
                    let n = i_redupl;
                    i_redupl += 1;
                    (n, format!("[~{n}]"))
                } else {
                    match inner.parse::<i64>() {
                        Ok(n) => (n, token.clone()),
                        Err(_) => {
                            log.report(GrammarError::BadReduplication(flex.clone()));
                            return;
                        }
                    }
                };
                let Some(redupl) = self.reduplications.get(&cur_num) else {
                    log.report(GrammarError::MissingReduplication {
                        id: cur_num,
                        flex: flex.clone(),
                    });
                    return;
                };
                gloss_type = match redupl.side {
                    ReduplSide::Right => GlossType::ReduplRight,
                    ReduplSide::Left => GlossType::ReduplLeft,
                };
                stem_started = true;
                stem_forced_repeat = true;
                let g = gloss_parts.get(i_gloss).cloned().unwrap_or_default();
                self.flex_parts[0].push(InflexionPart::new(marker, g, gloss_type));
                i_gloss += 1;
            } else if token == "." || token == "[.]" {
                gloss_type = if stem_forced_repeat {
                    GlossType::StemForced
                } else if stem_started {
                    GlossType::Empty
                } else {
                    GlossType::Stem
                };
                stem_started = true;
                stem_forced_repeat = false;
                self.flex_parts[0].push(InflexionPart::new(token.clone(), ".", gloss_type));
            } else if token.starts_with('[') && token.ends_with(']') {
                gloss_type = if stem_forced_repeat {
                    GlossType::StemForced
                } else if stem_started {
                    GlossType::Empty
                } else {
                    GlossType::Stem
                };
                stem_started = true;
                stem_forced_repeat = false;
                let inner = token[1..token.len() - 1].to_string();
                self.flex_parts[0].push(InflexionPart::new(inner, "", gloss_type));
            } else if token == "<.>" {
                self.flex_parts[0].push(InflexionPart::new("<.>", "<.>", GlossType::NextFlex));
            } else {
                let g = gloss_parts
                    .get(i_gloss)
                    .map(|g| RX_CLEAN_GLOSS.replace_all(g, "").into_owned())
                    .unwrap_or_default();
                self.flex_parts[0].push(InflexionPart::new(token.clone(), g, gloss_type));
                i_gloss += 1;
            }
        }
        self.ensure_infixes();
        self.rebuild_value();
    }

    /// Make sure the inflexion parts that follow the stem are not
    /// classified as infixes.
    pub fn ensure_infixes(&mut self) {
        for group in &mut self.flex_parts {
            for part in group.iter_mut().rev() {
                match part.gloss_type {
                    GlossType::Stem
                    | GlossType::StemForced
                    | GlossType::Empty
                    | GlossType::ReduplLeft
                    | GlossType::ReduplRight => return,
                    GlossType::Ifx => part.gloss_type = GlossType::Afx,
                    _ => {}
                }
            }
        }
    }

    /// Prohibit subsequent extension of the inflexion.
    pub fn make_final(&mut self) {
        self.position = Position::Final;
        self.subsequent.clear();
        if let Some(last) = self.flex_parts.last_mut() {
            last.retain(|part| part.flex != "<.>");
        }
        self.rebuild_value();
    }

    /// Rebuild `self.flex` from `self.flex_parts`.
    pub fn rebuild_value(&mut self) {
        const SPECIAL: [char; 5] = ['.', '[', ']', '<', '>'];
        let mut new_flex = String::new();
        for group in &self.flex_parts {
            let mut cur = String::new();
            if let Some(nums) = &self.stem_num {
                if !nums.is_empty() {
                    let joined: Vec<String> = nums.iter().map(|n| n.to_string()).collect();
                    cur = format!("<{}>", joined.join(","));
                }
            }
            for part in group {
                if let (Some(first), Some(last)) = (part.flex.chars().next(), cur.chars().last()) {
                    if !SPECIAL.contains(&first) && !SPECIAL.contains(&last) {
                        cur.push('|');
                    }
                }
                cur.push_str(&part.flex);
            }
            if !new_flex.is_empty() {
                new_flex.push_str(" + ");
            }
            new_flex.push_str(&cur);
        }
        self.flex = new_flex;
    }

    /// Length of the concatenated flex with metacharacters stripped.
    pub fn get_length(&mut self) -> usize {
        self.rebuild_value();
        RX_META.replace_all(&self.flex, "").chars().count()
    }

    /// True if the first group is empty or carries no surface segment.
    pub fn is_surface_empty(&self) -> bool {
        match self.flex_parts.first() {
            None => true,
            Some(group) => {
                group.is_empty() || (group.len() == 1 && group[0].flex.is_empty())
            }
        }
    }

    /// Replace `[~k]` slots with the actual reduplicated segments for
    /// the given sublexeme stem. Returns the produced segments, used to
    /// mangle the name of the reduplication-free paradigm fork.
    pub fn simplify_redupl(&mut self, sublex_stem: &str, log: &ErrorLog) -> Vec<String> {
        if self.flex_parts.len() == 1
            && self.flex_parts[0]
                .iter()
                .all(|fp| !fp.flex.starts_with("[~"))
        {
            return Vec::new();
        }
        let mut stem = sublex_stem.to_string();
        if self.start_with_self && !stem.starts_with('.') {
            stem.insert(0, '.');
        }
        let stem_parts: Vec<String> = RX_STEM_PARTS
            .find_iter(&stem)
            .map(|m| m.as_str().to_string())
            .collect();
        let mut redupl_parts = Vec::new();
        let rounds = self.flex_parts.len();
        for _ in 0..rounds {
            let cur_flex_parts: Vec<String> = self.flex_parts[0]
                .iter()
                .filter(|fp| fp.gloss_type != GlossType::StartWithSelf)
                .map(|fp| fp.flex.clone())
                .collect();
            let mut str_form = String::new();
            let mut redupl_numbers = BTreeSet::new();
            {
                let parts: [&[String]; 2] = [&stem_parts, &cur_flex_parts];
                let mut pos = [0usize, 0usize];
                let mut side = 0usize;
                while pos[0] < parts[0].len() || pos[1] < parts[1].len() {
                    if side == 0 && pos[0] == parts[0].len() {
                        side = 1;
                    } else if side == 1 && pos[1] == parts[1].len() {
                        side = 0;
                    }
                    let cur = &parts[side][pos[side]];
                    if cur == "." || cur == "[.]" {
                        pos[side] += 1;
                        if side == 0 {
                            side = 1;
                        } else {
                            if pos[1] == 1 && pos[0] != 1 {
                                continue;
                            }
                            side = 0;
                        }
                        continue;
                    }
                    if side == 1 && cur.starts_with("[~") {
                        match parse_redupl_marker(cur) {
                            Some(n) => {
                                redupl_numbers.insert(n);
                            }
                            None => log.report(GrammarError::BadReduplication(cur.clone())),
                        }
                    }
                    str_form.push_str(cur);
                    pos[side] += 1;
                }
            }
            redupl_parts.extend(self.reduplicate_str(&str_form, &redupl_numbers, log));
            if self.flex_parts.len() > 1 {
                let rest = self.flex_parts.split_off(1);
                let head = std::mem::take(&mut self.flex_parts);
                self.flex_parts = join_flex_parts(head, rest);
            }
        }
        self.rebuild_value();
        redupl_parts
    }

    /// Materialize the given reduplication numbers inside a full form,
    /// splice the results back into the first flex-parts group and
    /// return the produced segments in marker order.
    fn reduplicate_str(
        &mut self,
        str_form: &str,
        numbers: &BTreeSet<i64>,
        log: &ErrorLog,
    ) -> Vec<String> {
        let mut form = str_form.to_string();
        let mut produced: BTreeMap<i64, String> = BTreeMap::new();
        for &num in numbers {
            let marker = format!("[~{num}]");
            let Some(at) = form.find(&marker) else {
                log.report(GrammarError::ReduplicationImpossible {
                    id: num,
                    form: form.clone(),
                });
                return Vec::new();
            };
            let before = form[..at].to_string();
            let after = form[at + marker.len()..].to_string();
            let Some(redupl) = self.reduplications.get(&num) else {
                log.report(GrammarError::MissingReduplication {
                    id: num,
                    flex: self.flex.clone(),
                });
                return Vec::new();
            };
            let raw = match redupl.side {
                ReduplSide::Right => &after,
                ReduplSide::Left => &before,
            };
            let stripped = RX_REDUPL_STRIP.replace_all(raw, "").into_owned();
            let segment = redupl.perform(&stripped);
            form = format!("{before}{segment}{after}");
            produced.insert(num, segment);
        }
        self.replace_redupl_parts(&produced, 0, log);
        produced.into_values().collect()
    }

    /// Replace `[~k]` parts whose numbers appear in `produced` with
    /// literal parts in the given flex-parts group.
    fn replace_redupl_parts(
        &mut self,
        produced: &BTreeMap<i64, String>,
        group: usize,
        log: &ErrorLog,
    ) {
        if group >= self.flex_parts.len() {
            return;
        }
        let marker_indices: Vec<usize> = self.flex_parts[group]
            .iter()
            .enumerate()
            .filter(|(_, fp)| fp.flex.starts_with("[~"))
            .map(|(i, _)| i)
            .collect();
        for i in marker_indices.into_iter().rev() {
            let Some(num) = parse_redupl_marker(&self.flex_parts[group][i].flex) else {
                log.report(GrammarError::BadReduplication(
                    self.flex_parts[group][i].flex.clone(),
                ));
                continue;
            };
            if let Some(segment) = produced.get(&num) {
                self.insert_redupl_part(segment, i, group);
            }
        }
    }

    /// Insert a reduplicated string instead of a `[~k]` part. The
    /// segment may itself contain junction markers, producing several
    /// parts, one of which may be a `<.>`.
    fn insert_redupl_part(&mut self, segment: &str, i_fp: usize, group: usize) {
        let template = self.flex_parts[group].remove(i_fp);
        let fragments: Vec<&str> = RX_REDUPL_FRAGMENTS
            .find_iter(segment)
            .map(|m| m.as_str())
            .collect();
        for (k, frag) in fragments.iter().enumerate() {
            let mut fp = template.clone();
            if *frag == "<.>" {
                fp.gloss = "<.>".to_string();
                fp.gloss_type = GlossType::NextFlex;
            } else if k > 1 {
                fp.gloss = String::new();
            }
            fp.flex = frag.to_string();
            self.flex_parts[group].insert(i_fp + k, fp);
        }
    }
}

/// Splice two flex-parts lists when joining inflexions. Walks the
/// tail group of `left` and the head group of `right` in an
/// alternating-side procedure, flipping sides on junctions and stem
/// slots, and reclassifies the emitted parts.
pub(crate) fn join_flex_parts(
    mut left: Vec<Vec<InflexionPart>>,
    mut right: Vec<Vec<InflexionPart>>,
) -> Vec<Vec<InflexionPart>> {
    // A pending reduplication marker in the left tail defers the join
    // until the marker has been materialized.
    let tail_has_marker = left.last().is_some_and(|g| {
        g.iter().any(|fp| {
            matches!(fp.gloss_type, GlossType::ReduplLeft | GlossType::ReduplRight)
                && fp.flex.starts_with("[~")
        })
    });
    if tail_has_marker {
        left.extend(right);
        return left;
    }
    if left.last().is_some_and(|g| g.is_empty()) {
        left.pop();
        left.extend(right);
        return left;
    }
    if right.first().is_some_and(|g| g.is_empty()) {
        left.extend(right.into_iter().skip(1));
        return left;
    }

    let right_rest = right.split_off(1);
    let right_head = right.into_iter().next().unwrap_or_default();
    let left_tail = left.pop().unwrap_or_default();

    let starts_with_self = right_head
        .first()
        .is_some_and(|fp| fp.gloss_type == GlossType::StartWithSelf);
    let mut old_l = if left_tail
        .first()
        .is_some_and(|fp| fp.gloss_type == GlossType::StartWithSelf)
    {
        left_tail[1..].to_vec()
    } else {
        left_tail
    };
    let (old_r, mut new_group) = if starts_with_self {
        if old_l.first().is_none_or(|fp| fp.flex != "<.>") {
            old_l.insert(0, InflexionPart::new("<.>", "<.>", GlossType::NextFlex));
        }
        (
            right_head[1..].to_vec(),
            vec![InflexionPart::new("", "", GlossType::StartWithSelf)],
        )
    } else {
        (right_head, Vec::new())
    };

    let sides: [&[InflexionPart]; 2] = [&old_l, &old_r];
    let mut pos = [0usize, 0usize];
    let mut side = 0usize;
    let mut stem_started = false;
    let mut stem_forced = false;
    while pos[0] < sides[0].len() || pos[1] < sides[1].len() {
        if side == 0 && pos[0] == sides[0].len() {
            side = 1;
        } else if side == 1 && pos[1] == sides[1].len() {
            side = 0;
        }
        let cur = &sides[side][pos[side]];
        if side == 0 && cur.gloss_type == GlossType::NextFlex {
            pos[0] += 1;
            side = 1;
            continue;
        } else if side == 1 && cur.flex == "." {
            if cur.gloss_type == GlossType::StemForced {
                stem_forced = true;
            }
            if pos[1] == 0 {
                pos[1] += 1;
                continue;
            }
            pos[1] += 1;
            side = 0;
            continue;
        } else if cur.gloss_type == GlossType::StartWithSelf {
            pos[side] += 1;
            continue;
        }
        let mut fp = cur.clone();
        if !stem_started && fp.gloss_type == GlossType::Ifx {
            fp.gloss_type = GlossType::Afx;
        } else if matches!(
            fp.gloss_type,
            GlossType::Stem | GlossType::StemForced | GlossType::Empty
        ) {
            if stem_forced || fp.gloss_type == GlossType::StemForced {
                fp.gloss_type = GlossType::StemForced;
                stem_forced = false;
            } else if !stem_started {
                fp.gloss_type = GlossType::Stem;
            } else {
                fp.gloss_type = GlossType::Empty;
            }
            stem_started = true;
        } else if matches!(
            fp.gloss_type,
            GlossType::ReduplLeft | GlossType::ReduplRight
        ) {
            stem_started = true;
        } else if stem_started && fp.gloss_type == GlossType::Afx {
            fp.gloss_type = GlossType::Ifx;
        }
        pos[side] += 1;
        new_group.push(fp);
    }
    left.push(new_group);
    left.extend(right_rest);
    left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infl(value: &str, children: Vec<Descriptor>) -> Inflexion {
        let log = ErrorLog::new();
        let built = Inflexion::from_descriptor(&Descriptor::node("flex", value, children), &log);
        assert!(log.is_empty(), "unexpected errors: {:?}", log.entries());
        built
    }

    #[test]
    fn test_plain_suffix_template() {
        let i = infl(
            ".yos",
            vec![
                Descriptor::leaf("gramm", "PL"),
                Descriptor::leaf("gloss", "PL"),
            ],
        );
        let parts = &i.flex_parts[0];
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].flex, ".");
        assert_eq!(parts[0].gloss_type, GlossType::Stem);
        assert_eq!(parts[1].flex, "yos");
        assert_eq!(parts[1].gloss, "PL");
        assert_eq!(parts[1].gloss_type, GlossType::Afx);
    }

    #[test]
    fn test_stem_number_prefix() {
        let i = infl("<1,2>.len", vec![]);
        assert_eq!(i.stem_num, Some(BTreeSet::from([1, 2])));
        assert_eq!(i.stem_num_out, Some(BTreeSet::from([1, 2])));
        assert_eq!(i.flex_parts[0][0].flex, ".");
        assert_eq!(i.flex_parts[0][1].flex, "len");
        // rebuild_value restores the prefix
        assert!(i.flex.starts_with("<1,2>"));
    }

    #[test]
    fn test_junction_marker() {
        let i = infl(
            ".jean<.>",
            vec![Descriptor::node("paradigm", "case", vec![])],
        );
        let parts = &i.flex_parts[0];
        assert_eq!(parts[2].flex, "<.>");
        assert_eq!(parts[2].gloss_type, GlossType::NextFlex);
        assert_eq!(i.subsequent.len(), 1);
        assert_eq!(i.subsequent[0].name, "case");
    }

    #[test]
    fn test_infix_between_stem_slots() {
        let i = infl(
            ".a.",
            vec![Descriptor::leaf("gloss", "INFIX")],
        );
        let parts = &i.flex_parts[0];
        assert_eq!(parts[1].gloss_type, GlossType::Ifx);
    }

    #[test]
    fn test_trailing_affix_stays_affix() {
        let i = infl(".ab", vec![Descriptor::leaf("gloss", "X")]);
        // the single literal after the stem slot is an outer affix
        assert_eq!(i.flex_parts[0][1].gloss_type, GlossType::Afx);
    }

    #[test]
    fn test_gloss_mismatch_reported() {
        let log = ErrorLog::new();
        Inflexion::from_descriptor(
            &Descriptor::node(
                "flex",
                ".a|b|c",
                vec![Descriptor::leaf("gloss", "ONE")],
            ),
            &log,
        );
        assert!(!log.is_empty());
    }

    #[test]
    fn test_make_final_strips_junction() {
        let mut i = infl(
            ".jean<.>",
            vec![Descriptor::node("paradigm", "case", vec![])],
        );
        i.make_final();
        assert_eq!(i.position, Position::Final);
        assert!(i.subsequent.is_empty());
        assert!(i.flex_parts[0].iter().all(|fp| fp.flex != "<.>"));
        assert_eq!(i.flex, ".jean");
    }

    #[test]
    fn test_get_length_ignores_meta() {
        let mut i = infl("<1>.|yos", vec![]);
        assert_eq!(i.get_length(), 3);
    }

    #[test]
    fn test_zero_affix() {
        let i = infl(".0", vec![Descriptor::leaf("gloss", "SG")]);
        let parts = &i.flex_parts[0];
        assert_eq!(parts[1].flex, "");
        assert_eq!(parts[1].gloss, "SG");
    }

    #[test]
    fn test_flex_is_empty() {
        assert!(flex_is_empty(""));
        assert!(flex_is_empty(".<.>"));
        assert!(flex_is_empty("<1,2>."));
        assert!(!flex_is_empty(".yos"));
    }

    #[test]
    fn test_redupl_marker_parsing() {
        assert_eq!(parse_redupl_marker("[~0]"), Some(0));
        assert_eq!(parse_redupl_marker("[~12]"), Some(12));
        assert_eq!(parse_redupl_marker("[~]"), None);
        assert_eq!(parse_redupl_marker("yos"), None);
    }

    #[test]
    fn test_simplify_redupl_copies_left_segment() {
        let log = ErrorLog::new();
        let mut i = Inflexion::from_descriptor(
            &Descriptor::node(
                "flex",
                "[~].",
                vec![
                    Descriptor::node(
                        "redupl",
                        "0",
                        vec![Descriptor::leaf("side", "left")],
                    ),
                    Descriptor::leaf("gloss", "~RED"),
                ],
            ),
            &log,
        );
        // force a second group so the marker round actually runs
        i.flex_parts.push(vec![InflexionPart::new(
            "go",
            "go",
            GlossType::Afx,
        )]);
        let parts = i.simplify_redupl("kud.", &log);
        assert!(log.is_empty(), "{:?}", log.entries());
        assert_eq!(parts, vec!["kud".to_string()]);
        assert_eq!(i.flex_parts.len(), 1);
        // the marker became a literal segment
        assert!(i.flex_parts[0].iter().all(|fp| !fp.flex.starts_with("[~")));
    }

    #[test]
    fn test_join_flex_parts_simple_suffix_chain() {
        // ".yos" + ".len" → ".yos|len" style part sequence
        let log = ErrorLog::new();
        let l = Inflexion::from_descriptor(&Descriptor::node("flex", ".yos<.>", vec![]), &log);
        let r = Inflexion::from_descriptor(&Descriptor::node("flex", ".len", vec![]), &log);
        let joined = join_flex_parts(l.flex_parts.clone(), r.flex_parts.clone());
        assert_eq!(joined.len(), 1);
        let flexes: Vec<&str> = joined[0].iter().map(|fp| fp.flex.as_str()).collect();
        assert_eq!(flexes, vec![".", "yos", "len"]);
        // after the infix normalization both literals are outer affixes
        let mut tmp = Inflexion {
            flex_parts: joined,
            ..Default::default()
        };
        tmp.ensure_infixes();
        assert_eq!(tmp.flex_parts[0][1].gloss_type, GlossType::Afx);
        assert_eq!(tmp.flex_parts[0][2].gloss_type, GlossType::Afx);
    }

    #[test]
    fn test_join_flex_parts_empty_sides() {
        let part = vec![InflexionPart::new("a", "A", GlossType::Afx)];
        let joined = join_flex_parts(vec![vec![]], vec![part.clone()]);
        assert_eq!(joined, vec![part.clone()]);
        let joined = join_flex_parts(vec![part.clone()], vec![vec![]]);
        assert_eq!(joined, vec![part]);
    }
}
