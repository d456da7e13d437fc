//! The token-level analyzer.
//!
//! For every token the parser peels candidate clitics off both edges,
//! finds candidate stems (through the stem FST or a prefix hash),
//! threads a stack of inflexion levels over the remaining characters,
//! and validates every surviving state into a [`Wordform`]. Analyses
//! matching the blacklist are dropped; lexical rules enrich the rest.

mod state;

pub use state::{InflLevel, ParseState, SubLexKey};

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::{debug, info, trace};

use crate::base::GrammarError;
use crate::fst::{MorphFst, prepare_affix, prepare_incorp_stem, prepare_stem};
use crate::grammar::Grammar;
use crate::morph::{
    CliticSide, GlossType, Inflexion, Lexeme, ParadigmLink, Position, SubLexeme, Wordform,
    join_inflexions,
};

static RX_CLEAN_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-=<>\[\]/():;.,_!?*]+|[-=<>\[\]/():;.,_!?*]+$").expect("static pattern")
});
static RX_TOKEN_SEARCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^\w]*)([0-9,.\-%]+|[\w\-'`´‘’‛/@.,]+?)([^\w]*)$").expect("static pattern")
});

/// Characters that may be left unconsumed at the tail of an inflexion
/// part when a state is validated.
const FLEX_META_CHARS: &str = ".<>[]~|";

/// How candidate stems are found in a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsingMethod {
    /// Prefix hash over the first non-empty stem parts.
    Hash,
    /// Stem FST plus one affix FST per paradigm.
    Fst,
}

/// Hook deciding whether an analysis survives; `true` keeps it. The
/// intended use is suppression of regular analyses in favor of
/// exception forms, which the engine itself does not decide.
pub type AnalysisFilter = Box<dyn Fn(&Wordform) -> bool>;

/// A parser over one frozen grammar. Each parser owns its own caches
/// and indexes; the grammar is shared read-only.
pub struct Parser<'g> {
    grammar: &'g Grammar,
    method: ParsingMethod,
    /// First-part prefix → sublexemes (hash method).
    stem_starters: FxHashMap<String, Vec<SubLexKey>>,
    stem_fst: MorphFst<SubLexKey>,
    incorp_fst: MorphFst<SubLexKey>,
    /// Paradigm name → FST over its affixes (FST method).
    paradigm_fsts: FxHashMap<String, MorphFst<u32>>,
    /// Pre-generated wordforms of lexemes whose stems cannot be
    /// indexed.
    prebuilt: FxHashMap<String, Vec<Wordform>>,
    cache: FxHashMap<String, Vec<Wordform>>,
    remember_parses: bool,
    rx_first_part: Regex,
    analysis_filter: Option<AnalysisFilter>,
}

impl<'g> Parser<'g> {
    pub fn new(grammar: &'g Grammar, method: ParsingMethod) -> Self {
        let n = grammar.options.max_stem_start_len;
        let rx_first_part = Regex::new(&format!(r"^(.*?)([^ .()\[\]<>|~]{{1,{n}}})"))
            .expect("pattern built from a number");
        Self {
            grammar,
            method,
            stem_starters: FxHashMap::default(),
            stem_fst: MorphFst::new(),
            incorp_fst: MorphFst::new(),
            paradigm_fsts: FxHashMap::default(),
            prebuilt: FxHashMap::default(),
            cache: FxHashMap::default(),
            remember_parses: grammar.options.remember_parses,
            rx_first_part,
            analysis_filter: None,
        }
    }

    /// Install the pluggable analysis filter.
    pub fn set_analysis_filter(&mut self, filter: AnalysisFilter) {
        self.analysis_filter = Some(filter);
    }

    fn lexeme(&self, key: SubLexKey) -> &'g Lexeme {
        &self.grammar.lexemes[key.lex as usize]
    }

    fn sublexeme(&self, key: SubLexKey) -> &'g SubLexeme {
        &self.grammar.lexemes[key.lex as usize].sub_lexemes[key.sub as usize]
    }

    // ------------------------------------------------------------------
    // Index construction
    // ------------------------------------------------------------------

    /// Index the stems of every sublexeme, by FST or prefix hash
    /// depending on the parsing method, then the incorporation stems.
    /// A necessary preliminary step before any analysis.
    pub fn fill_stems(&mut self) {
        match self.method {
            ParsingMethod::Fst => self.fill_stem_fst(),
            ParsingMethod::Hash => self.fill_stem_dicts(),
        }
        self.fill_incorp_stems();
        info!(
            target: "uralex",
            stem_states = self.stem_fst.state_count(),
            prebuilt = self.prebuilt.len(),
            "stem indexes filled"
        );
    }

    fn add_all_wordforms(&mut self, lex: &Lexeme) {
        for wf in lex.generate_wordforms(&self.grammar.paradigms, &self.grammar.log) {
            self.prebuilt.entry(wf.wf.clone()).or_default().push(wf);
        }
    }

    fn fill_stem_fst(&mut self) {
        let grammar = self.grammar;
        let has_derivations = !grammar.derivations.is_empty();
        for (li, lex) in grammar.lexemes.iter().enumerate() {
            for (si, sl) in lex.sub_lexemes.iter().enumerate() {
                if !self.rx_first_part.is_match(&sl.stem) {
                    // no searchable characters: generate all wordforms
                    self.add_all_wordforms(lex);
                    break;
                }
                self.stem_fst.add_string(
                    &prepare_stem(&sl.stem, has_derivations),
                    SubLexKey {
                        lex: li as u32,
                        sub: si as u32,
                    },
                );
            }
        }
    }

    fn fill_stem_dicts(&mut self) {
        let grammar = self.grammar;
        for (li, lex) in grammar.lexemes.iter().enumerate() {
            let mut cur_starters: FxHashMap<String, Vec<SubLexKey>> = FxHashMap::default();
            let mut indexable = true;
            for (si, sl) in lex.sub_lexemes.iter().enumerate() {
                let Some(c) = self.rx_first_part.captures(&sl.stem) else {
                    indexable = false;
                    break;
                };
                cur_starters.entry(c[2].to_string()).or_default().push(SubLexKey {
                    lex: li as u32,
                    sub: si as u32,
                });
            }
            if !indexable {
                self.add_all_wordforms(lex);
                continue;
            }
            for (start, keys) in cur_starters {
                self.stem_starters.entry(start).or_default().extend(keys);
            }
        }
    }

    /// Index the incorporation variants of the stems.
    fn fill_incorp_stems(&mut self) {
        let grammar = self.grammar;
        for (li, lex) in grammar.lexemes.iter().enumerate() {
            for (si, sl) in lex.sub_lexemes.iter().enumerate() {
                if !sl.no_incorporation && self.rx_first_part.is_match(&sl.stem) {
                    self.incorp_fst.add_string(
                        &prepare_incorp_stem(&sl.stem),
                        SubLexKey {
                            lex: li as u32,
                            sub: si as u32,
                        },
                    );
                }
            }
        }
    }

    /// All incorporation-stem matches inside a token.
    pub fn find_incorporated_stems(&self, token: &str) -> Vec<(usize, usize, SubLexKey)> {
        let chars: Vec<char> = token.chars().collect();
        self.incorp_fst
            .transduce(&chars)
            .into_iter()
            .map(|(l, r, key)| (l.max(0) as usize, r.max(0) as usize, key))
            .collect()
    }

    /// Build one affix FST per paradigm. Only the FST parsing method
    /// needs (or uses) these.
    pub fn fill_affixes(&mut self) {
        if self.method != ParsingMethod::Fst {
            self.grammar
                .log
                .report(GrammarError::UnsupportedMethod("hash".to_string()));
            return;
        }
        let grammar = self.grammar;
        for (name, paradigm) in &grammar.paradigms {
            let mut fst = MorphFst::new();
            for (i, infl) in paradigm.flex.iter().enumerate() {
                let mut infl = (**infl).clone();
                infl.rebuild_value();
                fst.add_string(&prepare_affix(&infl.flex), i as u32);
            }
            self.paradigm_fsts.insert(name.clone(), fst);
        }
        info!(
            target: "uralex",
            paradigms = self.paradigm_fsts.len(),
            "affix indexes filled"
        );
    }

    // ------------------------------------------------------------------
    // Inflexion lookup
    // ------------------------------------------------------------------

    /// How many nested empty inflexions the state already uses.
    fn empty_depth(&self, state: &ParseState) -> usize {
        state
            .infl_levels
            .iter()
            .filter(|level| level.infl.is_surface_empty() && !level.infl.subsequent.is_empty())
            .count()
    }

    /// How many times the given inflexion is already open in the state.
    fn infl_count(&self, state: &ParseState, infl: &Arc<Inflexion>) -> usize {
        state
            .infl_levels
            .iter()
            .filter(|level| Arc::ptr_eq(&level.infl, infl))
            .count()
    }

    /// Quick containment check: the first literal segment of the
    /// inflexion must occur somewhere in the unread part of the token.
    fn inflexion_may_conform(&self, state: &ParseState, infl: &Inflexion) -> bool {
        for fp in &infl.flex_parts[0] {
            if matches!(
                fp.gloss_type,
                GlossType::Empty
                    | GlossType::Stem
                    | GlossType::StemForced
                    | GlossType::StartWithSelf
            ) {
                continue;
            }
            if fp.flex == "<.>" {
                continue;
            }
            return chars_contain(&state.wf[state.cur_pos.min(state.wf.len())..], &fp.flex);
        }
        true
    }

    /// Whether the inflexion could continue the word at this state.
    fn inflexion_is_good(
        &self,
        state: &ParseState,
        infl: &Arc<Inflexion>,
        find_derivations: bool,
    ) -> bool {
        let Some(parts) = infl.flex_parts.first() else {
            return false;
        };
        if parts.is_empty() {
            return false;
        }
        if find_derivations && parts[0].gloss_type != GlossType::StartWithSelf {
            return false;
        }
        if self.infl_count(state, infl) >= self.grammar.options.recurs_limit as usize {
            return false;
        }
        for fp in parts {
            if fp.gloss_type == GlossType::Empty || fp.flex.is_empty() {
                continue;
            }
            if fp.flex == "<.>"
                || matches!(fp.gloss_type, GlossType::Stem | GlossType::StemForced)
            {
                return self.inflexion_may_conform(state, infl);
            }
            if state.cur_pos >= state.wf.len() {
                return false;
            }
            let flex_chars: Vec<char> = fp.flex.chars().collect();
            let end = state.cur_pos + flex_chars.len();
            return end <= state.wf.len() && state.wf[state.cur_pos..end] == flex_chars[..];
        }
        true
    }

    /// Candidate inflexions of the named paradigm that may continue the
    /// state, descending through empty inflexions into their linked
    /// paradigms.
    fn find_inflexions(
        &self,
        state: &ParseState,
        para_name: &str,
        find_derivations: bool,
        empty_depth: usize,
    ) -> Vec<(Arc<Inflexion>, SmolStr)> {
        let empty_depth = if empty_depth == 0 {
            self.empty_depth(state)
        } else {
            empty_depth
        };
        if empty_depth > self.grammar.options.max_empty_inflexions {
            return Vec::new();
        }
        if state.derivs_used.len() >= self.grammar.options.max_derivations
            && para_name.contains("#deriv")
        {
            return Vec::new();
        }
        if !self.grammar.paradigms.contains_key(para_name) {
            self.grammar
                .log
                .report(GrammarError::UnknownParadigm(para_name.to_string()));
            return Vec::new();
        }
        match self.method {
            ParsingMethod::Hash => {
                self.find_inflexions_simple(state, para_name, find_derivations, empty_depth)
            }
            ParsingMethod::Fst => {
                self.find_inflexions_fst(state, para_name, find_derivations, empty_depth)
            }
        }
    }

    fn find_inflexions_simple(
        &self,
        state: &ParseState,
        para_name: &str,
        find_derivations: bool,
        empty_depth: usize,
    ) -> Vec<(Arc<Inflexion>, SmolStr)> {
        let paradigm = &self.grammar.paradigms[para_name];
        let mut result = Vec::new();
        for infl in &paradigm.flex {
            if self.inflexion_is_good(state, infl, find_derivations) {
                result.push((infl.clone(), SmolStr::new(para_name)));
            }
            if infl.is_surface_empty() && !infl.subsequent.is_empty() {
                for link in &infl.subsequent {
                    result.extend(self.find_inflexions(
                        state,
                        &link.name,
                        find_derivations,
                        empty_depth + 1,
                    ));
                }
            }
        }
        result
    }

    fn find_inflexions_fst(
        &self,
        state: &ParseState,
        para_name: &str,
        find_derivations: bool,
        empty_depth: usize,
    ) -> Vec<(Arc<Inflexion>, SmolStr)> {
        let Some(fst) = self.paradigm_fsts.get(para_name) else {
            self.grammar
                .log
                .report(GrammarError::MissingAffixIndex(para_name.to_string()));
            return self.find_inflexions_simple(state, para_name, find_derivations, empty_depth);
        };
        let paradigm = &self.grammar.paradigms[para_name];
        let mut start_char = state.cur_pos;
        if state.cur_pos == state.wf_corr_start {
            start_char = state.wf_corr_start + state.corr_length;
        }
        let mut result = Vec::new();
        for (_, _, idx) in fst.transduce_from(&state.wf, start_char, start_char) {
            let infl = &paradigm.flex[idx as usize];
            if find_derivations
                && infl
                    .flex_parts
                    .first()
                    .and_then(|parts| parts.first())
                    .is_some_and(|fp| fp.gloss_type != GlossType::StartWithSelf)
            {
                continue;
            }
            if self.infl_count(state, infl) >= self.grammar.options.recurs_limit as usize {
                continue;
            }
            if infl.is_surface_empty() && !infl.subsequent.is_empty() {
                for link in &infl.subsequent {
                    result.extend(self.find_inflexions(
                        state,
                        &link.name,
                        find_derivations,
                        empty_depth + 1,
                    ));
                }
            } else {
                result.push((infl.clone(), SmolStr::new(para_name)));
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // The investigation loop
    // ------------------------------------------------------------------

    /// Whether the loop has anything left to do in this state.
    fn continue_loop(&self, state: &ParseState) -> bool {
        if state.cur_pos < state.wf.len() {
            return true;
        }
        if state.infl_levels.is_empty() {
            return state.cur_stem_pos >= state.stem.len()
                || state.stem[state.cur_stem_pos] == '.';
        }
        let level = state.infl_levels.last().expect("non-empty");
        let parts = &level.infl.flex_parts[0];
        if level.cur_part < parts.len() {
            let fp = &parts[level.cur_part];
            let stem_open =
                state.cur_stem_pos < state.stem.len() || state.stem.last() == Some(&'.');
            if level.cur_pos >= fp.flex.chars().count()
                || (stem_open
                    && matches!(
                        fp.gloss_type,
                        GlossType::Stem | GlossType::StemForced | GlossType::StartWithSelf
                    ))
                || fp.flex == "<.>"
            {
                return true;
            }
        }
        false
    }

    /// Whether a stem slot in the current inflexion should hand control
    /// back to the stem (or the previous inflexion in the stack).
    fn should_ascend(&self, state: &ParseState) -> bool {
        let lvl = state.cur_level as usize;
        let level = &state.infl_levels[lvl];
        let parts = &level.infl.flex_parts[0];
        if level.cur_part >= parts.len()
            || !matches!(parts[level.cur_part].flex.as_str(), "." | "[.]")
        {
            return false;
        }
        let stem_leading_dot = state.stem.first() == Some(&'.');
        if parts
            .first()
            .is_some_and(|fp| fp.gloss_type == GlossType::StartWithSelf)
        {
            return level.cur_part > 1 || (state.cur_stem_pos < 2 && stem_leading_dot);
        }
        if level.cur_part == 0 && state.cur_level > 0 {
            let prev = &state.infl_levels[lvl - 1];
            let prev_parts = &prev.infl.flex_parts[0];
            if prev.cur_part == 1 && prev_parts.get(1).is_some_and(|fp| fp.flex == "<.>") {
                return false;
            }
        }
        level.cur_part != 0
            || (state.cur_level == 0 && state.cur_stem_pos < 2 && stem_leading_dot)
    }

    /// Run the state to exhaustion, branching on every inflexion
    /// choice, and collect the validated wordforms.
    fn investigate_state(&self, mut state: ParseState) -> Vec<Wordform> {
        while self.continue_loop(&state) {
            if state.cur_level == -1 {
                // the stem level
                if state.cur_stem_pos >= state.stem.len() {
                    trace!(target: "uralex", "stem ended unexpectedly");
                    return Vec::new();
                }
                if state.stem[state.cur_stem_pos] == '.' {
                    state.cur_stem_pos += 1;
                    if !state.infl_levels.is_empty() {
                        state.cur_level = 0;
                        continue;
                    }
                    let sl_paradigm = self.sublexeme(state.sl).paradigm.clone();
                    let mut results = Vec::new();
                    for (infl, para) in self.find_inflexions(&state, &sl_paradigm, false, 0) {
                        let deriv = para.contains("#deriv").then(|| para.clone());
                        let branched = state.with_pushed_level(infl, None, 0, deriv);
                        results.extend(self.investigate_state(branched));
                    }
                    return results;
                } else if state.cur_stem_pos == 0 && state.infl_levels.is_empty() {
                    // derivational inflexions may start before the stem
                    let sl_paradigm = self.sublexeme(state.sl).paradigm.clone();
                    let mut results = Vec::new();
                    for (infl, para) in self.find_inflexions(&state, &sl_paradigm, true, 0) {
                        let deriv = para.contains("#deriv").then(|| para.clone());
                        let branched = state.with_pushed_level(infl, None, 0, deriv);
                        results.extend(self.investigate_state(branched));
                    }
                    if !results.is_empty() {
                        if state.wf.get(state.cur_pos) == state.stem.get(state.cur_stem_pos) {
                            let mut plain = state.clone();
                            plain.cur_level = -1;
                            plain.cur_pos += 1;
                            plain.cur_stem_pos += 1;
                            results.extend(self.investigate_state(plain));
                        }
                        return results;
                    }
                }
                let stem_pos = state.cur_stem_pos as isize;
                if state.stem_corr_start <= stem_pos
                    && stem_pos < state.stem_corr_start + state.corr_length as isize
                {
                    let expected = state.wf_corr_start as isize + stem_pos - state.stem_corr_start;
                    if state.cur_pos as isize != expected {
                        return Vec::new();
                    }
                } else if state.cur_pos >= state.wf.len()
                    || state.cur_stem_pos >= state.stem.len()
                {
                    self.grammar.log.report(GrammarError::StemEnded {
                        stem: state.stem.iter().collect(),
                        wf: state.wf.iter().collect(),
                    });
                    return Vec::new();
                } else if state.wf[state.cur_pos] != state.stem[state.cur_stem_pos] {
                    return Vec::new();
                }
                state.cur_pos += 1;
                state.cur_stem_pos += 1;
            } else {
                let lvl = state.cur_level as usize;
                let infl = state.infl_levels[lvl].infl.clone();
                let parts = &infl.flex_parts[0];
                let cur_part = state.infl_levels[lvl].cur_part;
                if cur_part >= parts.len() {
                    state.cur_level -= 1;
                    continue;
                }
                let fp = &parts[cur_part];
                if fp.flex == "." || fp.flex == "[.]" {
                    let ascend = self.should_ascend(&state);
                    state.infl_levels[lvl].cur_part += 1;
                    state.infl_levels[lvl].cur_pos = 0;
                    if ascend {
                        state.cur_level -= 1;
                    }
                    continue;
                } else if fp.flex == "<.>" {
                    let next_level = state.cur_level + 1;
                    state.infl_levels[lvl].cur_part += 1;
                    state.infl_levels[lvl].cur_pos = 0;
                    if (state.infl_levels.len() as i32) > next_level {
                        state.cur_level = next_level;
                        continue;
                    }
                    let mut results = Vec::new();
                    for link in &infl.subsequent {
                        for (next_infl, para) in
                            self.find_inflexions(&state, &link.name, false, 0)
                        {
                            let deriv = para.contains("#deriv").then(|| para.clone());
                            let branched = state.with_pushed_level(
                                next_infl,
                                Some(link.clone()),
                                next_level,
                                deriv,
                            );
                            results.extend(self.investigate_state(branched));
                        }
                    }
                    return results;
                }
                let cur_pos_in = state.infl_levels[lvl].cur_pos;
                let flex_chars: Vec<char> = fp.flex.chars().collect();
                if cur_pos_in >= flex_chars.len() {
                    state.infl_levels[lvl].cur_part += 1;
                    state.infl_levels[lvl].cur_pos = 0;
                    continue;
                }
                if state.cur_pos >= state.wf.len()
                    || flex_chars[cur_pos_in] != state.wf[state.cur_pos]
                {
                    return Vec::new();
                }
                state.cur_pos += 1;
                state.infl_levels[lvl].cur_pos += 1;
            }
        }
        self.get_wordforms(&state).unwrap_or_default()
    }

    /// Validate an exhausted state: everything must be consumed, the
    /// open inflexion levels must be finishable, and the joined result
    /// must reproduce the token exactly.
    fn get_wordforms(&self, state: &ParseState) -> Option<Vec<Wordform>> {
        if state.cur_pos < state.wf.len() || state.infl_levels.is_empty() {
            return None;
        }
        // trailing dots of the stem are slots, anything else is residue
        if state.stem[state.cur_stem_pos.min(state.stem.len())..]
            .iter()
            .any(|&c| c != '.')
        {
            return None;
        }
        let last = state.infl_levels.last().expect("non-empty");
        if last.infl.position != Position::NonFinal
            && last.infl.flex_parts[0].iter().any(|fp| fp.flex == "<.>")
        {
            return None;
        }
        for level in &state.infl_levels {
            let parts = &level.infl.flex_parts[0];
            if level.cur_part >= parts.len() {
                continue;
            }
            let flex_chars: Vec<char> = parts[level.cur_part].flex.chars().collect();
            for &c in flex_chars.iter().skip(level.cur_pos + 1) {
                if !FLEX_META_CHARS.contains(c) {
                    return None;
                }
            }
            for part in &parts[level.cur_part + 1..] {
                if !matches!(
                    part.gloss_type,
                    GlossType::Stem | GlossType::StemForced | GlossType::StartWithSelf
                ) && !part.flex.is_empty()
                {
                    return None;
                }
            }
        }
        let mut joined = (*state.infl_levels[0].infl).clone();
        for level in &state.infl_levels[1..] {
            let link = level
                .para_link
                .clone()
                .unwrap_or_else(|| ParadigmLink::simple(""));
            let (next, _) = join_inflexions(
                joined,
                &level.infl,
                &link,
                self.grammar.options.partial_compile,
            )?;
            joined = next;
        }
        let lex = self.lexeme(state.sl);
        let sl = self.sublexeme(state.sl);
        let wf = Wordform::build(lex, sl, &joined, &self.grammar.log)?;
        if !wf.wf.chars().eq(state.wf.iter().copied()) {
            return None;
        }
        Some(vec![wf])
    }

    // ------------------------------------------------------------------
    // Stem search
    // ------------------------------------------------------------------

    /// Initial parse states for every candidate stem in the token.
    fn find_stems(&self, word: &Rc<Vec<char>>) -> Vec<ParseState> {
        let mut states = Vec::new();
        match self.method {
            ParsingMethod::Hash => {
                let n = word.len();
                for l in 0..n {
                    let r_max = n.min(l + self.grammar.options.max_stem_start_len);
                    for r in (l + 1)..=r_max {
                        let possible: String = word[l..r].iter().collect();
                        let Some(keys) = self.stem_starters.get(&possible) else {
                            continue;
                        };
                        for &key in keys {
                            let stem_chars: Vec<char> =
                                self.sublexeme(key).stem.chars().collect();
                            let corr_start = find_chars(&stem_chars, &word[l..r]);
                            states.push(ParseState::new(
                                word.clone(),
                                key,
                                Rc::new(stem_chars),
                                l,
                                corr_start,
                                r - l,
                            ));
                        }
                    }
                }
            }
            ParsingMethod::Fst => {
                for (l, r, key) in self.stem_fst.transduce(word) {
                    let l = l.max(0) as usize;
                    let end = ((r + 1).max(0) as usize).min(word.len());
                    let stem_chars: Vec<char> = self.sublexeme(key).stem.chars().collect();
                    let matched = &word[l.min(end)..end];
                    let corr_start = find_chars(&stem_chars, matched);
                    let corr_length = (r - l as isize + 1).max(0) as usize;
                    trace!(
                        target: "uralex",
                        stem = %self.sublexeme(key).stem,
                        window = ?(l, r),
                        "stem candidate"
                    );
                    states.push(ParseState::new(
                        word.clone(),
                        key,
                        Rc::new(stem_chars),
                        l,
                        corr_start,
                        corr_length,
                    ));
                }
            }
        }
        states
    }

    // ------------------------------------------------------------------
    // Token-level analysis
    // ------------------------------------------------------------------

    /// All ways of splitting a word into a host and one clitic (or
    /// none); clitic indexes refer to the grammar's clitic list.
    fn hosts_and_clitics(&self, word: &str) -> Vec<(Option<usize>, String)> {
        let mut out = vec![(None, word.to_string())];
        for (i, clitic) in self.grammar.clitics.iter().enumerate() {
            match clitic.side {
                CliticSide::Enclitic => {
                    if word.ends_with(&clitic.stem) && word.len() > clitic.stem.len() {
                        let host = &word[..word.len() - clitic.stem.len()];
                        if clitic.is_compatible_str(host) {
                            out.push((Some(i), host.to_string()));
                        }
                    }
                }
                CliticSide::Proclitic => {
                    if word.starts_with(&clitic.stem) && word.len() > clitic.stem.len() {
                        let host = &word[clitic.stem.len()..];
                        if clitic.is_compatible_str(host) {
                            out.push((Some(i), host.to_string()));
                        }
                    }
                }
            }
        }
        out
    }

    /// Analyses of a word assumed to carry no clitics.
    pub fn parse_host(&self, word: &str) -> Vec<Wordform> {
        let mut raw: Vec<Wordform> = Vec::new();
        if let Some(prebuilt) = self.prebuilt.get(word) {
            raw.extend(prebuilt.iter().cloned());
        }
        let chars: Rc<Vec<char>> = Rc::new(word.chars().collect());
        for state in self.find_stems(&chars) {
            raw.extend(self.investigate_state(state));
        }
        let mut out: Vec<Wordform> = Vec::new();
        let mut seen: FxHashSet<Wordform> = FxHashSet::default();
        for ana in raw {
            if self.is_bad_analysis(&ana) {
                continue;
            }
            if let Some(filter) = &self.analysis_filter {
                if !filter(&ana) {
                    continue;
                }
            }
            let enriched = self.apply_lex_rules(&ana);
            if enriched.is_empty() {
                if seen.insert(ana.clone()) {
                    out.push(ana);
                }
            } else {
                for wf in enriched {
                    if seen.insert(wf.clone()) {
                        out.push(wf);
                    }
                }
            }
        }
        out
    }

    /// Whether the analysis matches a blacklist entry on all its
    /// fields.
    fn is_bad_analysis(&self, wf: &Wordform) -> bool {
        self.grammar.bad_analyses.iter().any(|entry| {
            entry.iter().all(|(field, rx)| {
                wf.field_value(field)
                    .is_some_and(|value| rx.is_match(value))
            })
        })
    }

    /// All enrichments the lexical rules produce for one analysis.
    fn apply_lex_rules(&self, ana: &Wordform) -> Vec<Wordform> {
        let mut out: Vec<Wordform> = Vec::new();
        let mut seen: FxHashSet<Wordform> = FxHashSet::default();
        let by_lemma = self.grammar.lex_rules_by_lemma.get(&ana.lemma);
        let by_stem = self.grammar.lex_rules_by_stem.get(&ana.stem);
        for rule in by_lemma.into_iter().flatten().chain(by_stem.into_iter().flatten()) {
            if let Some(wf) = rule.apply(ana) {
                if seen.insert(wf.clone()) {
                    out.push(wf);
                }
            }
        }
        out
    }

    /// Analyze one token: strip the punctuation border, try every
    /// clitic split, analyze the host, and re-attach the clitic to the
    /// surviving analyses. Returns the deduplicated set.
    pub fn parse(&mut self, token: &str) -> Vec<Wordform> {
        let word = RX_CLEAN_TOKEN.replace_all(token, "").into_owned();
        if self.remember_parses {
            if let Some(cached) = self.cache.get(&word) {
                trace!(target: "uralex", %word, "cache hit");
                return cached.clone();
            }
        }
        if word.is_empty() || word.chars().count() > self.grammar.options.max_token_length {
            return Vec::new();
        }
        let mut analyses: Vec<Wordform> = Vec::new();
        let mut seen: FxHashSet<Wordform> = FxHashSet::default();
        for (clitic_idx, host) in self.hosts_and_clitics(&word) {
            let host_analyses = self.parse_host(&host);
            for wf in host_analyses {
                let wf = match clitic_idx {
                    None => wf,
                    Some(i) => {
                        let clitic = &self.grammar.clitics[i];
                        if !clitic.is_compatible(&wf) {
                            continue;
                        }
                        let mut wf = wf;
                        wf.wf = word.clone();
                        wf.lemma = format!("{}+{}", wf.lemma, clitic.lemma);
                        if !wf.gramm.is_empty() && !clitic.gramm.is_empty() {
                            wf.gramm.push(',');
                        }
                        wf.gramm.push_str(&clitic.gramm);
                        match clitic.side {
                            CliticSide::Proclitic => {
                                wf.gloss = format!("{}={}", clitic.gloss, wf.gloss);
                                wf.wf_glossed = format!("{}={}", clitic.stem, wf.wf_glossed);
                            }
                            CliticSide::Enclitic => {
                                wf.gloss = format!("{}={}", wf.gloss, clitic.gloss);
                                wf.wf_glossed = format!("{}={}", wf.wf_glossed, clitic.stem);
                            }
                        }
                        wf
                    }
                };
                if seen.insert(wf.clone()) {
                    analyses.push(wf);
                }
            }
        }
        debug!(target: "uralex", %word, analyses = analyses.len(), "token parsed");
        if self.remember_parses {
            self.cache.insert(word, analyses.clone());
        }
        analyses
    }

    /// Serialize a token with its analyses as `<w>…</w>`.
    pub fn ana_to_xml(token: &str, analyses: &[Wordform], glossing: bool) -> String {
        let mut rendered: Vec<String> =
            analyses.iter().map(|ana| ana.to_xml(glossing)).collect();
        rendered.sort();
        rendered.dedup();
        format!("<w>{}{}</w>", rendered.concat(), token)
    }

    // ------------------------------------------------------------------
    // File orchestrators
    // ------------------------------------------------------------------

    /// Analyze a frequency list (`token<sep>freq` per line), writing
    /// analyses and unanalyzed tokens to sibling files. Returns the
    /// number of list entries and the frequency-weighted parsed rate.
    /// I/O failures are reported to the error sink and yield `(0, 0.0)`.
    pub fn parse_freq_list(
        &mut self,
        fname_in: &Path,
        sep: &str,
        fname_parsed: Option<&Path>,
        fname_unparsed: Option<&Path>,
        max_lines: Option<usize>,
        glossing: bool,
    ) -> (usize, f64) {
        let parsed_path = fname_parsed
            .map(Path::to_path_buf)
            .unwrap_or_else(|| suffixed(fname_in, "-parsed.txt"));
        let unparsed_path = fname_unparsed
            .map(Path::to_path_buf)
            .unwrap_or_else(|| suffixed(fname_in, "-unparsed.txt"));
        let Ok(content) = std::fs::read_to_string(fname_in) else {
            self.grammar.log.report(GrammarError::FileUnreadable {
                path: fname_in.display().to_string(),
            });
            return (0, 0.0);
        };
        let mut entries: Vec<(String, u64)> = Vec::new();
        for line in content.lines().filter(|line| line.chars().count() > 2) {
            let mut fields = line.split(sep);
            let (Some(token), Some(freq)) = (fields.next(), fields.next()) else {
                self.grammar.log.report(GrammarError::BadFrequencyList {
                    path: fname_in.display().to_string(),
                });
                return (0, 0.0);
            };
            let Ok(freq) = freq.trim().parse::<u64>() else {
                self.grammar.log.report(GrammarError::BadFrequencyList {
                    path: fname_in.display().to_string(),
                });
                return (0, 0.0);
            };
            entries.push((token.trim().to_string(), freq));
        }
        if let Some(max) = max_lines {
            entries.truncate(max);
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let (Ok(mut f_parsed), Ok(mut f_unparsed)) = (
            std::fs::File::create(&parsed_path),
            std::fs::File::create(&unparsed_path),
        ) else {
            self.grammar.log.report(GrammarError::FileUnreadable {
                path: parsed_path.display().to_string(),
            });
            return (0, 0.0);
        };
        let n_entries = entries.len();
        let mut parsed_freqs: u64 = 0;
        let mut unparsed_freqs: u64 = 0;
        for (token, freq) in entries {
            let analyses = self.parse(&token);
            if analyses.is_empty() {
                let _ = writeln!(f_unparsed, "{token}");
                unparsed_freqs += freq;
            } else {
                let _ = writeln!(f_parsed, "{}", Self::ana_to_xml(&token, &analyses, glossing));
                parsed_freqs += freq;
            }
        }
        let total = parsed_freqs + unparsed_freqs;
        let rate = if total == 0 {
            0.0
        } else {
            parsed_freqs as f64 / total as f64
        };
        (n_entries, rate)
    }

    /// Analyze a whitespace-tokenized text file, writing an XML
    /// rendition. Returns `(total words, analyzed words)`. I/O failures
    /// are reported to the error sink and yield `(0, 0)`.
    pub fn parse_text(
        &mut self,
        fname_in: &Path,
        fname_out: Option<&Path>,
        glossing: bool,
    ) -> (usize, usize) {
        self.remember_parses = true;
        let out_path = fname_out
            .map(Path::to_path_buf)
            .unwrap_or_else(|| suffixed(fname_in, "-processed.xml"));
        let Ok(text) = std::fs::read_to_string(fname_in) else {
            self.grammar.log.report(GrammarError::FileUnreadable {
                path: fname_in.display().to_string(),
            });
            return (0, 0);
        };
        let mut processed = String::from("<text>\n");
        let mut total_words = 0usize;
        let mut words_analyzed = 0usize;
        for token in text.split_whitespace() {
            let Some(c) = RX_TOKEN_SEARCH.captures(token) else {
                processed.push(' ');
                processed.push_str(token);
                continue;
            };
            processed.push(' ');
            processed.push_str(&c[1]);
            let word = &c[2];
            if !word.is_empty() {
                let analyses = self.parse(&word.to_lowercase());
                if !analyses.is_empty() {
                    words_analyzed += 1;
                }
                processed.push_str(&Self::ana_to_xml(word, &analyses, glossing));
                total_words += 1;
            }
            processed.push_str(&c[3]);
            processed.push('\n');
        }
        processed.push_str("</text>");
        if std::fs::write(&out_path, processed).is_err() {
            self.grammar.log.report(GrammarError::FileUnreadable {
                path: out_path.display().to_string(),
            });
            return (0, 0);
        }
        (total_words, words_analyzed)
    }
}

/// Append a suffix to a path's file name.
fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Whether `needle` occurs as a contiguous run inside `haystack`.
fn chars_contain(haystack: &[char], needle: &str) -> bool {
    find_chars_str(haystack, needle).is_some()
}

fn find_chars_str(haystack: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == needle[..])
}

/// Char-level `find`, `-1` when absent.
fn find_chars(haystack: &[char], needle: &[char]) -> isize {
    if needle.is_empty() {
        return 0;
    }
    if needle.len() > haystack.len() {
        return -1;
    }
    (0..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()] == needle[..])
        .map(|i| i as isize)
        .unwrap_or(-1)
}
