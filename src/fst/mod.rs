//! Non-deterministic morphological transducer.
//!
//! Used both for stem lookup and for affix lookup within one paradigm.
//! The automaton has ε-transitions and "loop" states (a `.` in the
//! pattern becomes an ε-edge into a state with a self-loop over any
//! character). [`MorphFst::transduce`] walks all paths over a token and
//! yields every attached object together with the window of input it
//! consumed, so stems know which characters they matched.
//!
//! States are indices into an arena; transitions are keyed by
//! `(state, Option<char>)` with `None` denoting ε.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;

static RX_EMPTY_STEM_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[\]|¦]").expect("static pattern"));
static RX_EMPTY_INCORP_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[\]|¦.]").expect("static pattern"));
static RX_EMPTY_AFFIX_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<[0-9,]+>|[\[\]|¦<>0]").expect("static pattern"));
static RX_MULTI_DOTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\[\.\]|\.){2,}").expect("static pattern"));

/// Remove everything a stem does not need before indexing. When the
/// grammar has derivations, a stem may match at arbitrary positions, so
/// a leading and a trailing slot are added.
pub fn prepare_stem(stem: &str, has_derivations: bool) -> String {
    let mut s = RX_EMPTY_STEM_CHARS.replace_all(stem, "").into_owned();
    s = RX_MULTI_DOTS.replace_all(&s, ".").into_owned();
    if has_derivations {
        if !s.starts_with('.') {
            s.insert(0, '.');
        }
        if !s.ends_with('.') {
            s.push('.');
        }
    }
    s
}

/// Incorporated stems need no further slots; they always end in one.
pub fn prepare_incorp_stem(stem: &str) -> String {
    format!("{}.", RX_EMPTY_INCORP_CHARS.replace_all(stem, ""))
}

/// Remove everything an affix does not need before indexing: the
/// stem-number tag, bracket/bar metacharacters, a leading stem slot,
/// and append a trailing slot.
pub fn prepare_affix(afx: &str) -> String {
    let s = strip_leading_affix_dot(afx);
    let mut s = RX_EMPTY_AFFIX_CHARS.replace_all(&s, "").into_owned();
    s.push('.');
    RX_MULTI_DOTS.replace_all(&s, ".").into_owned()
}

/// Drop a leading stem slot (after an optional `<1,2>` prefix) unless
/// it is part of a longer slot run or precedes an empty segment.
fn strip_leading_affix_dot(afx: &str) -> String {
    let chars: Vec<char> = afx.chars().collect();
    let mut idx = 0;
    if chars.first() == Some(&'<') {
        if let Some(close) = chars.iter().position(|&c| c == '>') {
            if chars[1..close].iter().all(|c| c.is_ascii_digit() || *c == ',') {
                idx = close + 1;
            }
        }
    }
    if chars.get(idx) == Some(&'.')
        && !matches!(chars.get(idx + 1), Some(&('0' | '.' | '[' | '|' | '¦')))
    {
        let mut out: String = chars[..idx].iter().collect();
        out.extend(chars[idx + 1..].iter());
        return out;
    }
    afx.to_string()
}

#[derive(Clone, Debug)]
struct FstState<T> {
    loop_state: bool,
    out: Vec<T>,
}

/// The transducer. `T` is the output attached to terminal states: a
/// sublexeme reference for stem FSTs, an inflexion index for affix
/// FSTs.
#[derive(Clone, Debug)]
pub struct MorphFst<T> {
    states: Vec<FstState<T>>,
    transitions: FxHashMap<(usize, Option<char>), Vec<usize>>,
    det: bool,
}

impl<T> Default for MorphFst<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MorphFst<T> {
    pub fn new() -> Self {
        Self {
            states: vec![FstState {
                loop_state: false,
                out: Vec::new(),
            }],
            transitions: FxHashMap::default(),
            det: false,
        }
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    fn new_state(&mut self, loop_state: bool) -> usize {
        self.states.push(FstState {
            loop_state,
            out: Vec::new(),
        });
        self.states.len() - 1
    }
}

impl<T: Clone + PartialEq> MorphFst<T> {
    fn add_output(&mut self, state: usize, obj: T) {
        let out = &mut self.states[state].out;
        if !out.contains(&obj) {
            out.push(obj);
        }
    }

    /// Add a prepared string (stem or affix) to the transducer, with
    /// `obj` as the output for that string. A `.` advances to (or
    /// reuses) the unique ε-successor that is a loop state; a literal
    /// character advances to (or reuses) the unique non-loop successor.
    pub fn add_string(&mut self, s: &str, obj: T) {
        let chars: Vec<char> = s.chars().collect();
        let mut cur = 0usize;
        for (i, &c) in chars.iter().enumerate() {
            if c == '.' {
                if i == chars.len() - 1 {
                    self.add_output(cur, obj.clone());
                }
                let eps: Vec<usize> = self
                    .transitions
                    .get(&(cur, None))
                    .cloned()
                    .unwrap_or_default();
                if eps.len() != 1 || !self.states[eps[0]].loop_state {
                    let next = self.new_state(true);
                    self.transitions.entry((cur, None)).or_default().push(next);
                    cur = next;
                } else {
                    cur = eps[0];
                }
            } else {
                let nexts: Vec<usize> = self
                    .transitions
                    .get(&(cur, Some(c)))
                    .cloned()
                    .unwrap_or_default();
                if nexts.len() != 1 || self.states[nexts[0]].loop_state {
                    let next = self.new_state(false);
                    self.transitions
                        .entry((cur, Some(c)))
                        .or_default()
                        .push(next);
                    cur = next;
                } else {
                    cur = nexts[0];
                }
            }
        }
        self.add_output(cur, obj);
    }

    /// All outputs the transducer can produce for `token`, with the
    /// input window each one consumed, as `(start, end, obj)`. `end`
    /// may exceed the last index by one when the final character was
    /// consumed strictly; callers clamp when slicing.
    pub fn transduce(&self, token: &[char]) -> Vec<(isize, isize, T)> {
        self.transduce_from(token, 0, 0)
    }

    /// Like [`transduce`](Self::transduce), starting the walk at
    /// `start_char` with the window opening at `obj_start`.
    pub fn transduce_from(
        &self,
        token: &[char],
        start_char: usize,
        obj_start: usize,
    ) -> Vec<(isize, isize, T)> {
        let mut out = Vec::new();
        self.walk(
            token,
            start_char,
            0,
            obj_start as isize,
            token.len() as isize - 1,
            &mut out,
        );
        out
    }

    fn walk(
        &self,
        token: &[char],
        i: usize,
        state: usize,
        obj_start: isize,
        obj_end: isize,
        out: &mut Vec<(isize, isize, T)>,
    ) {
        if i < token.len() {
            let ii = i as isize;
            let strict = self
                .transitions
                .get(&(state, Some(token[i])))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let nonstrict = if self.det {
                &[]
            } else {
                self.transitions
                    .get(&(state, None))
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
            };
            let has_loop = self.states[state].loop_state && (!self.det || strict.is_empty());
            if strict.is_empty() && nonstrict.is_empty() && !has_loop {
                return;
            }
            for &st in strict {
                let cur_end = if obj_end >= ii { ii + 1 } else { obj_end };
                self.walk(token, i + 1, st, obj_start, cur_end, out);
            }
            for &st in nonstrict {
                let cur_end = if obj_end >= ii { ii - 1 } else { obj_end };
                self.walk(token, i, st, obj_start, cur_end, out);
            }
            if has_loop {
                let mut cur_start = obj_start;
                let mut cur_end = obj_end;
                if cur_start < ii && ii < cur_end {
                    cur_end = ii;
                } else if cur_start == ii {
                    cur_start = ii + 1;
                    cur_end = ii + 1;
                } else if cur_end == ii {
                    cur_end -= 1;
                }
                self.walk(token, i + 1, state, cur_start, cur_end, out);
            }
        } else {
            for obj in &self.states[state].out {
                out.push((obj_start, obj_end, obj.clone()));
            }
        }
    }

    /// All states reachable from `states` by ε-arcs, including the
    /// seeds.
    fn eps_closure(&self, states: BTreeSet<usize>) -> BTreeSet<usize> {
        let mut closed = states;
        let mut frontier: Vec<usize> = closed.iter().copied().collect();
        while let Some(st) = frontier.pop() {
            if let Some(targets) = self.transitions.get(&(st, None)) {
                for &t in targets {
                    if closed.insert(t) {
                        frontier.push(t);
                    }
                }
            }
        }
        closed
    }

    /// Subset-construction determinization. The result has no ε-arcs
    /// and follows its self-loops only where no strict transition
    /// matches. State count may grow exponentially; intended for the
    /// stem FST only.
    pub fn determinize(&self) -> MorphFst<T> {
        let mut det = MorphFst::new();
        det.det = true;
        let start_set = self.eps_closure(BTreeSet::from([0]));
        det.states[0].loop_state = start_set.iter().any(|&s| self.states[s].loop_state);
        for &s in &start_set {
            for obj in &self.states[s].out {
                det.add_output(0, obj.clone());
            }
        }
        let mut memo: FxHashMap<Vec<usize>, usize> = FxHashMap::default();
        memo.insert(start_set.iter().copied().collect(), 0);
        let mut queue: Vec<(usize, BTreeSet<usize>)> = vec![(0, start_set)];
        while let Some((det_id, set)) = queue.pop() {
            let mut by_char: BTreeMap<char, BTreeSet<usize>> = BTreeMap::new();
            for ((s, c), targets) in &self.transitions {
                if let Some(ch) = c {
                    if set.contains(s) {
                        by_char.entry(*ch).or_default().extend(targets.iter());
                    }
                }
            }
            let set_loops = set.iter().any(|&s| self.states[s].loop_state);
            for (ch, mut targets) in by_char {
                if set_loops {
                    targets.extend(set.iter());
                }
                let targets = self.eps_closure(targets);
                let key: Vec<usize> = targets.iter().copied().collect();
                let target_id = match memo.get(&key) {
                    Some(&id) => id,
                    None => {
                        let id = det.new_state(
                            targets.iter().any(|&s| self.states[s].loop_state),
                        );
                        for &s in &targets {
                            for obj in &self.states[s].out {
                                det.add_output(id, obj.clone());
                            }
                        }
                        memo.insert(key, id);
                        queue.push((id, targets));
                        id
                    }
                };
                det.transitions.insert((det_id, Some(ch)), vec![target_id]);
            }
        }
        debug!(target: "uralex", states = det.state_count(), "determinized stem index");
        det
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_prepare_stem() {
        assert_eq!(prepare_stem("pi.", false), "pi.");
        assert_eq!(prepare_stem("k[o]l.", false), "kol.");
        assert_eq!(prepare_stem("a..b", false), "a.b");
        assert_eq!(prepare_stem("pi.", true), ".pi.");
    }

    #[test]
    fn test_prepare_incorp_stem() {
        assert_eq!(prepare_incorp_stem("pi."), "pi.");
        assert_eq!(prepare_incorp_stem("k.l"), "kl.");
    }

    #[test]
    fn test_prepare_affix() {
        assert_eq!(prepare_affix(".yos"), "yos.");
        assert_eq!(prepare_affix("<1>.len"), "len.");
        assert_eq!(prepare_affix(".yos|len"), "yoslen.");
        assert_eq!(prepare_affix(".jean<.>"), "jean.");
        // a leading dot before an empty segment marker stays
        assert_eq!(prepare_affix(".0"), ".");
    }

    #[test]
    fn test_exact_stem_match() {
        let mut fst = MorphFst::new();
        fst.add_string("pi.", 1u32);
        let results = fst.transduce(&chars("pi"));
        assert_eq!(results.len(), 1);
        let (l, _, obj) = results[0];
        assert_eq!(l, 0);
        assert_eq!(obj, 1);
    }

    #[test]
    fn test_stem_match_with_suffix_window() {
        let mut fst = MorphFst::new();
        fst.add_string("pi.", 7u32);
        let results = fst.transduce(&chars("piyos"));
        assert_eq!(results, vec![(0, 1, 7)]);
    }

    #[test]
    fn test_no_match() {
        let mut fst = MorphFst::new();
        fst.add_string("pi.", 7u32);
        assert!(fst.transduce(&chars("kyl")).is_empty());
    }

    #[test]
    fn test_shared_prefix_states_are_reused() {
        let mut fst = MorphFst::new();
        fst.add_string("pi.", 1u32);
        let before = fst.state_count();
        fst.add_string("pi.", 2u32);
        assert_eq!(fst.state_count(), before);
        let mut objs: Vec<u32> = fst
            .transduce(&chars("pi"))
            .into_iter()
            .map(|(_, _, o)| o)
            .collect();
        objs.sort_unstable();
        objs.dedup();
        assert_eq!(objs, vec![1, 2]);
    }

    #[test]
    fn test_interior_slot_matches_any_run() {
        let mut fst = MorphFst::new();
        fst.add_string("k.l.", 3u32);
        // the interior dot absorbs a run of arbitrary characters
        assert!(!fst.transduce(&chars("kyyyl")).is_empty());
        assert!(!fst.transduce(&chars("kal")).is_empty());
        assert!(fst.transduce(&chars("kap")).is_empty());
    }

    #[test]
    fn test_transduce_from_offset() {
        let mut fst = MorphFst::new();
        fst.add_string("yos.", 9u32);
        let results = fst.transduce_from(&chars("piyos"), 2, 2);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].2, 9);
        assert!(fst.transduce_from(&chars("piyos"), 1, 1).is_empty());
    }

    #[test]
    fn test_empty_token_yields_start_outputs_only() {
        let mut fst = MorphFst::new();
        fst.add_string(".", 5u32);
        // "." puts the output on the start state as well
        let results = fst.transduce(&chars(""));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].2, 5);
    }

    #[test]
    fn test_determinized_agrees_with_nfa() {
        let mut fst = MorphFst::new();
        fst.add_string(".pi.", 1u32);
        fst.add_string(".pero.", 2u32);
        fst.add_string(".val.", 3u32);
        let det = fst.determinize();
        for token in ["pi", "piyos", "pero", "valjos", "uzpi", "xxx"] {
            let mut nfa_objs: Vec<u32> = fst
                .transduce(&chars(token))
                .into_iter()
                .map(|(_, _, o)| o)
                .collect();
            nfa_objs.sort_unstable();
            nfa_objs.dedup();
            let mut det_objs: Vec<u32> = det
                .transduce(&chars(token))
                .into_iter()
                .map(|(_, _, o)| o)
                .collect();
            det_objs.sort_unstable();
            det_objs.dedup();
            assert_eq!(nfa_objs, det_objs, "token {token}");
        }
    }
}
