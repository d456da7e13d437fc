//! Paradigms: named sets of inflexions, and the paradigm compiler,
//! which transitively joins inflexions along their links to subsequent
//! paradigms.
//!
//! Compilation may blow up on cyclic paradigm graphs; it is bounded by
//! a per-branch recurrence budget, a join-depth budget, a length cap
//! and a soft wall clock (see [`GrammarOptions`]).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use indexmap::IndexMap;
use regex::Regex;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::base::{Descriptor, ErrorLog, GrammarError, GrammarOptions};

use super::inflexion::{
    GlossType, Inflexion, InflexionPart, ParadigmLink, Position, flex_is_empty, join_flex_parts,
    parse_redupl_marker,
};
use super::regex_test::RegexTest;

static RX_PARADIGM_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("#paradigm#[^#]+$").expect("static pattern"));

/// Strip the trailing `#paradigm#…` qualifier from a paradigm or
/// derivation name, leaving the short name used for recurrence budgets.
pub(crate) fn short_paradigm_name(name: &str) -> SmolStr {
    SmolStr::new(RX_PARADIGM_SUFFIX.replace(name, "").as_ref())
}

/// An inflexion on the compile frontier, carrying its own recurrence
/// budget and join depth. Never shared between branches.
#[derive(Clone)]
struct CompileItem {
    infl: Inflexion,
    join_depth: u32,
    dict_recurs: FxHashMap<SmolStr, u32>,
}

/// A named set of inflexions. Paradigm-wide links and positions are
/// redistributed into the individual inflexions at construction and
/// discarded. Instances also represent derivations-as-paradigms.
#[derive(Clone, Debug)]
pub struct Paradigm {
    pub name: String,
    pub flex: Vec<Arc<Inflexion>>,
    /// Raw `deriv-link` descriptors, consumed by the derivation engine.
    pub deriv_links: Vec<Descriptor>,
    /// Names of stem conversions every lexeme of this paradigm inherits.
    pub conversion_links: Vec<String>,
    pub contains_reduplications: bool,
    /// `(field, pattern) → (test, inflexion indices relying on it)`,
    /// built lazily after compilation.
    regex_tests: Option<BTreeMap<(SmolStr, String), (RegexTest, BTreeSet<usize>)>>,
}

impl Paradigm {
    /// Build from a `paradigm` or `deriv-type` descriptor.
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> Self {
        let mut para = Paradigm {
            name: descr.value.clone(),
            flex: Vec::new(),
            deriv_links: Vec::new(),
            conversion_links: Vec::new(),
            contains_reduplications: false,
            regex_tests: None,
        };
        let mut flexes: Vec<Inflexion> = Vec::new();
        let mut position = Position::Unspecified;
        let mut subsequent: Vec<Descriptor> = Vec::new();
        match descr.name.as_str() {
            "paradigm" => para.init_paradigm(
                descr,
                &mut flexes,
                &mut position,
                &mut subsequent,
                log,
            ),
            "deriv-type" => para.init_derivation(descr, &mut flexes, log),
            _ => log.report_with(
                GrammarError::MalformedDescriptor(format!(
                    "neither a paradigm nor a derivation: {}",
                    descr.name
                )),
                Some(descr),
            ),
        }
        // Redistribute paradigm-wide position and links into the
        // individual inflexions, then drop them.
        if position != Position::Unspecified {
            for flex in &mut flexes {
                if flex.position == Position::Unspecified {
                    flex.position = position;
                }
            }
        }
        for obj in &subsequent {
            let link = ParadigmLink::from_descriptor(obj, log);
            for flex in &mut flexes {
                flex.add_paradigm_link(link.clone(), true);
            }
        }
        para.flex = flexes.into_iter().map(Arc::new).collect();
        para
    }

    fn init_paradigm(
        &mut self,
        descr: &Descriptor,
        flexes: &mut Vec<Inflexion>,
        position: &mut Position,
        subsequent: &mut Vec<Descriptor>,
        log: &ErrorLog,
    ) {
        for obj in separate_variants(&descr.children) {
            match obj.name.as_str() {
                "flex" => {
                    let infl = Inflexion::from_descriptor(&obj, log);
                    if !infl.reduplications.is_empty() {
                        self.contains_reduplications = true;
                    }
                    flexes.push(infl);
                }
                "paradigm" => subsequent.push(obj.clone()),
                "position" => *position = Position::from_value(&obj.value, log, Some(&obj)),
                "deriv-link" => self.deriv_links.push(obj.clone()),
                "conversion-link" => self.conversion_links.push(obj.value.clone()),
                _ => log.report_with(
                    GrammarError::UnrecognizedField {
                        field: obj.name.to_string(),
                        context: "a paradigm",
                    },
                    Some(&obj),
                ),
            }
        }
    }

    /// Create an inflexion for each stem of a derivation. Derivational
    /// inflexions start with themselves, are strictly non-final, and by
    /// default replace the accumulated grammar.
    fn init_derivation(&mut self, descr: &Descriptor, flexes: &mut Vec<Inflexion>, log: &ErrorLog) {
        let mut stems = vec![String::new()];
        let mut glosses = vec![String::new()];
        let mut gramms = vec![String::new()];
        let mut new_data: Vec<Descriptor> = Vec::new();
        for obj in separate_variants(&descr.children) {
            match obj.name.as_str() {
                "stem" => stems = obj.value.split('|').map(str::to_string).collect(),
                "gloss" => glosses = obj.value.split('|').map(str::to_string).collect(),
                "gramm" => gramms = obj.value.split('|').map(str::to_string).collect(),
                _ => new_data.push(obj.clone()),
            }
        }
        if glosses.len() == 1 && stems.len() > 1 {
            glosses = vec![glosses[0].clone(); stems.len()];
        }
        if gramms.len() == 1 && stems.len() > 1 {
            gramms = vec![gramms[0].clone(); stems.len()];
        }
        if glosses.len() != stems.len() || gramms.len() != stems.len() {
            log.report_with(
                GrammarError::DerivationVariantMismatch {
                    stem: stems.join("|"),
                    gloss: glosses.join("|"),
                    gramm: gramms.join("|"),
                },
                Some(descr),
            );
            return;
        }
        for (i_stem, ((stem, gloss), gramm)) in
            stems.iter().zip(&glosses).zip(&gramms).enumerate()
        {
            for stem_var in stem.split("//") {
                let template = deriv_stem_to_template(stem_var);
                let mut replace_grammar = true;
                let mut gramm = gramm.clone();
                if gramm.starts_with('+') || gramm.is_empty() {
                    replace_grammar = false;
                    gramm = gramm.chars().skip(1).collect();
                }
                let mut content = new_data.clone();
                if !gloss.is_empty() {
                    content.push(Descriptor::leaf("gloss", gloss.clone()));
                }
                content.push(Descriptor::leaf("gramm", gramm));
                let flex_descr = Descriptor::node("flex", template, content);
                let mut flex = Inflexion::from_descriptor(&flex_descr, log);
                flex.pass_stem_num = false;
                if stems.len() > 1 {
                    flex.stem_num_out = Some(BTreeSet::from([i_stem as i32]));
                }
                flex.position = Position::NonFinal;
                flex.replace_grammar = replace_grammar;
                flex.keep_other_data = false;
                flex.start_with_self = true;
                if !flex.flex_parts[0].is_empty() {
                    flex.flex_parts[0]
                        .insert(0, InflexionPart::new("", "", GlossType::StartWithSelf));
                }
                flexes.push(flex);
            }
        }
    }

    // ------------------------------------------------------------------
    // Regex-test index
    // ------------------------------------------------------------------

    /// Build the index of all regex tests of the compiled inflexions.
    pub fn build_regex_tests(&mut self) {
        let mut map: BTreeMap<(SmolStr, String), (RegexTest, BTreeSet<usize>)> = BTreeMap::new();
        for (i, flex) in self.flex.iter().enumerate() {
            for rt in &flex.regex_tests {
                let field = if rt.field == "prev" {
                    SmolStr::new("stem")
                } else {
                    rt.field.clone()
                };
                map.entry((field, rt.pattern.clone()))
                    .or_insert_with(|| (rt.clone(), BTreeSet::new()))
                    .1
                    .insert(i);
            }
        }
        self.regex_tests = Some(map);
    }

    /// Fork a variant of the paradigm keeping only inflexions whose
    /// regex tests pass, named after the bitmask of test outcomes.
    /// Returns the fork's name and the fork itself if it is new
    /// (`None` means the paradigm has no regex tests at all).
    pub fn regex_fork(&mut self, check: &dyn Fn(&RegexTest) -> bool) -> Option<(String, Paradigm)> {
        if self.regex_tests.is_none() {
            self.build_regex_tests();
        }
        let tests = self.regex_tests.as_ref().expect("just built");
        if tests.is_empty() {
            return None;
        }
        let mut mask: u128 = 0;
        let mut to_remove: BTreeSet<usize> = BTreeSet::new();
        for (test, indices) in tests.values() {
            let ok = check(test);
            if !ok {
                to_remove.extend(indices.iter().copied());
            }
            mask = mask.wrapping_mul(2).wrapping_add(ok as u128);
        }
        let mut fork = self.clone();
        fork.name = format!("{}={}", self.name, mask);
        for i in to_remove.iter().rev() {
            fork.flex.remove(*i);
        }
        fork.regex_tests = Some(BTreeMap::new());
        for f in &mut fork.flex {
            Arc::make_mut(f).regex_tests.clear();
        }
        Some((fork.name.clone(), fork))
    }

    /// Fork a reduplication-free variant of the paradigm for the given
    /// sublexeme stem, named after the materialized segments.
    pub fn redupl_fork(&self, sublex_stem: &str, log: &ErrorLog) -> Paradigm {
        let mut fork = self.clone();
        let mut redupl_parts: Vec<String> = Vec::new();
        for flex in &mut fork.flex {
            redupl_parts.extend(Arc::make_mut(flex).simplify_redupl(sublex_stem, log));
        }
        if !redupl_parts.is_empty() {
            fork.name = format!("{}~{}", self.name, redupl_parts.join("~"));
        }
        fork.contains_reduplications = false;
        fork
    }

    // ------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------

    /// Recursively join all inflexions with their subsequent ones,
    /// within the budgets of `opts`. Links are resolved against
    /// `registry`, a pre-compilation snapshot of all paradigms.
    pub fn compile_paradigm(
        &mut self,
        registry: &IndexMap<String, Paradigm>,
        opts: &GrammarOptions,
        log: &ErrorLog,
    ) {
        let started = Instant::now();
        let short_name = short_paradigm_name(&self.name);
        let mut items: Vec<CompileItem> = self
            .flex
            .iter()
            .map(|f| CompileItem {
                infl: (**f).clone(),
                join_depth: 1,
                dict_recurs: FxHashMap::from_iter([(short_name.clone(), 1)]),
            })
            .collect();
        let mut depth: u32 = 0;
        while continue_compilation(&mut items, depth, started, opts) {
            let mut kept: Vec<CompileItem> = Vec::new();
            let mut extensions: Vec<CompileItem> = Vec::new();
            for mut item in items {
                if item.infl.subsequent.is_empty()
                    || item.infl.position == Position::Final
                    || item.infl.position == Position::Both
                {
                    let mut finalized = item.clone();
                    finalized.infl.make_final();
                    finalized.dict_recurs.clear();
                    kept.push(finalized);
                    if item.infl.subsequent.is_empty() || item.infl.position == Position::Final {
                        continue;
                    }
                }
                let flen = item.infl.get_length();
                if opts.partial_compile
                    && (flen >= opts.min_flex_length
                        || item.join_depth >= opts.deriv_limit
                        || started.elapsed() > opts.max_compile_time)
                {
                    kept.push(item);
                } else {
                    if item.join_depth >= opts.deriv_limit || flen > opts.flex_length_limit {
                        trace!(target: "uralex", flex = %item.infl.flex, "dismissed during compilation");
                        continue;
                    }
                    extensions.extend(self.extend_one(&item, registry, opts, log));
                }
            }
            let extended = !extensions.is_empty();
            kept.extend(extensions);
            items = kept;
            if !extended {
                break;
            }
            depth += 1;
        }
        // Drop hanging strictly non-final inflexions.
        items.retain(|item| {
            opts.partial_compile
                || item.infl.subsequent.is_empty()
                || matches!(item.infl.position, Position::Final | Position::Both)
        });
        self.flex = items.into_iter().map(|item| Arc::new(item.infl)).collect();
        debug!(target: "uralex", paradigm = %self.name, inflexions = self.flex.len(), "paradigm compiled");
    }

    /// Follow all links of one frontier inflexion, producing its
    /// one-step extensions.
    fn extend_one(
        &mut self,
        item: &CompileItem,
        registry: &IndexMap<String, Paradigm>,
        opts: &GrammarOptions,
        log: &ErrorLog,
    ) -> Vec<CompileItem> {
        let mut probe = item.infl.clone();
        if opts.partial_compile && probe.get_length() >= opts.min_flex_length {
            return vec![item.clone()];
        }
        let mut extensions = Vec::new();
        for link in &item.infl.subsequent {
            let short_name = short_paradigm_name(&link.name);
            let mut dict_recurs = item.dict_recurs.clone();
            let counter = dict_recurs.entry(short_name).or_insert(0);
            *counter += 1;
            if *counter > opts.recurs_limit {
                continue;
            }
            let Some(linked) = registry.get(link.name.as_str()) else {
                log.report(GrammarError::UnknownParadigm(link.name.to_string()));
                continue;
            };
            for flex_r in &linked.flex {
                if let Some((joined, counted)) =
                    join_inflexions(item.infl.clone(), flex_r, link, opts.partial_compile)
                {
                    extensions.push(CompileItem {
                        infl: joined,
                        join_depth: item.join_depth + counted as u32,
                        dict_recurs: dict_recurs.clone(),
                    });
                    if linked.contains_reduplications {
                        self.contains_reduplications = true;
                    }
                }
            }
        }
        extensions
    }
}

/// Whether the compilation loop should run another round.
fn continue_compilation(
    items: &mut [CompileItem],
    depth: u32,
    started: Instant,
    opts: &GrammarOptions,
) -> bool {
    if opts.partial_compile && started.elapsed() > opts.max_compile_time {
        return false;
    }
    if depth > opts.total_deriv_limit {
        return false;
    }
    items.iter_mut().any(|item| {
        let flen = item.infl.get_length();
        item.infl.position != Position::Final
            && item.join_depth < opts.deriv_limit
            && flen < opts.flex_length_limit
            && (!opts.partial_compile || flen < opts.min_flex_length)
    })
}

/// Join a left inflexion with an inflexion of a linked paradigm.
/// Returns the joined inflexion and whether the join consumed depth
/// budget (both sides carried surface segments), or `None` on
/// stem-number or regex disagreement.
pub(crate) fn join_inflexions(
    mut left: Inflexion,
    right: &Inflexion,
    link: &ParadigmLink,
    partial_compile: bool,
) -> Option<(Inflexion, bool)> {
    let mut right = right.clone();
    if !stem_numbers_agree(&mut left, &mut right) {
        return None;
    }
    let counted = join_regexes(&mut left, &mut right, partial_compile)?;

    // Manage the links to subsequent paradigms.
    if link.position != Position::Unspecified {
        left.position = link.position;
    } else {
        left.position = right.position;
    }
    if link.position == Position::Final {
        left.make_final();
    } else if !link.subsequent.is_empty() {
        left.subsequent = link.subsequent.clone();
    } else {
        left.subsequent = right.subsequent.clone();
    }

    // Fold the grammar and the pass-through flags.
    if right.replace_grammar {
        left.gramm = right.gramm.clone();
        left.replace_grammar = true;
    } else {
        if !left.gramm.is_empty() && !right.gramm.is_empty() {
            left.gramm.push(',');
        }
        left.gramm.push_str(&right.gramm);
    }
    if !right.keep_other_data {
        left.keep_other_data = false;
    }

    join_reduplications(&mut left, &mut right);
    let left_parts = std::mem::take(&mut left.flex_parts);
    let right_parts = std::mem::take(&mut right.flex_parts);
    left.flex_parts = join_flex_parts(left_parts, right_parts);
    left.ensure_infixes();
    left.rebuild_value();
    Some((left, counted))
}

/// Check that the stem-number fields of the two inflexions agree and
/// propagate the intersection through them.
fn stem_numbers_agree(left: &mut Inflexion, right: &mut Inflexion) -> bool {
    if let (Some(out_l), Some(num_r)) = (&left.stem_num_out, &right.stem_num) {
        let intersection: BTreeSet<i32> = out_l & num_r;
        if intersection.is_empty() {
            return false;
        }
        left.stem_num_out = Some(intersection.clone());
        right.stem_num = Some(intersection.clone());
        if right.pass_stem_num {
            right.stem_num_out = Some(intersection);
        }
    }
    if left.stem_num_out.is_none() || left.pass_stem_num {
        left.stem_num_out = right.stem_num_out.clone();
        if left.stem_num.is_none() || left.pass_stem_num {
            if right.stem_num.is_some() {
                left.stem_num = right.stem_num.clone();
            } else {
                right.stem_num = left.stem_num.clone();
            }
        }
        left.pass_stem_num = left.pass_stem_num || right.pass_stem_num;
        if left.pass_stem_num && left.stem_num.is_some() && left.stem_num_out.is_none() {
            left.stem_num_out = left.stem_num.clone();
        }
    } else if right.stem_num_out.is_some() && !right.pass_stem_num {
        left.stem_num_out = right.stem_num_out.clone();
    }
    true
}

/// Combine the regex tests of the two sides. `next*` tests of the left
/// side are evaluated against the right side; `prev*` tests of the
/// right side against the left side, or retargeted at the stem when the
/// left side is empty. Returns whether both sides carried surface
/// segments, or `None` on disagreement.
fn join_regexes(
    left: &mut Inflexion,
    right: &mut Inflexion,
    partial_compile: bool,
) -> Option<bool> {
    left.rebuild_value();
    let value_l = if left.flex_parts.len() > 1 {
        left.flex
            .rsplit_once(" + ")
            .map(|(_, tail)| tail.to_string())
            .unwrap_or_else(|| left.flex.clone())
    } else {
        left.flex.clone()
    };
    right.rebuild_value();
    let value_r = if right.flex_parts.len() > 1 {
        right
            .flex
            .split_once(" + ")
            .map(|(head, _)| head.to_string())
            .unwrap_or_else(|| right.flex.clone())
    } else {
        right.flex.clone()
    };

    let empty_l = flex_is_empty(&value_l);
    let empty_r = flex_is_empty(&value_r);

    for test in &left.regex_tests {
        if test.field == "next" {
            if !empty_r && !test.perform(&value_r) {
                return None;
            }
        } else if let Some(sub) = test.field.strip_prefix("next-") {
            if sub == "gramm" && !test.perform(&right.gramm) {
                return None;
            }
            if sub == "gloss" && !test.perform(&right.gloss) {
                return None;
            }
        }
    }
    if !empty_r {
        left.regex_tests.retain(|t| !t.field.starts_with("next"));
    }

    let mut tests_to_add: Vec<RegexTest> = Vec::new();
    for test in &right.regex_tests {
        if test.field == "prev" {
            if empty_l {
                if partial_compile {
                    tests_to_add.push(test.clone());
                } else if left
                    .regex_tests
                    .iter()
                    .all(|t| t.field != "stem" || t.pattern != test.pattern)
                {
                    tests_to_add.push(test.with_field("stem"));
                }
            } else if !test.perform(&value_l) {
                return None;
            }
        } else if let Some(sub) = test.field.strip_prefix("prev-") {
            if sub == "gramm" && !test.perform(&left.gramm) {
                return None;
            }
            if sub == "gloss" && !test.perform(&left.gloss) {
                return None;
            }
        } else if left
            .regex_tests
            .iter()
            .all(|t| t.field != test.field || t.pattern != test.pattern)
        {
            tests_to_add.push(test.clone());
        }
    }
    left.regex_tests.extend(tests_to_add);
    Some(!(empty_l || empty_r))
}

/// Merge the reduplication tables, shifting the right side's numbers
/// above the left side's.
fn join_reduplications(left: &mut Inflexion, right: &mut Inflexion) {
    if right.reduplications.is_empty() {
        return;
    }
    if !left.reduplications.is_empty() {
        let shift = left.reduplications.keys().max().copied().unwrap_or(0) + 1;
        right.reduplications = right
            .reduplications
            .iter()
            .map(|(k, v)| (k + shift, v.clone()))
            .collect();
        for group in &mut right.flex_parts {
            for fp in group {
                if matches!(
                    fp.gloss_type,
                    GlossType::ReduplRight | GlossType::ReduplLeft
                ) {
                    if let Some(num) = parse_redupl_marker(&fp.flex) {
                        fp.flex = format!("[~{}]", num + shift);
                    }
                }
            }
        }
    }
    left.reduplications.append(&mut right.reduplications);
}

/// Expand `flex` descriptors with `//` variants into one descriptor per
/// variant.
fn separate_variants(children: &[Descriptor]) -> Vec<Descriptor> {
    let mut out = Vec::new();
    for obj in children {
        if obj.name != "flex" || !obj.value.contains('/') {
            out.push(obj.clone());
        } else {
            for value in obj.value.split("//") {
                let mut variant = obj.clone();
                variant.value = value.to_string();
                out.push(variant);
            }
        }
    }
    out
}

/// Rewrite a derivational stem into an inflexion template: free dots
/// become junctions, `[.]` becomes a stem slot.
fn deriv_stem_to_template(stem_var: &str) -> String {
    let chars: Vec<char> = stem_var.chars().collect();
    let mut out = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c == '.' && chars.get(i + 1) != Some(&']') {
            out.push_str("<.>");
        } else {
            out.push(c);
        }
    }
    out.replace("[.]", ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts_full() -> GrammarOptions {
        GrammarOptions {
            partial_compile: false,
            ..GrammarOptions::default()
        }
    }

    fn noun_paradigms(log: &ErrorLog) -> IndexMap<String, Paradigm> {
        let number = Descriptor::node(
            "paradigm",
            "N-number",
            vec![
                Descriptor::node(
                    "flex",
                    ".<.>",
                    vec![
                        Descriptor::leaf("gramm", "SG"),
                        Descriptor::node("paradigm", "N-case", vec![]),
                    ],
                ),
                Descriptor::node(
                    "flex",
                    ".yos<.>",
                    vec![
                        Descriptor::leaf("gramm", "PL"),
                        Descriptor::leaf("gloss", "PL"),
                        Descriptor::node("paradigm", "N-case", vec![]),
                    ],
                ),
            ],
        );
        let case = Descriptor::node(
            "paradigm",
            "N-case",
            vec![
                Descriptor::node("flex", ".", vec![Descriptor::leaf("gramm", "NOM")]),
                Descriptor::node(
                    "flex",
                    ".len",
                    vec![
                        Descriptor::leaf("gramm", "GEN"),
                        Descriptor::leaf("gloss", "GEN"),
                    ],
                ),
            ],
        );
        let mut registry = IndexMap::new();
        for d in [number, case] {
            let p = Paradigm::from_descriptor(&d, log);
            registry.insert(p.name.clone(), p);
        }
        registry
    }

    #[test]
    fn test_paradigm_level_links_redistributed() {
        let log = ErrorLog::new();
        let d = Descriptor::node(
            "paradigm",
            "N",
            vec![
                Descriptor::node("flex", ".", vec![]),
                Descriptor::node("flex", ".yos", vec![]),
                Descriptor::node("paradigm", "N-case", vec![]),
            ],
        );
        let p = Paradigm::from_descriptor(&d, &log);
        assert_eq!(p.flex.len(), 2);
        for f in &p.flex {
            assert_eq!(f.subsequent.len(), 1);
            assert_eq!(f.subsequent[0].name, "N-case");
        }
    }

    #[test]
    fn test_variant_separation() {
        let log = ErrorLog::new();
        let d = Descriptor::node(
            "paradigm",
            "V",
            vec![Descriptor::node("flex", ".i//.y", vec![])],
        );
        let p = Paradigm::from_descriptor(&d, &log);
        assert_eq!(p.flex.len(), 2);
        assert_eq!(p.flex[0].flex, ".i");
        assert_eq!(p.flex[1].flex, ".y");
    }

    #[test]
    fn test_full_compilation_joins_linked_paradigms() {
        let log = ErrorLog::new();
        let registry = noun_paradigms(&log);
        let mut number = registry.get("N-number").unwrap().clone();
        number.compile_paradigm(&registry, &opts_full(), &log);
        assert!(log.is_empty(), "{:?}", log.entries());
        let flexes: BTreeSet<String> =
            number.flex.iter().map(|f| f.flex.clone()).collect();
        // SG+NOM, SG+GEN, PL+NOM, PL+GEN; junctions are gone
        assert_eq!(
            flexes,
            BTreeSet::from([
                ".".to_string(),
                ".len".to_string(),
                ".yos".to_string(),
                ".yos|len".to_string(),
            ])
        );
        for f in &number.flex {
            assert_eq!(f.flex_parts.len(), 1);
            assert!(f.subsequent.is_empty());
        }
    }

    #[test]
    fn test_compiled_grammar_folds() {
        let log = ErrorLog::new();
        let registry = noun_paradigms(&log);
        let mut number = registry.get("N-number").unwrap().clone();
        number.compile_paradigm(&registry, &opts_full(), &log);
        let genpl = number
            .flex
            .iter()
            .find(|f| f.flex == ".yos|len")
            .expect("joined inflexion");
        assert_eq!(genpl.gramm, "PL,GEN");
        assert_eq!(genpl.gloss, "PL");
    }

    #[test]
    fn test_recurs_limit_stops_self_link() {
        let log = ErrorLog::new();
        let d = Descriptor::node(
            "paradigm",
            "Loop",
            vec![
                Descriptor::node(
                    "flex",
                    ".a<.>",
                    vec![Descriptor::node("paradigm", "Loop", vec![])],
                ),
                Descriptor::leaf("position", "both"),
            ],
        );
        let mut p = Paradigm::from_descriptor(&d, &log);
        let mut registry = IndexMap::new();
        registry.insert(p.name.clone(), p.clone());
        let opts = GrammarOptions {
            recurs_limit: 2,
            ..opts_full()
        };
        p.compile_paradigm(&registry, &opts, &log);
        // the self-link may be followed at most once more: a, aa
        let mut lengths: Vec<usize> = p
            .flex
            .iter()
            .map(|f| {
                let mut f = (**f).clone();
                f.get_length()
            })
            .collect();
        lengths.sort_unstable();
        assert_eq!(lengths, vec![1, 2]);
    }

    #[test]
    fn test_stem_number_disagreement_rejects_join() {
        let log = ErrorLog::new();
        let left = Inflexion::from_descriptor(
            &Descriptor::node("flex", "<1>.a<.>", vec![]),
            &log,
        );
        let right =
            Inflexion::from_descriptor(&Descriptor::node("flex", "<2>.b", vec![]), &log);
        let link = ParadigmLink::simple("X");
        assert!(join_inflexions(left, &right, &link, false).is_none());
    }

    #[test]
    fn test_stem_number_intersection_propagates() {
        let log = ErrorLog::new();
        let left = Inflexion::from_descriptor(
            &Descriptor::node("flex", "<1,2>.a<.>", vec![]),
            &log,
        );
        let right = Inflexion::from_descriptor(
            &Descriptor::node("flex", "<2,3>.b", vec![]),
            &log,
        );
        let link = ParadigmLink::simple("X");
        let (joined, counted) = join_inflexions(left, &right, &link, false).unwrap();
        assert!(counted);
        assert_eq!(joined.stem_num_out, Some(BTreeSet::from([2])));
    }

    #[test]
    fn test_next_regex_gate() {
        let log = ErrorLog::new();
        let left = Inflexion::from_descriptor(
            &Descriptor::node(
                "flex",
                ".a<.>",
                vec![Descriptor::leaf("regex-next", "^b")],
            ),
            &log,
        );
        let ok = Inflexion::from_descriptor(&Descriptor::node("flex", "ba", vec![]), &log);
        let bad = Inflexion::from_descriptor(&Descriptor::node("flex", "xa", vec![]), &log);
        let link = ParadigmLink::simple("X");
        assert!(join_inflexions(left.clone(), &ok, &link, false).is_some());
        assert!(join_inflexions(left, &bad, &link, false).is_none());
    }

    #[test]
    fn test_final_link_position_finalizes() {
        let log = ErrorLog::new();
        let left = Inflexion::from_descriptor(
            &Descriptor::node("flex", ".a<.>", vec![]),
            &log,
        );
        let right = Inflexion::from_descriptor(
            &Descriptor::node(
                "flex",
                ".b<.>",
                vec![Descriptor::node("paradigm", "More", vec![])],
            ),
            &log,
        );
        let link = Arc::new(ParadigmLink {
            name: SmolStr::new("X"),
            subsequent: Vec::new(),
            position: Position::Final,
        });
        let (joined, _) = join_inflexions(left, &right, &link, false).unwrap();
        assert_eq!(joined.position, Position::Final);
        // the right side's own links are not inherited through a final link
        assert!(joined.subsequent.is_empty());
        assert_eq!(joined.flex, ".a|b<.>");
    }

    #[test]
    fn test_short_paradigm_name() {
        assert_eq!(
            short_paradigm_name("#deriv#N-fae#paradigm#Nct"),
            "#deriv#N-fae"
        );
        assert_eq!(short_paradigm_name("Nct"), "Nct");
    }

    #[test]
    fn test_regex_fork_keeps_matching_inflexions() {
        let log = ErrorLog::new();
        let d = Descriptor::node(
            "paradigm",
            "N",
            vec![
                Descriptor::node(
                    "flex",
                    ".a",
                    vec![Descriptor::leaf("regex-stem", "o$")],
                ),
                Descriptor::node("flex", ".b", vec![]),
            ],
        );
        let mut p = Paradigm::from_descriptor(&d, &log);
        let (name, fork) = p.regex_fork(&|t| t.perform("kudo")).unwrap();
        assert_eq!(name, "N=1");
        assert_eq!(fork.flex.len(), 2);
        let (name2, fork2) = p.regex_fork(&|t| t.perform("kudi")).unwrap();
        assert_eq!(name2, "N=0");
        assert_eq!(fork2.flex.len(), 1);
        assert_eq!(fork2.flex[0].flex, ".b");
    }

    #[test]
    fn test_deriv_stem_to_template() {
        assert_eq!(deriv_stem_to_template(".ate"), "<.>ate");
        assert_eq!(deriv_stem_to_template("[.]ate."), ".ate<.>");
    }
}
