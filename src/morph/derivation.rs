//! Derivation expansion: materializing inter-paradigm derivational
//! graphs before they are folded into paradigms.
//!
//! Derivations stay descriptor-backed while their graph is being
//! resolved (forked per paradigm, chained by recurrence class, leaves
//! extended); only then is each converted into a pseudo-paradigm whose
//! inflexions behave as derivational suffixes.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::debug;

use crate::base::{Descriptor, ErrorLog, GrammarError, GrammarOptions};

use super::paradigm::{Paradigm, short_paradigm_name};

static RX_DERIV_PARADIGM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("#deriv#paradigm#([^#]+)$").expect("static pattern"));

/// A derivation under construction: a descriptor tree plus the set of
/// derivations it must not chain into.
#[derive(Clone, Debug)]
pub struct Derivation {
    pub descr: Descriptor,
    pub restricted_derivs: FxHashSet<SmolStr>,
}

impl Derivation {
    pub fn new(descr: Descriptor) -> Self {
        Self {
            descr,
            restricted_derivs: FxHashSet::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descr.value
    }

    /// All direct properties with the given name.
    pub fn find_property<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Descriptor> {
        self.descr.children_named(name)
    }

    pub fn add_property(&mut self, name: &str, value: &str) {
        self.descr.children.push(Descriptor::leaf(name, value));
    }

    pub fn add_descr_property(&mut self, property: Descriptor) {
        self.descr.children.push(property);
    }

    pub fn del_property(&mut self, name: &str) {
        self.descr.children.retain(|obj| obj.name != name);
    }

    /// Resolve derivation-to-derivation links by copying the referenced
    /// derivation's `paradigm` properties into the link.
    pub fn build_links(&mut self, derivations: &IndexMap<String, Derivation>, log: &ErrorLog) {
        let mut new_links: Vec<Descriptor> = Vec::new();
        let links: Vec<Descriptor> = self.find_property("paradigm").cloned().collect();
        for link in links {
            if !link.value.starts_with("#deriv#") || !link.children.is_empty() {
                new_links.push(link);
                continue;
            }
            let Some(target) = derivations.get(&link.value) else {
                log.report(GrammarError::UnknownDerivation(link.value.clone()));
                continue;
            };
            let mut resolved = link.clone();
            resolved.children = target.find_property("paradigm").cloned().collect();
            new_links.push(resolved);
        }
        self.del_property("paradigm");
        for link in new_links {
            self.add_descr_property(link);
        }
    }

    /// At every paradigm leaf of the subsequent-derivation tree, graft
    /// in that paradigm's own subsequent derivations.
    pub fn extend_leaves(
        &mut self,
        derivations: &IndexMap<String, Derivation>,
        opts: &GrammarOptions,
    ) {
        let Some(c) = RX_DERIV_PARADIGM.captures(&self.descr.value) else {
            return;
        };
        let paradigm_name = c[1].to_string();
        let mut recurs_ctr: FxHashMap<SmolStr, u32> = FxHashMap::default();
        for deriv_name in &self.restricted_derivs {
            recurs_ctr.insert(deriv_name.clone(), opts.recurs_limit + 1);
        }
        let mut children = std::mem::take(&mut self.descr.children);
        extend_leaves_in(
            &mut children,
            &paradigm_name,
            &mut recurs_ctr,
            false,
            0,
            derivations,
            opts,
        );
        self.descr.children = children;
    }

    /// Convert the resolved derivation into a pseudo-paradigm.
    pub fn to_paradigm(&self, log: &ErrorLog) -> Paradigm {
        Paradigm::from_descriptor(&self.descr, log)
    }
}

/// Build the unified derivation for one paradigm: fork every linked
/// derivation, resolve recurrence classes, and register the result
/// under `#deriv#paradigm#<name>`.
pub fn deriv_for_paradigm(
    paradigm: &Paradigm,
    derivations: &mut IndexMap<String, Derivation>,
    opts: &GrammarOptions,
    log: &ErrorLog,
) {
    let mut deriv_links: FxHashMap<u32, BTreeSet<String>> = FxHashMap::default();
    let mut max_recurs_class = 0;
    for deriv_link in &paradigm.deriv_links {
        let (recurs_class, link) = split_recurs_class(deriv_link, log);
        if recurs_class > max_recurs_class {
            max_recurs_class = recurs_class;
        }
        let forked_name = fork_deriv(&link, &paradigm.name, derivations, log);
        if !forked_name.is_empty() {
            deriv_links.entry(recurs_class).or_default().insert(forked_name);
        }
    }
    handle_recurs_classes(&deriv_links, max_recurs_class, derivations, opts, log);
    let mut unified_content: Vec<Descriptor> = Vec::new();
    for names in deriv_links.values() {
        for name in names {
            unified_content.push(Descriptor::node("paradigm", name.clone(), Vec::new()));
        }
    }
    if unified_content.is_empty() {
        return;
    }
    let unified_name = format!("#deriv#paradigm#{}", paradigm.name);
    let unified = Derivation::new(Descriptor::node(
        "deriv-type",
        unified_name.clone(),
        unified_content,
    ));
    debug!(target: "uralex", derivation = %unified_name, "derivation materialized");
    derivations.insert(unified_name, unified);
}

/// Create a new derivation with customized properties on the basis of
/// an existing one; returns the name of the fork, or an empty string if
/// the base derivation does not exist.
fn fork_deriv(
    link: &Descriptor,
    paradigm_name: &str,
    derivations: &mut IndexMap<String, Derivation>,
    log: &ErrorLog,
) -> String {
    let base_name = format!("#deriv#{}", link.value);
    let Some(base) = derivations.get(&base_name) else {
        log.report(GrammarError::UnknownDerivation(link.value.clone()));
        return String::new();
    };
    let mut fork = base.clone();
    if fork.find_property("paradigm").next().is_none() {
        fork.add_property("paradigm", paradigm_name);
    }
    let override_names: BTreeSet<SmolStr> = link.children.iter().map(|o| o.name.clone()).collect();
    for name in &override_names {
        fork.del_property(name);
    }
    for obj in &link.children {
        fork.add_property(&obj.name, &obj.value);
    }
    let forked_name = format!("{}#paradigm#{}", fork.descr.value, paradigm_name);
    fork.descr.value = forked_name.clone();
    derivations.insert(forked_name.clone(), fork);
    forked_name
}

/// Split the `recurs_class` property off a derivation link.
fn split_recurs_class(link: &Descriptor, log: &ErrorLog) -> (u32, Descriptor) {
    if link.children.is_empty() {
        return (0, link.clone());
    }
    let mut recurs_class = 0;
    let mut cleaned = link.clone();
    cleaned.children.retain(|obj| {
        if obj.name != "recurs_class" {
            return true;
        }
        match obj.value.parse::<u32>() {
            Ok(n) => recurs_class = n,
            Err(_) => log.report(GrammarError::BadRecursClass(obj.value.clone())),
        }
        false
    });
    (recurs_class, cleaned)
}

/// Let derivations of a higher recurrence class chain into those of
/// strictly lower classes, rolling the accumulated links forward and
/// poisoning the restricted sets.
fn handle_recurs_classes(
    deriv_links: &FxHashMap<u32, BTreeSet<String>>,
    max_recurs_class: u32,
    derivations: &mut IndexMap<String, Derivation>,
    _opts: &GrammarOptions,
    log: &ErrorLog,
) {
    let mut links: Vec<Descriptor> = Vec::new();
    let mut restricted: FxHashSet<SmolStr> = deriv_links
        .values()
        .flatten()
        .map(|name| short_paradigm_name(name))
        .collect();
    let mut prev_links: BTreeSet<String> = BTreeSet::new();
    for recurs_class in 0..=max_recurs_class {
        let Some(cur_links) = deriv_links.get(&recurs_class) else {
            continue;
        };
        for prev in &prev_links {
            restricted.remove(&short_paradigm_name(prev));
        }
        let cur_restricted = restricted.clone();
        prev_links = cur_links.clone();
        let mut links_extension: Vec<Descriptor> = Vec::new();
        for deriv_name in cur_links {
            let Some(deriv) = derivations.get_mut(deriv_name) else {
                log.report(GrammarError::UnknownDerivation(deriv_name.clone()));
                continue;
            };
            for link in &links {
                deriv.add_descr_property(link.clone());
            }
            deriv.restricted_derivs = cur_restricted.clone();
            if recurs_class < max_recurs_class {
                let mut content: Vec<Descriptor> =
                    deriv.find_property("paradigm").cloned().collect();
                content.extend(links.iter().cloned());
                links_extension.push(Descriptor::node("paradigm", deriv_name.clone(), content));
            }
        }
        links.extend(links_extension);
    }
}

/// Walk `paradigm` entries of a derivation content tree, grafting the
/// subsequent derivations of real-paradigm leaves and bounding both the
/// per-derivation recurrence and the total depth. Leaves that exceed a
/// bound are pruned when `remove_long` is set and kept otherwise.
fn extend_leaves_in(
    data: &mut Vec<Descriptor>,
    source_paradigm: &str,
    recurs_ctr: &mut FxHashMap<SmolStr, u32>,
    remove_long: bool,
    depth: u32,
    derivations: &IndexMap<String, Derivation>,
    opts: &GrammarOptions,
) {
    let depth = depth + 1;
    let mut data_to_add: Vec<Descriptor> = Vec::new();
    for i in (0..data.len()).rev() {
        if data[i].name != "paradigm" {
            continue;
        }
        let value = data[i].value.clone();
        if value.starts_with("#deriv#") {
            let short_name = short_paradigm_name(&value);
            let counter = recurs_ctr.entry(short_name).or_insert(0);
            *counter += 1;
            if *counter > opts.recurs_limit || depth > opts.deriv_limit {
                if remove_long {
                    data.remove(i);
                }
                continue;
            }
            let Some(deriv) = derivations.get(&value) else {
                continue;
            };
            let mut next_ctr = with_restricted(recurs_ctr, &deriv.restricted_derivs, opts);
            let mut children = std::mem::take(&mut data[i].children);
            extend_leaves_in(
                &mut children,
                source_paradigm,
                &mut next_ctr,
                remove_long,
                depth,
                derivations,
                opts,
            );
            data[i].children = children;
        } else {
            if depth > opts.deriv_limit || value == source_paradigm {
                continue;
            }
            let Some(deriv) = derivations.get(&format!("#deriv#paradigm#{value}")) else {
                continue;
            };
            let mut subsequent: Vec<Descriptor> =
                deriv.find_property("paradigm").cloned().collect();
            let mut next_ctr = with_restricted(recurs_ctr, &deriv.restricted_derivs, opts);
            extend_leaves_in(
                &mut subsequent,
                source_paradigm,
                &mut next_ctr,
                true,
                depth,
                derivations,
                opts,
            );
            data_to_add.extend(subsequent);
        }
    }
    data.append(&mut data_to_add);
}

/// Copy a recurrence counter, pushing every restricted derivation past
/// the limit.
fn with_restricted(
    recurs_ctr: &FxHashMap<SmolStr, u32>,
    restricted: &FxHashSet<SmolStr>,
    opts: &GrammarOptions,
) -> FxHashMap<SmolStr, u32> {
    let mut ctr = recurs_ctr.clone();
    for name in restricted {
        ctr.insert(name.clone(), opts.recurs_limit + 1);
    }
    ctr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_derivations() -> IndexMap<String, Derivation> {
        let mut derivations = IndexMap::new();
        let attenuative = Derivation::new(Descriptor::node(
            "deriv-type",
            "#deriv#V-att",
            vec![
                Descriptor::leaf("stem", ".jal."),
                Descriptor::leaf("gramm", "+ATT"),
            ],
        ));
        derivations.insert("#deriv#V-att".to_string(), attenuative);
        derivations
    }

    fn paradigm_with_link(log: &ErrorLog) -> Paradigm {
        Paradigm::from_descriptor(
            &Descriptor::node(
                "paradigm",
                "V",
                vec![
                    Descriptor::node("flex", ".", vec![]),
                    Descriptor::node("deriv-link", "V-att", vec![]),
                ],
            ),
            log,
        )
    }

    #[test]
    fn test_fork_and_unify() {
        let log = ErrorLog::new();
        let mut derivations = base_derivations();
        let paradigm = paradigm_with_link(&log);
        deriv_for_paradigm(&paradigm, &mut derivations, &GrammarOptions::default(), &log);
        assert!(log.is_empty(), "{:?}", log.entries());
        // forked copy attached to the paradigm
        let fork = derivations
            .get("#deriv#V-att#paradigm#V")
            .expect("forked derivation");
        let paradigms: Vec<&str> = fork
            .find_property("paradigm")
            .map(|d| d.value.as_str())
            .collect();
        assert_eq!(paradigms, vec!["V"]);
        // unified derivation pointing at the fork
        let unified = derivations
            .get("#deriv#paradigm#V")
            .expect("unified derivation");
        let links: Vec<&str> = unified
            .find_property("paradigm")
            .map(|d| d.value.as_str())
            .collect();
        assert_eq!(links, vec!["#deriv#V-att#paradigm#V"]);
    }

    #[test]
    fn test_link_overrides_replace_properties() {
        let log = ErrorLog::new();
        let mut derivations = base_derivations();
        let link = Descriptor::node(
            "deriv-link",
            "V-att",
            vec![Descriptor::leaf("gramm", "+ATT2")],
        );
        let forked = fork_deriv(&link, "V", &mut derivations, &log);
        let fork = derivations.get(&forked).unwrap();
        let gramms: Vec<&str> = fork
            .find_property("gramm")
            .map(|d| d.value.as_str())
            .collect();
        assert_eq!(gramms, vec!["+ATT2"]);
    }

    #[test]
    fn test_unknown_derivation_reported() {
        let log = ErrorLog::new();
        let mut derivations = base_derivations();
        let link = Descriptor::node("deriv-link", "missing", vec![]);
        let forked = fork_deriv(&link, "V", &mut derivations, &log);
        assert!(forked.is_empty());
        assert!(log.contains(&GrammarError::UnknownDerivation("missing".into())));
    }

    #[test]
    fn test_split_recurs_class() {
        let log = ErrorLog::new();
        let link = Descriptor::node(
            "deriv-link",
            "V-att",
            vec![
                Descriptor::leaf("recurs_class", "2"),
                Descriptor::leaf("gramm", "+X"),
            ],
        );
        let (class, cleaned) = split_recurs_class(&link, &log);
        assert_eq!(class, 2);
        assert!(cleaned.child("recurs_class").is_none());
        assert!(cleaned.child("gramm").is_some());
    }

    #[test]
    fn test_extend_leaves_grafts_and_bounds() {
        let log = ErrorLog::new();
        let opts = GrammarOptions::default();
        let mut derivations = base_derivations();
        // V has a derivation leading back into paradigm W, which has its
        // own derivation; leaves of V's tree must inherit W's links.
        let v = paradigm_with_link(&log);
        let w = Paradigm::from_descriptor(
            &Descriptor::node(
                "paradigm",
                "W",
                vec![
                    Descriptor::node("flex", ".", vec![]),
                    Descriptor::node("deriv-link", "V-att", vec![]),
                ],
            ),
            &log,
        );
        deriv_for_paradigm(&v, &mut derivations, &opts, &log);
        deriv_for_paradigm(&w, &mut derivations, &opts, &log);
        // make the forked derivation for V lead into W
        derivations
            .get_mut("#deriv#V-att#paradigm#V")
            .unwrap()
            .add_property("paradigm", "W");
        let snapshot = derivations.clone();
        let unified = derivations.get_mut("#deriv#paradigm#V").unwrap();
        unified.build_links(&snapshot, &log);
        unified.extend_leaves(&snapshot, &opts);
        // the resolved link carries W as a leaf; chaining back into the
        // same derivation is blocked by the restricted set
        let link = unified
            .find_property("paradigm")
            .next()
            .expect("resolved link");
        assert_eq!(link.value, "#deriv#V-att#paradigm#V");
        let leaf_values: Vec<&str> = link.children.iter().map(|d| d.value.as_str()).collect();
        assert!(leaf_values.contains(&"W"));
        assert!(log.is_empty(), "{:?}", log.entries());
    }
}
