//! Reduplication: a named replacement pipeline applied to the substring
//! on one side of a `[~k]` marker.

use std::sync::LazyLock;

use regex::Regex;

use crate::base::{Descriptor, ErrorLog, GrammarError};

static RX_SHORT_REPL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^(.*?) *-> *(.*)$").expect("static pattern"));

/// Which side of the marker gets reduplicated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduplSide {
    Left,
    Right,
}

/// One ordered regex replacement, written either in the short form
/// `what -> with` or as explicit `what`/`with` children.
#[derive(Clone, Debug)]
pub struct Replacement {
    pub what: String,
    pub with: String,
    rx: Regex,
}

impl Replacement {
    pub fn from_descriptor(descr: &Descriptor, log: &ErrorLog) -> Self {
        let (what, with) = if !descr.value.is_empty() {
            match RX_SHORT_REPL.captures(&descr.value) {
                Some(c) => (c[1].to_string(), c[2].to_string()),
                None => {
                    log.report(GrammarError::MalformedDescriptor(format!(
                        "wrong replacement description: {}",
                        descr.value
                    )));
                    ("^$".to_string(), String::new())
                }
            }
        } else {
            let mut what = String::new();
            let mut with = String::new();
            for obj in &descr.children {
                match obj.name.as_str() {
                    "what" => what = obj.value.clone(),
                    "with" => with = obj.value.clone(),
                    _ => log.report_with(
                        GrammarError::UnrecognizedField {
                            field: obj.name.to_string(),
                            context: "a replacement description",
                        },
                        Some(obj),
                    ),
                }
            }
            (what, with)
        };
        Self::new(what, with, log)
    }

    pub fn new(what: String, with: String, log: &ErrorLog) -> Self {
        let rx = match Regex::new(&what) {
            Ok(rx) => rx,
            Err(_) => {
                log.report(GrammarError::BadRegex {
                    field: "replace".to_string(),
                    pattern: what.clone(),
                });
                Regex::new("^$").expect("static pattern")
            }
        };
        Self { what, with, rx }
    }

    /// Apply the replacement to every match in `s`.
    pub fn convert(&self, s: &str) -> String {
        self.rx.replace_all(s, self.with.as_str()).into_owned()
    }
}

/// A replacement pipeline plus the side it applies to.
#[derive(Clone, Debug)]
pub struct Reduplication {
    pub replacements: Vec<Replacement>,
    pub side: ReduplSide,
}

impl Reduplication {
    /// Build from the children of a `redupl` descriptor.
    pub fn from_children(children: &[Descriptor], log: &ErrorLog) -> Self {
        let mut replacements = Vec::new();
        let mut side = ReduplSide::Right;
        for obj in children {
            match obj.name.as_str() {
                "side" => match obj.value.as_str() {
                    "right" => side = ReduplSide::Right,
                    "left" => side = ReduplSide::Left,
                    _ => log.report_with(
                        GrammarError::MalformedDescriptor(format!(
                            "unrecognized reduplication side: {}",
                            obj.value
                        )),
                        Some(obj),
                    ),
                },
                "replace" => replacements.push(Replacement::from_descriptor(obj, log)),
                _ => log.report_with(
                    GrammarError::UnrecognizedField {
                        field: obj.name.to_string(),
                        context: "a reduplication description",
                    },
                    Some(obj),
                ),
            }
        }
        Self { replacements, side }
    }

    /// Run the pipeline left to right over `s`.
    pub fn perform(&self, s: &str) -> String {
        let mut s = s.to_string();
        for repl in &self.replacements {
            s = repl.convert(&s);
        }
        s
    }
}
