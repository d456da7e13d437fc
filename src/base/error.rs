//! Error reporting.
//!
//! Every defect in a grammar description is *non-fatal*: the offending
//! item is reported and skipped, and loading or parsing continues. The
//! report goes to an append-only [`ErrorLog`] shared by all components;
//! the parser itself never returns errors to its caller.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::Descriptor;

/// A recoverable defect in a grammar description or during analysis.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GrammarError {
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("no content in {item}: {detail}")]
    NoContent { item: &'static str, detail: String },

    #[error("missing obligatory fields in {0}")]
    MissingObligatoryFields(&'static str),

    #[error("duplicate {field} in {item}")]
    DuplicateField { field: &'static str, item: String },

    #[error("unknown paradigm {0}")]
    UnknownParadigm(String),

    #[error("unknown derivation {0}")]
    UnknownDerivation(String),

    #[error("unknown stem conversion {0}")]
    UnknownStemConversion(String),

    #[error("incorrect stem number in {0}")]
    BadStemNumber(String),

    #[error("invalid regex for field {field}: {pattern}")]
    BadRegex { field: String, pattern: String },

    #[error("inflexion {flex} does not match its glosses {gloss}")]
    GlossMismatch { flex: String, gloss: String },

    #[error("invalid reduplication in {0}")]
    BadReduplication(String),

    #[error("no reduplication #{id} in {flex}")]
    MissingReduplication { id: i64, flex: String },

    #[error("reduplication #{id} impossible in form {form}")]
    ReduplicationImpossible { id: i64, form: String },

    #[error("inflexion {0} is not fully compiled")]
    UncompiledInflexion(String),

    #[error("no stems available to create the lemma {0}")]
    NoStemsForLemma(String),

    #[error("exception description carries no form")]
    ExceptionWithoutForm,

    #[error("the coexist field must be yes or no")]
    BadCoexistValue,

    #[error("wrong position value: {0}")]
    BadPosition(String),

    #[error("paradigm names cannot be subject to regex tests")]
    ParadigmRegexTest,

    #[error("unrecognized field {field} in {context}")]
    UnrecognizedField { field: String, context: &'static str },

    #[error("mismatched stem/gloss/gramm variant counts in derivation (stem={stem}, gloss={gloss}, gramm={gramm})")]
    DerivationVariantMismatch {
        stem: String,
        gloss: String,
        gramm: String,
    },

    #[error("incorrect recurs_class value: {0}")]
    BadRecursClass(String),

    #[error("stem or wordform ended unexpectedly: stem={stem}, wf={wf}")]
    StemEnded { stem: String, wf: String },

    #[error("no affix index for paradigm {0}")]
    MissingAffixIndex(String),

    #[error("parsing method {0} does not use affix indexes")]
    UnsupportedMethod(String),

    #[error("{phase} must be loaded before lexemes")]
    LoadOrder { phase: &'static str },

    #[error("file {path} could not be opened")]
    FileUnreadable { path: String },

    #[error("wrong format of the frequency list {path}")]
    BadFrequencyList { path: String },
}

/// One recorded report: the error plus an optional compact rendering of
/// the offending descriptor.
#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub error: GrammarError,
    pub data: Option<String>,
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "{}: {}", self.error, data),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Append-only error sink shared by all components of a grammar.
///
/// Reporting never fails and carries no back-pressure; the log can be
/// inspected after loading or parsing to see what was skipped.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl ErrorLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record an error without structured data.
    pub fn report(&self, error: GrammarError) {
        self.report_with(error, None);
    }

    /// Record an error together with the offending descriptor.
    pub fn report_with(&self, error: GrammarError, data: Option<&Descriptor>) {
        let entry = ErrorEntry {
            data: data.map(Descriptor::compact),
            error,
        };
        tracing::warn!(target: "uralex", "{entry}");
        self.entries.lock().push(entry);
    }

    /// Snapshot of all recorded entries.
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True if any recorded entry matches the given error.
    pub fn contains(&self, error: &GrammarError) -> bool {
        self.entries.lock().iter().any(|e| &e.error == error)
    }
}
