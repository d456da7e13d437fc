//! Parse states: the backtracking points of the token-level search.

use std::rc::Rc;
use std::sync::Arc;

use smol_str::SmolStr;

use crate::morph::{Inflexion, ParadigmLink};

/// Reference to a sublexeme inside the grammar's lexeme registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubLexKey {
    pub lex: u32,
    pub sub: u32,
}

/// One open inflexion level: the inflexion being matched, the link it
/// was reached through, and the cursor inside its parts.
#[derive(Clone, Debug)]
pub struct InflLevel {
    pub infl: Arc<Inflexion>,
    pub para_link: Option<Arc<ParadigmLink>>,
    pub cur_part: usize,
    pub cur_pos: usize,
}

/// A point in the investigation of one candidate stem: the matched
/// window, the cursors into the token and the stem, and the stack of
/// open inflexion levels. Cloned at every branch of the search.
#[derive(Clone, Debug)]
pub struct ParseState {
    /// The token, as characters. Shared between all branches.
    pub wf: Rc<Vec<char>>,
    pub sl: SubLexKey,
    /// The sublexeme's stem, as characters. Shared between branches.
    pub stem: Rc<Vec<char>>,
    /// Start of the matched window in the token.
    pub wf_corr_start: usize,
    /// Start of the matched window in the stem; may be `-1` when the
    /// matched substring is not literally present in the stem.
    pub stem_corr_start: isize,
    /// Length of the matched window.
    pub corr_length: usize,
    pub cur_stem_pos: usize,
    pub cur_pos: usize,
    /// `-1` = the stem level; `>= 0` indexes into `infl_levels`.
    pub cur_level: i32,
    pub infl_levels: Vec<InflLevel>,
    /// Names of derivation paradigms entered on this branch.
    pub derivs_used: Vec<SmolStr>,
}

impl ParseState {
    pub fn new(
        wf: Rc<Vec<char>>,
        sl: SubLexKey,
        stem: Rc<Vec<char>>,
        wf_corr_start: usize,
        stem_corr_start: isize,
        corr_length: usize,
    ) -> Self {
        Self {
            wf,
            sl,
            stem,
            wf_corr_start,
            stem_corr_start,
            corr_length,
            cur_stem_pos: 0,
            cur_pos: 0,
            cur_level: -1,
            infl_levels: Vec::new(),
            derivs_used: Vec::new(),
        }
    }

    /// Branch off this state with one more open inflexion level.
    pub fn with_pushed_level(
        &self,
        infl: Arc<Inflexion>,
        para_link: Option<Arc<ParadigmLink>>,
        cur_level: i32,
        deriv_entered: Option<SmolStr>,
    ) -> ParseState {
        let mut branched = self.clone();
        branched.cur_level = cur_level;
        branched.infl_levels.push(InflLevel {
            infl,
            para_link,
            cur_part: 0,
            cur_pos: 0,
        });
        if let Some(deriv) = deriv_entered {
            branched.derivs_used.push(deriv);
        }
        branched
    }
}
