//! Shared toy-grammar builders for the integration tests.
#![allow(dead_code)]

use uralex::base::Descriptor;
use uralex::{Grammar, GrammarOptions, GrammarSources, Parser, ParsingMethod};

/// The seed noun grammar: paradigm `Nct` with a bare form and a plural,
/// lexeme `pi` "child".
pub fn noun_paradigms() -> Vec<Descriptor> {
    vec![Descriptor::node(
        "paradigm",
        "Nct",
        vec![
            Descriptor::node("flex", ".", vec![]),
            Descriptor::node(
                "flex",
                ".yos",
                vec![
                    Descriptor::leaf("gramm", "NOM,PL"),
                    Descriptor::leaf("gloss", "PL"),
                ],
            ),
        ],
    )]
}

pub fn noun_lexemes() -> Vec<Descriptor> {
    vec![Descriptor::node(
        "lexeme",
        "",
        vec![
            Descriptor::leaf("lex", "pi"),
            Descriptor::leaf("stem", "pi."),
            Descriptor::leaf("paradigm", "Nct"),
            Descriptor::leaf("gramm", "N"),
            Descriptor::leaf("gloss", "child"),
        ],
    )]
}

pub fn additive_clitic() -> Vec<Descriptor> {
    vec![Descriptor::node(
        "clitic",
        "",
        vec![
            Descriptor::leaf("lex", "no"),
            Descriptor::leaf("type", "en"),
            Descriptor::leaf("gramm", "ptcl"),
            Descriptor::leaf("gloss", "ADD"),
        ],
    )]
}

/// Compile a grammar from the given sources, asserting it loads clean.
pub fn compiled(sources: GrammarSources<'_>, options: GrammarOptions) -> Grammar {
    let mut grammar = Grammar::load(sources, options);
    grammar.compile();
    assert!(
        grammar.log.is_empty(),
        "grammar did not load clean: {:?}",
        grammar.log.entries()
    );
    grammar
}

/// A ready parser over the grammar, with all indexes filled.
pub fn parser(grammar: &Grammar, method: ParsingMethod) -> Parser<'_> {
    let mut parser = Parser::new(grammar, method);
    parser.fill_stems();
    if method == ParsingMethod::Fst {
        parser.fill_affixes();
    }
    parser
}
