//! Descriptor tree: the common currency between grammar loaders and
//! domain objects.
//!
//! A grammar source file is parsed (outside this crate) into a tree of
//! `{name, value, children}` records; every domain object knows how to
//! build itself from such a record.

use smol_str::SmolStr;

/// One record of a grammar description tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Field name (`paradigm`, `flex`, `gramm`, `regex-stem`, …).
    pub name: SmolStr,
    /// Field value; may be empty.
    pub value: String,
    /// Nested records; empty for leaf fields.
    pub children: Vec<Descriptor>,
}

impl Descriptor {
    /// Create a leaf record with no children.
    pub fn leaf(name: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            children: Vec::new(),
        }
    }

    /// Create a record with nested content.
    pub fn node(
        name: impl Into<SmolStr>,
        value: impl Into<String>,
        children: Vec<Descriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            children,
        }
    }

    /// First child with the given name, if any.
    pub fn child(&self, name: &str) -> Option<&Descriptor> {
        self.children.iter().find(|d| d.name == name)
    }

    /// All children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Descriptor> {
        self.children.iter().filter(move |d| d.name == name)
    }

    /// Names of all children, for obligatory-field checks.
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|d| d.name.as_str())
    }

    /// A compact single-line rendering, truncated to 200 characters.
    /// Used as the structured payload of error reports.
    pub fn compact(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        if out.chars().count() > 200 {
            let mut truncated: String = out.chars().take(200).collect();
            truncated.push('…');
            return truncated;
        }
        out
    }

    fn render(&self, out: &mut String) {
        out.push_str(&self.name);
        if !self.value.is_empty() {
            out.push_str(": ");
            out.push_str(&self.value);
        }
        if !self.children.is_empty() {
            out.push_str(" {");
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    out.push_str("; ");
                }
                child.render(out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_lookup() {
        let d = Descriptor::node(
            "lexeme",
            "",
            vec![
                Descriptor::leaf("lex", "pi"),
                Descriptor::leaf("stem", "pi."),
                Descriptor::leaf("paradigm", "Nct"),
            ],
        );
        assert_eq!(d.child("stem").map(|c| c.value.as_str()), Some("pi."));
        assert!(d.child("missing").is_none());
        assert_eq!(d.children_named("lex").count(), 1);
    }

    #[test]
    fn test_compact_truncates() {
        let long = Descriptor::leaf("flex", "a".repeat(400));
        let compact = long.compact();
        assert!(compact.chars().count() <= 201);
        assert!(compact.ends_with('…'));
    }

    #[test]
    fn test_compact_renders_nested() {
        let d = Descriptor::node("flex", ".yos", vec![Descriptor::leaf("gramm", "PL")]);
        assert_eq!(d.compact(), "flex: .yos {gramm: PL}");
    }
}
