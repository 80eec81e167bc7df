//! Newick parsing and export.
//!
//! A single recursive-descent parser produces a generic, arbitrary-arity
//! [`RawNode`] tree; [`crate::tree::species`], [`crate::tree::gene`], and
//! [`crate::tree::nary`] each convert that shape into their own arena,
//! differing only in whether a non-leaf is required to have exactly two
//! children (species/gene trees) or may have any number (the n-ary
//! constraint-parse tree). Labels are restricted exactly as `spec.md` §6
//! describes: non-empty ASCII, no parentheses, commas, semicolons, or
//! whitespace. Quoted labels and NHX comments are not part of this grammar.

use bpp_error::{BppError, BppResult, Provenance};

#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub label: Option<String>,
    pub branch_length: Option<f64>,
    pub children: Vec<RawNode>,
}

impl RawNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u64,
    source: Option<&'a str>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, source: Option<&'a str>) -> Self {
        Parser {
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            source,
        }
    }

    fn err(&self, message: impl Into<String>) -> BppError {
        let at = match self.source {
            Some(file) => Provenance::at_line(file.to_string(), self.line),
            None => Provenance::none(),
        };
        BppError::syntax(at, message.into())
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: u8) -> BppResult<()> {
        self.skip_ws();
        match self.bump() {
            Some(b) if b == expected => Ok(()),
            Some(b) => Err(self.err(format!(
                "expected '{}', found '{}'",
                expected as char, b as char
            ))),
            None => Err(self.err(format!("expected '{}', found end of input", expected as char))),
        }
    }

    fn is_label_byte(b: u8) -> bool {
        !(b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b',' | b';' | b':'))
    }

    fn parse_label(&mut self) -> Option<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if Self::is_label_byte(b)) {
            self.bump();
        }
        if self.pos == start {
            None
        } else {
            Some(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
        }
    }

    fn parse_branch_length(&mut self) -> BppResult<Option<f64>> {
        self.skip_ws();
        if self.peek() != Some(b':') {
            return Ok(None);
        }
        self.bump();
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-')) {
            self.bump();
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
        text.parse::<f64>()
            .map(Some)
            .map_err(|_| self.err(format!("invalid branch length '{text}'")))
    }

    fn parse_subtree(&mut self) -> BppResult<RawNode> {
        self.skip_ws();
        let children = if self.peek() == Some(b'(') {
            self.bump();
            let mut kids = vec![self.parse_subtree()?];
            self.skip_ws();
            while self.peek() == Some(b',') {
                self.bump();
                kids.push(self.parse_subtree()?);
                self.skip_ws();
            }
            self.expect(b')')?;
            kids
        } else {
            Vec::new()
        };

        self.skip_ws();
        let label = self.parse_label();
        if children.is_empty() && label.is_none() {
            return Err(self.err("expected a tip label"));
        }
        let branch_length = self.parse_branch_length()?;

        Ok(RawNode {
            label,
            branch_length,
            children,
        })
    }

    fn parse_tree(&mut self) -> BppResult<RawNode> {
        let root = self.parse_subtree()?;
        self.skip_ws();
        if self.peek() == Some(b';') {
            self.bump();
        }
        self.skip_ws();
        if self.pos != self.bytes.len() {
            return Err(self.err("trailing characters after ';'"));
        }
        Ok(root)
    }
}

/// Parses a Newick string into a generic tree. `source` is used only to
/// label diagnostics (pass `None` for an in-memory string with no file of
/// origin, e.g. a constraint-record tree expression).
pub fn parse(text: &str, source: Option<&str>) -> BppResult<RawNode> {
    if text.trim().is_empty() {
        return Err(BppError::syntax(
            source
                .map(|f| Provenance::at_line(f.to_string(), 1))
                .unwrap_or_else(Provenance::none),
            "empty Newick string",
        ));
    }
    Parser::new(text, source).parse_tree()
}

/// Serializes a generic tree back to Newick, with a caller-supplied label
/// formatter for each node (species/gene trees use this to print tip labels
/// only, or include internal annotations such as constraint ids).
pub fn write<F>(root: &RawNode, label_of: &F) -> String
where
    F: Fn(&RawNode) -> String,
{
    let mut out = String::new();
    write_node(root, label_of, &mut out);
    out.push(';');
    out
}

fn write_node<F>(node: &RawNode, label_of: &F, out: &mut String)
where
    F: Fn(&RawNode) -> String,
{
    if !node.children.is_empty() {
        out.push('(');
        for (i, child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(child, label_of, out);
        }
        out.push(')');
    }
    out.push_str(&label_of(node));
    if let Some(bl) = node.branch_length {
        out.push(':');
        out.push_str(&format!("{bl}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_quartet() {
        let t = parse("((A,B),(C,D));", None).unwrap();
        assert_eq!(t.children.len(), 2);
        assert_eq!(t.children[0].children[0].label.as_deref(), Some("A"));
    }

    #[test]
    fn parses_branch_lengths() {
        let t = parse("(A:1.5,B:2.0):0.0;", None).unwrap();
        assert_eq!(t.branch_length, Some(0.0));
        assert_eq!(t.children[0].branch_length, Some(1.5));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("(A,B);extra", None).is_err());
    }

    #[test]
    fn rejects_empty_input() {
        assert!(parse("", None).is_err());
    }

    #[test]
    fn roundtrips_through_write() {
        let t = parse("((A,B),(C,D));", None).unwrap();
        let s = write(&t, &|n| n.label.clone().unwrap_or_default());
        let reparsed = parse(&s, None).unwrap();
        assert_eq!(t, reparsed);
    }
}
