//! Line-oriented constraint-file grammar: `define`, `constraint`, and
//! `outgroup` records, one per logical line. Blank lines and lines whose
//! first non-whitespace character is `*` or `#` are comments and are
//! skipped, mirroring `is_emptyline`/`getnextline` in the original file
//! reader.

use bpp_error::{BppError, BppResult, Provenance};

#[derive(Debug, Clone)]
pub enum Record {
    /// `define <alias> as <newick-expr>`
    Define {
        alias: String,
        expr: String,
        lineno: u64,
    },
    /// `constraint <newick-expr>`
    Constraint { expr: String, lineno: u64 },
    /// `outgroup <label>[,<label>...][;]`
    Outgroup { labels: Vec<String>, lineno: u64 },
}

impl Record {
    pub fn lineno(&self) -> u64 {
        match self {
            Record::Define { lineno, .. } => *lineno,
            Record::Constraint { lineno, .. } => *lineno,
            Record::Outgroup { lineno, .. } => *lineno,
        }
    }
}

fn is_comment_or_blank(line: &str) -> bool {
    match line.trim_start().chars().next() {
        None => true,
        Some('*') | Some('#') => true,
        _ => false,
    }
}

fn err(source: Option<&str>, lineno: u64, message: impl Into<String>) -> BppError {
    let at = match source {
        Some(f) => Provenance::at_line(f.to_string(), lineno),
        None => Provenance::at_line(format!("line {lineno}"), lineno),
    };
    BppError::syntax(at, message.into())
}

/// Parses a whole constraint file into its records, in file order.
pub fn parse_records(text: &str, source: Option<&str>) -> BppResult<Vec<Record>> {
    let mut records = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = (idx + 1) as u64;
        if is_comment_or_blank(raw_line) {
            continue;
        }
        let line = raw_line.trim();
        let mut words = line.splitn(2, char::is_whitespace);
        let keyword = words.next().unwrap_or_default();
        let rest = words.next().unwrap_or_default().trim();

        match keyword {
            "define" => {
                let mut parts = rest.splitn(2, char::is_whitespace);
                let alias = parts.next().unwrap_or_default().to_string();
                let remainder = parts.next().unwrap_or_default().trim_start();
                let expr = remainder
                    .strip_prefix("as")
                    .map(|s| s.trim_start())
                    .ok_or_else(|| err(source, lineno, "expected 'as' in define record"))?;
                if alias.is_empty() || expr.is_empty() {
                    return Err(err(source, lineno, "malformed define record"));
                }
                records.push(Record::Define {
                    alias,
                    expr: expr.trim_end_matches(';').trim().to_string(),
                    lineno,
                });
            }
            "constraint" => {
                if rest.is_empty() {
                    return Err(err(source, lineno, "constraint record has no expression"));
                }
                records.push(Record::Constraint {
                    expr: rest.trim_end_matches(';').trim().to_string(),
                    lineno,
                });
            }
            "outgroup" => {
                let csv = rest.trim_end_matches(';');
                let labels: Vec<String> = csv
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if labels.is_empty() {
                    return Err(err(source, lineno, "outgroup record has no labels"));
                }
                records.push(Record::Outgroup { labels, lineno });
            }
            other => {
                return Err(err(
                    source,
                    lineno,
                    format!("unrecognized record keyword '{other}'"),
                ));
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_record_kinds() {
        let text = "\
* a comment
define X as (A,B)

constraint (X,C)
outgroup D,E;
";
        let records = parse_records(text, None).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(&records[0], Record::Define { alias, expr, .. } if alias == "X" && expr == "(A,B)"));
        assert!(matches!(&records[1], Record::Constraint { expr, .. } if expr == "(X,C)"));
        assert!(matches!(&records[2], Record::Outgroup { labels, .. } if labels == &["D", "E"]));
    }

    #[test]
    fn rejects_define_without_as() {
        assert!(parse_records("define X (A,B)", None).is_err());
    }

    #[test]
    fn rejects_unknown_keyword() {
        assert!(parse_records("bogus (A,B)", None).is_err());
    }
}
