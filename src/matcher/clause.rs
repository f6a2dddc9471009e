// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single path-segment matchers.
//!
//! Clause syntax, applied to one node name:
//!
//! | form          | meaning                                            |
//! |---------------|----------------------------------------------------|
//! | `room1`       | exactly `room1`                                    |
//! | `a,b,c`       | any of the listed names                            |
//! | `*`           | any name                                           |
//! | `msg*`, `r?`  | glob: `*` any run of chars, `?` exactly one char   |
//! | `<3-7,10>`    | name's leading integer lies in one of the ranges   |
//! | `~...`        | negation of the rest of the clause                 |
//! | `\x`          | `x` taken literally                                |
//!
//! Every other character is literal. Only plain names and comma lists
//! (without negation) can be resolved by direct child lookup; everything
//! else needs a scan over all children.

use std::fmt;
use std::ops::RangeInclusive;

use regex::Regex;

use crate::error::{ReflectError, Result};

#[derive(Debug, Clone)]
enum ClauseKind {
    Any,
    Literal(String),
    /// Deduplicated, in first-seen order
    LiteralSet(Vec<String>),
    Glob(Regex),
    Range(Vec<RangeInclusive<u64>>),
}

#[derive(Debug, Clone)]
pub struct ClauseMatcher {
    source: String,
    kind: ClauseKind,
    negate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    Star,
    Question,
    Comma,
}

impl ClauseMatcher {
    pub fn parse(clause: &str) -> Result<Self> {
        if clause.is_empty() {
            return Err(ReflectError::BadArgument("empty path clause".to_string()));
        }
        let (negate, body) = match clause.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, clause),
        };

        let kind = match parse_ranges(body)? {
            Some(ranges) => ClauseKind::Range(ranges),
            None => classify(tokenize(body))?,
        };
        Ok(Self { source: clause.to_string(), kind, negate })
    }

    /// The clause as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        let hit = match &self.kind {
            ClauseKind::Any => true,
            ClauseKind::Literal(lit) => lit == name,
            ClauseKind::LiteralSet(set) => set.iter().any(|l| l == name),
            ClauseKind::Glob(re) => re.is_match(name),
            ClauseKind::Range(ranges) => leading_integer(name).is_some_and(|v| ranges.iter().any(|r| r.contains(&v))),
        };
        hit != self.negate
    }

    /// The exact names this clause accepts, when it can be resolved by
    /// direct lookup.
    pub fn literals(&self) -> Option<&[String]> {
        if self.negate {
            return None;
        }
        match &self.kind {
            ClauseKind::Literal(lit) => Some(std::slice::from_ref(lit)),
            ClauseKind::LiteralSet(set) => Some(set),
            _ => None,
        }
    }

    /// True if more than one distinct name could match.
    pub fn is_multi_valued(&self) -> bool {
        self.literals().is_none_or(|l| l.len() > 1)
    }
}

impl PartialEq for ClauseMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for ClauseMatcher {}

impl fmt::Display for ClauseMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn tokenize(body: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            // A trailing backslash stands for itself
            '\\' => Token::Char(chars.next().unwrap_or('\\')),
            '*' => Token::Star,
            '?' => Token::Question,
            ',' => Token::Comma,
            other => Token::Char(other),
        });
    }
    tokens
}

fn classify(tokens: Vec<Token>) -> Result<ClauseKind> {
    if tokens == [Token::Star] {
        return Ok(ClauseKind::Any);
    }

    let alternatives: Vec<&[Token]> = tokens.split(|t| *t == Token::Comma).collect();
    let has_wildcard = tokens.iter().any(|t| matches!(t, Token::Star | Token::Question));

    if !has_wildcard {
        let mut names: Vec<String> = Vec::with_capacity(alternatives.len());
        for alt in &alternatives {
            let name: String = alt
                .iter()
                .filter_map(|t| match t {
                    Token::Char(c) => Some(*c),
                    _ => None,
                })
                .collect();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        return Ok(match names.len() {
            1 => ClauseKind::Literal(names.remove(0)),
            _ => ClauseKind::LiteralSet(names),
        });
    }

    let mut expr = String::from("^(?:");
    for (i, alt) in alternatives.iter().enumerate() {
        if i > 0 {
            expr.push('|');
        }
        for t in alt.iter() {
            match t {
                Token::Star => expr.push_str(".*"),
                Token::Question => expr.push('.'),
                Token::Char(c) => expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
                Token::Comma => {}
            }
        }
    }
    expr.push_str(")$");

    Regex::new(&expr)
        .map(ClauseKind::Glob)
        .map_err(|e| ReflectError::BadArgument(format!("glob compiles to invalid regex: {e}")))
}

/// `<lo-hi,n,lo-,-hi>` ranges. Returns `None` if the body isn't a range
/// expression at all.
fn parse_ranges(body: &str) -> Result<Option<Vec<RangeInclusive<u64>>>> {
    let Some(inner) = body.strip_prefix('<').and_then(|b| b.strip_suffix('>')) else {
        return Ok(None);
    };
    let bound = |s: &str, default: u64| -> Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(default);
        }
        s.parse()
            .map_err(|_| ReflectError::BadArgument(format!("bad range bound '{s}' in '{body}'")))
    };

    let mut ranges = Vec::new();
    for part in inner.split(',') {
        let range = match part.split_once('-') {
            Some((lo, hi)) => bound(lo, 0)?..=bound(hi, u64::MAX)?,
            None => {
                let v = bound(part, 0)?;
                v..=v
            }
        };
        ranges.push(range);
    }
    Ok(Some(ranges))
}

/// Value of the digits a name starts with. Names not starting with a digit
/// have no value and never fall inside a range.
fn leading_integer(name: &str) -> Option<u64> {
    let end = name.find(|c: char| !c.is_ascii_digit()).unwrap_or(name.len());
    if end == 0 {
        return None;
    }
    Some(name[..end].parse().unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> ClauseMatcher {
        ClauseMatcher::parse(s).unwrap()
    }

    #[test]
    fn test_literal() {
        let c = m("room1");
        assert!(c.matches("room1"));
        assert!(!c.matches("room10"));
        assert_eq!(c.literals().unwrap(), ["room1"]);
        assert!(!c.is_multi_valued());
    }

    #[test]
    fn test_dot_and_dash_are_literal() {
        let c = m("a.b-c");
        assert!(c.matches("a.b-c"));
        assert!(!c.matches("axb-c"));
        assert!(c.literals().is_some());
    }

    #[test]
    fn test_literal_set_dedups() {
        let c = m("a,b,a");
        assert!(c.matches("a") && c.matches("b"));
        assert!(!c.matches("a,b"));
        assert_eq!(c.literals().unwrap(), ["a", "b"]);
        assert!(c.is_multi_valued());
    }

    #[test]
    fn test_star_and_glob() {
        assert!(m("*").matches("anything"));
        assert!(m("*").literals().is_none());
        let g = m("msg*");
        assert!(g.matches("msg") && g.matches("msg42"));
        assert!(!g.matches("xmsg"));
        let q = m("r?");
        assert!(q.matches("r1"));
        assert!(!q.matches("r") && !q.matches("r12"));
    }

    #[test]
    fn test_glob_with_alternatives() {
        let c = m("a*,b");
        assert!(c.matches("abc") && c.matches("b"));
        assert!(!c.matches("bc"));
    }

    #[test]
    fn test_regex_metachars_are_literal() {
        let c = m("a(b)+[c]");
        assert!(c.matches("a(b)+[c]"));
        assert!(!c.matches("abc"));
        assert!(m("x|y*").matches("x|yz"));
    }

    #[test]
    fn test_escapes() {
        let c = m("a\\*");
        assert!(c.matches("a*"));
        assert!(!c.matches("ab"));
        assert_eq!(c.literals().unwrap(), ["a*"]);
        assert!(m("a\\,b").matches("a,b"));
        assert!(m("\\<1-2>").matches("<1-2>"));
        assert!(m("trailing\\").matches("trailing\\"));
    }

    #[test]
    fn test_negation() {
        let c = m("~room1");
        assert!(!c.matches("room1"));
        assert!(c.matches("room2"));
        assert!(c.literals().is_none());
        assert!(!m("~*").matches("x"));
    }

    #[test]
    fn test_ranges() {
        let c = m("<3-5,10,20->");
        assert!(c.matches("3") && c.matches("5") && c.matches("10") && c.matches("999"));
        assert!(!c.matches("6") && !c.matches("11"));
        assert!(c.matches("4abc"));
        assert!(!c.matches("abc"));
        assert!(m("<-2>").matches("0"));
        assert!(m("~<1-2>").matches("abc"));
    }

    #[test]
    fn test_bad_clauses() {
        assert!(ClauseMatcher::parse("").is_err());
        assert!(ClauseMatcher::parse("<a-b>").is_err());
    }
}
