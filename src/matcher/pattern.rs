//! Parsed subscription paths.

use std::fmt;

use super::clause::ClauseMatcher;
use crate::error::{ReflectError, Result};

/// Prefix given to patterns that don't start at the root: any host, any session.
pub const SESSION_LEVEL_PREFIX: &str = "/*/*/";

/// A `/`-separated sequence of [`ClauseMatcher`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    /// Normalized text, also the registry key
    source: String,
    clauses: Vec<ClauseMatcher>,
}

impl PathPattern {
    /// Parse a pattern anchored at the namespace root.
    ///
    /// Patterns without a leading `/` are taken relative to session level,
    /// so `room1/*` means `/*/*/room1/*`.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = Self::normalize(raw)?;
        let clauses = parse_clauses(&normalized[1..], raw)?;
        Ok(Self { source: normalized, clauses })
    }

    /// Parse a pattern anchored at an arbitrary traversal root (no leading
    /// `/`, no session-level prefix).
    pub fn parse_relative(raw: &str) -> Result<Self> {
        if raw.starts_with('/') {
            return Err(ReflectError::BadArgument(format!(
                "pattern '{raw}' must be relative here"
            )));
        }
        let clauses = parse_clauses(raw, raw)?;
        Ok(Self { source: raw.to_string(), clauses })
    }

    /// Normalized absolute form of `raw`.
    pub fn normalize(raw: &str) -> Result<String> {
        if raw.is_empty() {
            return Err(ReflectError::BadArgument("empty pattern".to_string()));
        }
        Ok(if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("{SESSION_LEVEL_PREFIX}{raw}")
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn clauses(&self) -> &[ClauseMatcher] {
        &self.clauses
    }

    /// Number of clauses (= how many levels below the traversal root a
    /// matching node sits).
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Match against the node names of a path, root excluded.
    pub fn matches_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        let mut clauses = self.clauses.iter();
        for name in names {
            match clauses.next() {
                Some(c) if c.matches(name) => {}
                _ => return false,
            }
        }
        clauses.next().is_none()
    }

    /// Match against an absolute path such as `/host/session/a`.
    pub fn matches_path(&self, path: &str) -> bool {
        match path.strip_prefix('/') {
            Some(rest) => self.matches_names(rest.split('/')),
            None => false,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_clauses(body: &str, raw: &str) -> Result<Vec<ClauseMatcher>> {
    if body.is_empty() {
        return Err(ReflectError::BadArgument(format!("pattern '{raw}' has no clauses")));
    }
    body.split('/')
        .map(|clause| {
            ClauseMatcher::parse(clause)
                .map_err(|e| ReflectError::BadArgument(format!("pattern '{raw}': {e}")))
        })
        .collect()
}
