// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered-index delta tokens.
//!
//! Changes to a node's ordered index are reported to subscribers as compact
//! string tokens of the form `<op><index>:<childName>`:
//!
//! | op  | meaning                                              |
//! |-----|------------------------------------------------------|
//! | `c` | index cleared (no position or name)                  |
//! | `i` | `name` inserted at `index`                           |
//! | `r` | `name` removed from `index`                          |
//! | `m` | `name` moved; it now sits at `index`                 |
//!
//! Applying the token stream for a node, in order, to an empty sequence
//! reproduces that node's index exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ReflectError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    Cleared,
    Inserted { index: usize, name: String },
    Removed { index: usize, name: String },
    Moved { index: usize, name: String },
}

impl IndexOp {
    pub fn op_char(&self) -> char {
        match self {
            Self::Cleared => 'c',
            Self::Inserted { .. } => 'i',
            Self::Removed { .. } => 'r',
            Self::Moved { .. } => 'm',
        }
    }

    /// Apply this delta to a replica of an ordered index.
    pub fn apply(&self, seq: &mut Vec<String>) -> Result<()> {
        match self {
            Self::Cleared => seq.clear(),
            Self::Inserted { index, name } => {
                if *index > seq.len() {
                    return Err(out_of_range(self, seq.len()));
                }
                seq.insert(*index, name.clone());
            }
            Self::Removed { index, name } => {
                if seq.get(*index) != Some(name) {
                    return Err(ReflectError::LogicError(format!(
                        "index token '{self}' does not match entry {:?}",
                        seq.get(*index)
                    )));
                }
                seq.remove(*index);
            }
            Self::Moved { index, name } => {
                let from = seq
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| ReflectError::NotFound(format!("index entry '{name}'")))?;
                let entry = seq.remove(from);
                if *index > seq.len() {
                    seq.insert(from, entry);
                    return Err(out_of_range(self, seq.len()));
                }
                seq.insert(*index, entry);
            }
        }
        Ok(())
    }
}

fn out_of_range(op: &IndexOp, len: usize) -> ReflectError {
    ReflectError::LogicError(format!("index token '{op}' out of range for length {len}"))
}

/// Apply a token stream in order.
pub fn apply_all<'a>(seq: &mut Vec<String>, ops: impl IntoIterator<Item = &'a IndexOp>) -> Result<()> {
    for op in ops {
        op.apply(seq)?;
    }
    Ok(())
}

/// Tokens that rebuild `names` from scratch on a replica: a clear, then
/// one insert per entry.
pub fn replay(names: Vec<String>) -> Vec<IndexOp> {
    std::iter::once(IndexOp::Cleared)
        .chain(names.into_iter().enumerate().map(|(index, name)| IndexOp::Inserted { index, name }))
        .collect()
}

impl fmt::Display for IndexOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleared => write!(f, "c"),
            Self::Inserted { index, name }
            | Self::Removed { index, name }
            | Self::Moved { index, name } => write!(f, "{}{}:{}", self.op_char(), index, name),
        }
    }
}

impl FromStr for IndexOp {
    type Err = ReflectError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || ReflectError::BadArgument(format!("malformed index token '{s}'"));
        let mut chars = s.chars();
        let op = chars.next().ok_or_else(bad)?;
        if op == 'c' {
            return Ok(Self::Cleared);
        }
        let (index, name) = chars.as_str().split_once(':').ok_or_else(bad)?;
        let index: usize = index.parse().map_err(|_| bad())?;
        let name = name.to_string();
        match op {
            'i' => Ok(Self::Inserted { index, name }),
            'r' => Ok(Self::Removed { index, name }),
            'm' => Ok(Self::Moved { index, name }),
            _ => Err(bad()),
        }
    }
}

impl Serialize for IndexOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IndexOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(serde::de::Error::custom)
    }
}
