//! Wildcard path patterns and the traversal that resolves them.

mod clause;
mod path_matcher;
mod pattern;
mod traversal;

pub use clause::ClauseMatcher;
pub use path_matcher::{PathMatcher, PatternEntry, PutOutcome, SubscriptionRegistry};
pub use pattern::{PathPattern, SESSION_LEVEL_PREFIX};
pub use traversal::{TraversalMode, TraversalOutcome, Visit};
