//! Payload predicates used to refine path matches.

pub mod query_filter;

pub use query_filter::{FieldFilter, FieldOperator, FilterNode, FilterValue, QueryFilter};
