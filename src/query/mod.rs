//! # Query Advisory
//!
//! Turns immutable predicate trees into index-range advices. See
//! [`optimizer::determine_index_to_use`] for the selection rules and
//! [`sortable`] for how string comparisons map onto `i64` key ranges.

pub mod advice;
pub mod expr;
pub mod optimizer;
pub mod sortable;

pub use advice::QueryAdvice;
pub use expr::{CompOp, FieldIndexes, IndexHandle, QueryNode, QueryTerm, QueryValue};
pub use optimizer::determine_index_to_use;
