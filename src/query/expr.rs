//! Predicate trees the optimizer consumes.
//!
//! A query arrives as an immutable tree of AND/OR nodes over comparison
//! terms. Each term names a field, a comparison operator and a literal or
//! parameter placeholder. The optimizer walks the tree without mutating it;
//! parameters are resolved against a caller-supplied slice at
//! optimization time.

use hashbrown::HashMap;

/// Opaque handle to an index registered for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHandle(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Long(i64),
    Str(String),
    /// Placeholder resolved against the parameter slice by position.
    Param(usize),
}

impl QueryValue {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// String starts-with; brackets to a sortable key range.
    StrPrefix,
    /// Regex match; usable only when the pattern has a fixed prefix.
    StrMatches,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryTerm {
    pub field: String,
    pub op: CompOp,
    pub value: QueryValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Term(QueryTerm),
    And(Box<QueryNode>, Box<QueryNode>),
    Or(Box<QueryNode>, Box<QueryNode>),
}

impl QueryNode {
    pub fn term(field: impl Into<String>, op: CompOp, value: QueryValue) -> Self {
        Self::Term(QueryTerm {
            field: field.into(),
            op,
            value,
        })
    }

    pub fn and(self, other: QueryNode) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: QueryNode) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }
}

/// Which fields carry an index, and under which handle.
#[derive(Debug, Clone, Default)]
pub struct FieldIndexes {
    fields: HashMap<String, IndexHandle>,
}

impl FieldIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, handle: IndexHandle) {
        self.fields.insert(field.into(), handle);
    }

    pub fn handle_for(&self, field: &str) -> Option<IndexHandle> {
        self.fields.get(field).copied()
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}
