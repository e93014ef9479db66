//! Typed predicates for server-evaluated operations.
//!
//! A [`Query`] renders to the store's JSON query DSL via [`Query::to_dsl`]
//! and can also be evaluated locally with [`Query::matches`], which is what
//! the in-memory store uses. Only the subset of the DSL this crate issues is
//! modelled.

use serde_json::{json, Map, Value};

/// Suffix addressing the exact (non-analysed) variant of a text field.
pub const KEYWORD_SUFFIX: &str = ".keyword";

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    /// Field present with a non-null value.
    Exists { field: String },
    /// Exact, case-sensitive equality.
    Term { field: String, value: Value },
    Bool(BoolQuery),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
    pub minimum_should_match: Option<usize>,
}

impl Query {
    pub fn exists(field: &str) -> Self {
        Query::Exists {
            field: field.to_string(),
        }
    }

    pub fn term(field: &str, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn not(query: Query) -> Self {
        Query::Bool(BoolQuery {
            must_not: vec![query],
            ..BoolQuery::default()
        })
    }

    /// Match when at least one of `queries` matches.
    pub fn any_of(queries: Vec<Query>) -> Self {
        Query::Bool(BoolQuery {
            should: queries,
            minimum_should_match: Some(1),
            ..BoolQuery::default()
        })
    }

    pub fn to_dsl(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Exists { field } => json!({ "exists": { "field": field } }),
            Query::Term { field, value } => {
                let mut term = Map::new();
                term.insert(field.clone(), value.clone());
                json!({ "term": term })
            }
            Query::Bool(b) => {
                let mut body = Map::new();
                if !b.should.is_empty() {
                    body.insert(
                        "should".to_string(),
                        Value::Array(b.should.iter().map(Query::to_dsl).collect()),
                    );
                }
                if !b.must_not.is_empty() {
                    body.insert(
                        "must_not".to_string(),
                        Value::Array(b.must_not.iter().map(Query::to_dsl).collect()),
                    );
                }
                if let Some(min) = b.minimum_should_match {
                    body.insert("minimum_should_match".to_string(), Value::from(min));
                }
                json!({ "bool": body })
            }
        }
    }

    /// Evaluate against a document source the way the store would.
    pub fn matches(&self, source: &Map<String, Value>) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Exists { field } => match resolve(source, field) {
                None | Some(Value::Null) => false,
                Some(Value::Array(items)) => items.iter().any(|v| !v.is_null()),
                Some(_) => true,
            },
            Query::Term { field, value } => {
                let (path, keyword) = match field.strip_suffix(KEYWORD_SUFFIX) {
                    Some(base) => (base, true),
                    None => (field.as_str(), false),
                };
                match resolve(source, path) {
                    Some(Value::Array(items)) => items.iter().any(|v| term_eq(v, value, keyword)),
                    Some(v) => term_eq(v, value, keyword),
                    None => false,
                }
            }
            Query::Bool(b) => {
                if b.must_not.iter().any(|q| q.matches(source)) {
                    return false;
                }
                let required = b
                    .minimum_should_match
                    .unwrap_or(if b.should.is_empty() { 0 } else { 1 });
                let hits = b.should.iter().filter(|q| q.matches(source)).count();
                hits >= required
            }
        }
    }
}

/// Look up a dotted path, preferring a literal key containing dots.
fn resolve<'a>(source: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = source.get(path) {
        return Some(v);
    }
    let mut parts = path.split('.');
    let mut current = source.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn term_eq(actual: &Value, expected: &Value, keyword: bool) -> bool {
    if keyword {
        // keyword subfields only index strings
        return matches!((actual, expected), (Value::String(a), Value::String(e)) if a == e);
    }
    actual == expected
}
