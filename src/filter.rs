//! Filter evaluator contract: compiles a filter expression once, then
//! evaluates the compiled program against decoded record bindings.
//!
//! The server consumes a compiled-program abstraction; it never inspects
//! expression syntax itself. `FieldEqFilter` is a reference implementation
//! exercising the contract end-to-end (conjunctions of
//! `binding.path.path == "literal"` clauses) so the rest of the crate is
//! testable without an external expression-language dependency — swap in
//! a real compiled evaluator behind `FilterProgram` for production use.

use crate::error::{ArchiveError, ArchiveResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// Variable bindings passed to a compiled program: execution-type names
/// (`taskrun`, `pipelinerun`, ...) mapped to decoded execution payloads.
/// A nil/absent field must still be bound to a zero value, never omitted,
/// so a predicate like `taskrun.status == ""` never raises.
pub type Bindings = BTreeMap<&'static str, Value>;

pub trait FilterProgram: Send + Sync {
    fn evaluate(&self, bindings: &Bindings) -> ArchiveResult<bool>;
}

/// Compiles `text` into a program, or returns invalid-argument on a
/// syntax error. An empty filter compiles to the always-true program:
/// an absent filter matches everything.
pub fn compile(text: &str) -> ArchiveResult<Box<dyn FilterProgram>> {
    if text.trim().is_empty() {
        return Ok(Box::new(AlwaysTrue));
    }
    let clauses = text
        .split("&&")
        .map(|clause| Clause::parse(clause.trim()))
        .collect::<ArchiveResult<Vec<_>>>()?;
    Ok(Box::new(FieldEqFilter { clauses }))
}

struct AlwaysTrue;
impl FilterProgram for AlwaysTrue {
    fn evaluate(&self, _bindings: &Bindings) -> ArchiveResult<bool> {
        Ok(true)
    }
}

struct Clause {
    path: Vec<String>,
    expected: String,
}

impl Clause {
    fn parse(clause: &str) -> ArchiveResult<Self> {
        let (lhs, rhs) = clause.split_once("==").ok_or_else(|| {
            ArchiveError::invalid_argument(format!("unsupported filter clause: {clause:?}"))
        })?;
        let path: Vec<String> = lhs.trim().split('.').map(|s| s.to_string()).collect();
        if path.iter().any(|segment| segment.is_empty()) {
            return Err(ArchiveError::invalid_argument(format!(
                "malformed field path in filter clause: {clause:?}"
            )));
        }
        let expected = rhs
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        Ok(Clause { path, expected })
    }

    /// Evaluates against one binding root (e.g. the value bound to
    /// `taskrun`). A missing intermediate field resolves to JSON `null`,
    /// which only matches an empty-string literal — this is what keeps
    /// `field.x == ""` from raising on an absent field.
    fn matches(&self, root: &Value) -> ArchiveResult<bool> {
        let mut current = root;
        for segment in &self.path[1..] {
            current = match current {
                Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
                Value::Null => &Value::Null,
                other => {
                    return Err(ArchiveError::invalid_argument(format!(
                        "cannot index non-object value with field {segment:?} (found {other:?})"
                    )))
                }
            };
        }
        let actual = match current {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ArchiveError::invalid_argument(format!(
                    "cannot compare non-scalar value {other:?}"
                )))
            }
        };
        Ok(actual == self.expected)
    }
}

struct FieldEqFilter {
    clauses: Vec<Clause>,
}

impl FilterProgram for FieldEqFilter {
    fn evaluate(&self, bindings: &Bindings) -> ArchiveResult<bool> {
        for clause in &self.clauses {
            let root_name = clause
                .path
                .first()
                .ok_or_else(|| ArchiveError::invalid_argument("empty field path"))?;
            let root = bindings.get(root_name.as_str()).ok_or_else(|| {
                ArchiveError::invalid_argument(format!("unbound variable: {root_name}"))
            })?;
            if !clause.matches(root)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
