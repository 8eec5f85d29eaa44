// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::rc::Rc;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A resource fetched by the loader or embedded in a launch context.
///
/// Resources are arbitrary JSON; the core never interprets their shape, only
/// hands them to the `path`/`query` evaluators and the loader.
pub type Resource = serde_json::Value;

/// One base value produced by resolving a `path` expression.
///
/// We can't reuse `serde_json::Value` directly: base values must be
/// `Eq`/`Ord` so they can be deduplicated and compared in tests and in
/// fan-out bookkeeping, while a `Resource` stays arbitrary, un-ordered JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(OrderedFloat<f64>),
    String(Rc<str>),
    /// A full resource, produced when a path expression resolves to an
    /// entire object (e.g. `%context` inside an extraction-context-id
    /// rehydration) rather than a scalar field.
    Resource(Rc<Resource>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Value::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                Value::Number(OrderedFloat(n.as_f64().unwrap_or(f64::NAN)))
            }
            serde_json::Value::String(s) => Value::String(Rc::from(s.as_str())),
            other => Value::Resource(Rc::new(other.clone())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", n.0),
            Value::String(s) => write!(f, "{s}"),
            Value::Resource(r) => write!(f, "{r}"),
        }
    }
}

/// The result of evaluating one `path` expression.
///
/// Distinguishing "no result" (`None`, returned by the evaluator trait) from
/// "an empty result" (`Some(EvalResult { values: vec![], .. })`) matters: the
/// resolver records `null` for the latter but treats the node as unresolved
/// (evaluator declined) for the former.
#[derive(Debug, Clone, Default)]
pub struct EvalResult {
    pub values: Vec<Value>,
    pub source_resource: Option<Rc<Resource>>,
}
