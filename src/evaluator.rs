// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use crate::scope::{ContextId, ScopeId, ScopeTree};
use crate::value::{EvalResult, Value};

/// The variable-binding environment a `path` expression evaluates against:
/// the scope it was found in, walking toward the root for name lookup.
pub trait VariableBindings {
    fn lookup(&self, name: &str) -> Option<ContextId>;
    fn value_of(&self, context: ContextId) -> Option<&[Value]>;
    fn resource_of(&self, context: ContextId) -> Option<&serde_json::Value>;
}

pub struct ScopeBindings<'a> {
    pub tree: &'a ScopeTree,
    pub scope: ScopeId,
}

impl<'a> VariableBindings for ScopeBindings<'a> {
    fn lookup(&self, name: &str) -> Option<ContextId> {
        self.tree.lookup(self.scope, name)
    }

    fn value_of(&self, context: ContextId) -> Option<&[Value]> {
        match self.tree.context(context) {
            crate::scope::Context::Expr(e) => e.value.as_deref(),
            crate::scope::Context::Launch(_) => None,
        }
    }

    fn resource_of(&self, context: ContextId) -> Option<&serde_json::Value> {
        match self.tree.context(context) {
            crate::scope::Context::Launch(l) => Some(l.resource.as_ref()),
            crate::scope::Context::Expr(e) => e.source_resource.as_deref(),
        }
    }
}

/// Pure function from expression text + bindings to a result.
/// The core never evaluates `path` text itself; it delegates here. `None`
/// means "the evaluator declined" (e.g. an unresolved variable reference),
/// distinct from a resolved-but-empty `Some(EvalResult::default())`.
pub trait PathEvaluator {
    fn evaluate(&self, text: &str, bindings: &dyn VariableBindings) -> Option<EvalResult>;
}

/// A small reference evaluator for the `path` language used by this crate's
/// own tests: `%var` optionally followed by `.field.field2...` dotted
/// property access into the referenced context's resource or value list.
/// Real callers are expected to supply a richer evaluator (e.g. FHIRPath);
/// this one exists purely so the pipeline is exercisable end-to-end.
#[derive(Debug, Default)]
pub struct SimplePathEvaluator;

impl PathEvaluator for SimplePathEvaluator {
    fn evaluate(&self, text: &str, bindings: &dyn VariableBindings) -> Option<EvalResult> {
        let tokens = crate::graph::tokenize_path(text);
        let mut tokens = tokens.into_iter();
        let head = tokens.next()?;
        let var = head.strip_prefix('%')?;
        let context = bindings.lookup(var)?;

        let fields: Vec<String> = tokens.collect();

        if let Some(resource) = bindings.resource_of(context) {
            let mut current = resource;
            for field in &fields {
                current = current.get(field)?;
            }
            return Some(values_from_json(current));
        }

        if fields.is_empty() {
            if let Some(values) = bindings.value_of(context) {
                return Some(EvalResult {
                    values: values.to_vec(),
                    source_resource: None,
                });
            }
        }

        None
    }
}

fn values_from_json(v: &serde_json::Value) -> EvalResult {
    match v {
        serde_json::Value::Array(items) => EvalResult {
            values: items.iter().map(Value::from_json).collect(),
            source_resource: None,
        },
        serde_json::Value::Object(_) => EvalResult {
            values: vec![Value::from_json(v)],
            source_resource: Some(Rc::new(v.clone())),
        },
        scalar => EvalResult {
            values: vec![Value::from_json(scalar)],
            source_resource: None,
        },
    }
}
