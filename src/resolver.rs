// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolver loop: performs the bounded fixpoint, resolving ready `path`
//! expressions, batch-fetching ready `query` expressions, exploding on
//! fan-out, and repeating.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::error::ResolveError;
use crate::evaluator::{PathEvaluator, ScopeBindings};
use crate::fanout::{explode_extraction_context_id, explode_population, has_extraction_context_id_child};
use crate::form::Language;
use crate::ids::IdAllocator;
use crate::loader::{LoaderFacade, ResourceLoader};
use crate::scope::{ContextId, ExpressionKind, ResolvingContext, ScopeTree};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub max_rounds: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_rounds: 5 }
    }
}

enum RoundOutcome {
    /// A fan-out occurred; retry without consuming a round of the bound.
    Restarted,
    /// At least one node resolved this round.
    Progressed,
    /// Nothing resolved; the pass has stalled.
    Stalled,
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    tree: &mut ScopeTree,
    ids: &IdAllocator,
    resolving_context: ResolvingContext,
    evaluator: &dyn PathEvaluator,
    loader: &dyn ResourceLoader,
    cancel: &CancellationToken,
    config: &ResolverConfig,
    warnings: &mut Vec<String>,
) -> Result<(), ResolveError> {
    let mut loader_facade = LoaderFacade::new(loader);
    let mut round: u32 = 0;

    loop {
        if all_permitted_resolved(tree, resolving_context) {
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        if round >= config.max_rounds {
            let unresolved = count_unresolved(tree, resolving_context);
            return Err(ResolveError::Unresolvable { unresolved, rounds: round });
        }

        tracing::debug!(round, "starting resolution round");

        match run_path_phase(tree, ids, resolving_context, evaluator, warnings) {
            PathPhaseOutcome::Restarted => continue,
            PathPhaseOutcome::Progressed => {
                round += 1;
                continue;
            }
            PathPhaseOutcome::NoPathWork => {}
        }

        match run_query_phase(tree, ids, resolving_context, &mut loader_facade, cancel, warnings).await? {
            RoundOutcome::Restarted => continue,
            RoundOutcome::Progressed => round += 1,
            RoundOutcome::Stalled => {
                let unresolved = count_unresolved(tree, resolving_context);
                return Err(ResolveError::Unresolvable { unresolved, rounds: round });
            }
        }
    }
}

fn all_permitted_resolved(tree: &ScopeTree, resolving_context: ResolvingContext) -> bool {
    let reachable = tree.reachable_scopes();
    tree.contexts.iter().all(|c| match c.as_expr() {
        Some(e) if reachable.contains(&e.scope) && e.kind.permitted_in(resolving_context) => e.is_resolved(),
        _ => true,
    })
}

fn count_unresolved(tree: &ScopeTree, resolving_context: ResolvingContext) -> usize {
    let reachable = tree.reachable_scopes();
    tree.contexts
        .iter()
        .filter(|c| match c.as_expr() {
            Some(e) if reachable.contains(&e.scope) && e.kind.permitted_in(resolving_context) => !e.is_resolved(),
            _ => false,
        })
        .count()
}

fn candidates(tree: &ScopeTree, resolving_context: ResolvingContext) -> Vec<ContextId> {
    let reachable = tree.reachable_scopes();
    let mut ids: Vec<ContextId> = tree
        .contexts
        .iter()
        .filter_map(|c| {
            let e = c.as_expr()?;
            if reachable.contains(&e.scope) && e.kind.permitted_in(resolving_context) && !e.is_resolved() {
                Some(e.id)
            } else {
                None
            }
        })
        .collect();
    ids.sort_unstable();
    ids
}

fn is_ready(tree: &ScopeTree, id: ContextId) -> bool {
    let Some(e) = tree.context(id).as_expr() else {
        return false;
    };
    e.dependencies
        .iter()
        .all(|&dep| tree.context(dep).is_resolved())
}

enum PathPhaseOutcome {
    Restarted,
    Progressed,
    NoPathWork,
}

fn run_path_phase(
    tree: &mut ScopeTree,
    ids: &IdAllocator,
    resolving_context: ResolvingContext,
    evaluator: &dyn PathEvaluator,
    warnings: &mut Vec<String>,
) -> PathPhaseOutcome {
    let ready: Vec<ContextId> = candidates(tree, resolving_context)
        .into_iter()
        .filter(|&id| {
            tree.context(id).as_expr().map(|e| e.language) == Some(Language::Path) && is_ready(tree, id)
        })
        .collect();

    let mut progressed = false;

    for id in ready {
        // Skip if a prior iteration already resolved this via a rewrite (embedded splice).
        if tree.context(id).is_resolved() {
            continue;
        }

        let (text, scope) = {
            let e = tree.context(id).as_expr().unwrap();
            (e.text.clone(), e.scope)
        };
        let bindings = ScopeBindings { tree, scope };
        let Some(result) = evaluator.evaluate(&text, &bindings) else {
            continue;
        };

        if result.values.is_empty() {
            set_value(tree, id, vec![]);
            progressed = true;
            continue;
        }

        let kind = tree.context(id).as_expr().unwrap().kind;

        if kind == ExpressionKind::Embedded && result.values.len() == 1 {
            let element = result.values[0].clone();
            set_value(tree, id, vec![element.clone()]);
            rewrite_query_dependants(tree, id, &text, &element);
            progressed = true;
            continue;
        }

        if kind == ExpressionKind::Embedded && result.values.len() > 1 {
            let message = format!(
                "embedded expression `{text}` produced {} results; no substitution applied",
                result.values.len()
            );
            tracing::warn!(expression = %text, count = result.values.len(), "embedded expression produced more than one result; no substitution applied");
            warnings.push(message);
            set_value(tree, id, result.values);
            progressed = true;
            continue;
        }

        if result.values.len() == 1 {
            if let Some(answers) = response_item_override(&result.values[0]) {
                set_value(tree, id, answers);
                progressed = true;
                continue;
            }
        }

        if result.values.len() > 1 && result.values.iter().all(|v| v.as_resource().is_some()) {
            if explode_population(tree, ids, scope, id, &result.values) {
                return PathPhaseOutcome::Restarted;
            }
            warnings.push(format!("expression `{text}` cannot fan out: its scope is the root"));
            continue;
        }

        if let Some(resource) = result.source_resource {
            if let Some(e) = tree.context_mut(id).as_expr_mut() {
                e.source_resource = Some(resource);
            }
        }
        set_value(tree, id, result.values);
        progressed = true;
    }

    if progressed {
        PathPhaseOutcome::Progressed
    } else {
        PathPhaseOutcome::NoPathWork
    }
}

fn set_value(tree: &mut ScopeTree, id: ContextId, values: Vec<Value>) {
    if let Some(e) = tree.context_mut(id).as_expr_mut() {
        e.value = Some(values);
    }
}

/// `response-item value`: a single non-primitive result that is itself a
/// response item (carries FHIR-QuestionnaireResponseItem-shaped `answer`)
/// rather than an external resource. Stores the item's answer values instead
/// of the item itself.
fn response_item_override(value: &Value) -> Option<Vec<Value>> {
    let resource = value.as_resource()?;
    let answers = resource.get("answer")?.as_array()?;
    Some(
        answers
            .iter()
            .filter_map(|a| a.get("value"))
            .map(Value::from_json)
            .collect(),
    )
}

/// Rewrites every query-language dependant's text, replacing the literal
/// `{{<expression>}}` occurrence with the textual rendering of `element`.
fn rewrite_query_dependants(tree: &mut ScopeTree, embedded: ContextId, embedded_text: &str, element: &Value) {
    let needle = format!("{{{{{embedded_text}}}}}");
    let replacement = element.to_string();

    let dependants: Vec<ContextId> = match tree.context(embedded).as_expr() {
        Some(e) => e.dependants.iter().copied().collect(),
        None => vec![],
    };

    for dep_id in dependants {
        if let Some(e) = tree.context_mut(dep_id).as_expr_mut() {
            if e.language == Language::Query {
                e.text = e.text.replace(&needle, &replacement);
            }
        }
    }
}

async fn run_query_phase(
    tree: &mut ScopeTree,
    ids: &IdAllocator,
    resolving_context: ResolvingContext,
    loader: &mut LoaderFacade<'_>,
    cancel: &CancellationToken,
    warnings: &mut Vec<String>,
) -> Result<RoundOutcome, ResolveError> {
    let ready: Vec<ContextId> = candidates(tree, resolving_context)
        .into_iter()
        .filter(|&id| {
            tree.context(id).as_expr().map(|e| e.language) == Some(Language::Query) && is_ready(tree, id)
        })
        .collect();

    if ready.is_empty() {
        return Ok(RoundOutcome::Stalled);
    }

    let mut by_url: BTreeMap<String, Vec<ContextId>> = BTreeMap::new();
    for &id in &ready {
        let text = tree.context(id).as_expr().unwrap().text.clone();
        by_url.entry(text).or_default().push(id);
    }
    let urls: Vec<String> = by_url.keys().cloned().collect();

    if cancel.is_cancelled() {
        return Err(ResolveError::Cancelled);
    }

    let fetched = loader.fetch_all(&urls, cancel).await?;

    let mut progressed = false;
    for (url, expr_ids) in by_url {
        let Some(resources) = fetched.get(&url) else {
            continue;
        };

        if resources.len() > 1 && expr_ids.len() > 1 {
            let first_scope = tree.context(expr_ids[0]).as_expr().unwrap().scope;
            let fanout_scope = tree.scopes[first_scope].parent.unwrap_or(tree.root);

            if resolving_context == ResolvingContext::Extraction && has_extraction_context_id_child(tree, fanout_scope) {
                if explode_extraction_context_id(tree, fanout_scope, resources.as_slice()) {
                    return Ok(RoundOutcome::Restarted);
                }
                warnings.push(format!("query `{url}` cannot rehydrate by extraction context id: fan-out scope is the root"));
                continue;
            }

            // No shared extraction-context-id sibling: these expressions are
            // independent query nodes that happen to share a url. Fan out the
            // first one's own scope via population-style cloning rather than
            // rehydrating a group, so the round always makes progress instead
            // of restarting with no effect.
            let values: Vec<Value> = resources.iter().map(Value::from_json).collect();
            if explode_population(tree, ids, first_scope, expr_ids[0], &values) {
                return Ok(RoundOutcome::Restarted);
            }
            warnings.push(format!("query `{url}` cannot fan out: its scope is the root"));
            continue;
        }

        let values: Vec<Value> = resources.iter().map(Value::from_json).collect();
        let source_resource = match resources.as_slice() {
            [single] => Some(std::rc::Rc::new(single.clone())),
            _ => None,
        };
        for id in expr_ids {
            set_value(tree, id, values.clone());
            if let Some(resource) = &source_resource {
                if let Some(e) = tree.context_mut(id).as_expr_mut() {
                    e.source_resource = Some(resource.clone());
                }
            }
            progressed = true;
        }
    }

    if progressed {
        Ok(RoundOutcome::Progressed)
    } else {
        Ok(RoundOutcome::Stalled)
    }
}
