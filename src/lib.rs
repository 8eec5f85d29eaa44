// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `formscope` resolves the expressions attached to a hierarchical form (a
//! FHIR Questionnaire and, optionally, a QuestionnaireResponse) into values,
//! in dependency order, fanning out repeating scopes as resolved results
//! demand it. See `DESIGN.md` for how each piece is grounded.

mod cycles;
mod error;
mod evaluator;
mod extensions;
mod fanout;
mod form;
mod graph;
mod ids;
pub mod loader;
mod parser;
mod resolver;
mod scope;
mod value;

pub use error::{LoaderError, ResolveError};
pub use evaluator::{PathEvaluator, ScopeBindings, SimplePathEvaluator, VariableBindings};
pub use form::{Answer, Extension, ExtensionValue, Form, Item, ItemType, Language, Response, ResponseItem};
pub use loader::{LoaderFacade, ResourceLoader};
pub use resolver::ResolverConfig;
pub use scope::{ContextId, ExpressionKind, LaunchContext, ResolvingContext, ScopeId, ScopeTree};
pub use value::{EvalResult, Resource, Value};

use tokio_util::sync::CancellationToken;

/// The outcome of a successful resolution pass: the fully resolved graph plus
/// any non-fatal diagnostics collected along the way.
#[derive(Debug)]
pub struct ResolveOutcome {
    pub tree: ScopeTree,
    pub warnings: Vec<String>,
}

/// Resolves `form` (plus an optional `response` driving repetition and
/// response-dependent expressions) against `launch_contexts`, using
/// `loader` for `query` expressions and `evaluator` for `path` expressions.
///
/// Runs the full pipeline: parse, build the dependency graph, detect cycles,
/// then resolve to a bounded fixpoint.
#[allow(clippy::too_many_arguments)]
pub async fn resolve(
    form: &Form,
    response: Option<&Response>,
    launch_contexts: Vec<LaunchContext>,
    loader: &dyn ResourceLoader,
    evaluator: &dyn PathEvaluator,
    resolving_context: ResolvingContext,
    cancel: &CancellationToken,
    config: &ResolverConfig,
) -> Result<ResolveOutcome, ResolveError> {
    let ids = ids::IdAllocator::new();
    let mut warnings = vec![];

    let mut tree = parser::Parser::new(&ids, resolving_context).parse(form, response, launch_contexts, &mut warnings);

    {
        let expr_ids = tree.all_expr_ids();
        let mut builder = graph::GraphBuilder::new(&mut tree, &ids);
        for id in expr_ids {
            builder.process(id);
        }
        warnings.extend(builder.warnings);
    }

    if let Some(cycle) = cycles::detect(&tree) {
        let var = cycle
            .first()
            .and_then(|&id| tree.context(id).name())
            .unwrap_or("<unnamed>")
            .to_string();
        return Err(ResolveError::Cycle {
            var,
            cycle: cycle.iter().map(|&id| id as u64).collect(),
        });
    }

    resolver::run(
        &mut tree,
        &ids,
        resolving_context,
        evaluator,
        loader,
        cancel,
        config,
        &mut warnings,
    )
    .await?;

    Ok(ResolveOutcome { tree, warnings })
}
