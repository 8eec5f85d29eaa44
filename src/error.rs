// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Error returned by a [`crate::loader::ResourceLoader`] implementation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct LoaderError(pub String);

/// Fatal conditions the resolver can terminate a pass with. Parse warnings
/// are non-fatal and never constructed as this type; they are logged
/// (`tracing::warn!`) and collected into `ResolveOutcome::warnings`.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// A cycle was found in the expression dependency graph during graph
    /// build, before any resolution was attempted.
    #[error("dependency cycle detected for variable `{var}`: {cycle:?}")]
    Cycle { var: String, cycle: Vec<u64> },

    /// The bounded fixpoint finished (or gave up early) with unresolved
    /// permitted nodes remaining.
    #[error("resolution did not converge: {unresolved} node(s) remain unresolved after {rounds} round(s)")]
    Unresolvable { unresolved: usize, rounds: u32 },

    /// The cancellation token fired between rounds.
    #[error("resolution was cancelled")]
    Cancelled,

    /// Propagated from the loader.
    #[error("resource loader failed: {0}")]
    Loader(#[from] LoaderError),
}
