// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fan-out (explode): replacing a scope with N clones once a repeating
//! source resolves to N elements.

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Context as _;

use crate::ids::IdAllocator;
use crate::scope::{Context, ContextId, ExpressionKind, ExpressionNode, LaunchContext, ScopeId, ScopeTree};
use crate::value::{Resource, Value};

/// Population mode: deep-clone `scope` once per element of `values`,
/// setting the value of the node that triggered fan-out (identified in each
/// clone via `clonedFrom`) to the singleton `[element]`, then replaces
/// `scope` in its parent's child list with the N clones in order.
///
/// Forbidden at the root: logs and returns `false` without effect, leaving
/// the triggering expression unresolved so it surfaces as `Unresolvable` at
/// pass end rather than retried. Returns `true` when the clones were made.
pub fn explode_population(tree: &mut ScopeTree, ids: &IdAllocator, scope: ScopeId, trigger: ContextId, values: &[Value]) -> bool {
    if scope == tree.root {
        tracing::warn!(scope, "fan-out forbidden at root scope; expression remains unresolved");
        return false;
    }

    let (parent, position) = locate_in_parent(tree, scope).expect("fan-out invariant violated");

    // `clone_scope_recursive` calls `push_child`, which appends each new scope
    // to `parent`'s children as a side effect; collect them and then splice
    // them into `position`, replacing the original, rather than leaving them
    // appended at the tail.
    let mut new_children = vec![];
    for value in values {
        let mut id_map = HashMap::new();
        let new_scope = clone_scope_recursive(tree, ids, scope, parent, &mut id_map);
        rewire_internal_edges(tree, &id_map);

        if let Some(&new_trigger) = id_map.get(&trigger) {
            let resource = match value {
                Value::Resource(rc) => Some(rc.clone()),
                _ => None,
            };
            if let Some(e) = tree.context_mut(new_trigger).as_expr_mut() {
                e.value = Some(vec![value.clone()]);
                e.source_resource = resource;
            }
        }
        new_children.push(new_scope);
    }

    tree.scopes[parent].children.remove(position);
    let appended_at = tree.scopes[parent].children.len() - new_children.len();
    tree.scopes[parent].children.truncate(appended_at);
    for (offset, child) in new_children.into_iter().enumerate() {
        tree.scopes[parent].children.insert(position + offset, child);
    }
    true
}

/// Extraction-context-id mode: `scope`'s children mirror the same repeating
/// form item, one per response repetition. For each, evaluate (read) its
/// `ExtractionContextId` value, already resolved by an earlier round since
/// path expressions resolve before query expressions within a round, to get
/// a key, find the matching resource by `id` in `resources`, or manufacture
/// an empty instance of the expected type, and attach it as the value of
/// that child's `ExtractionContext` node.
///
/// Applies only when at least one child actually carries an
/// `ExtractionContextId`; returns whether it found one and did any work.
pub fn explode_extraction_context_id(tree: &mut ScopeTree, scope: ScopeId, resources: &[Resource]) -> bool {
    if scope == tree.root {
        tracing::warn!(scope, "fan-out forbidden at root scope; expression remains unresolved");
        return false;
    }

    let children = tree.scopes[scope].children.clone();
    let mut did_work = false;
    for child in children {
        let Some(key) = extraction_context_id_value(tree, child) else {
            continue;
        };

        let found = resources
            .iter()
            .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(key.as_str()))
            .cloned();

        let resource = match found {
            Some(r) => r,
            None => manufacture_empty_resource(tree, child),
        };

        set_extraction_context_value(tree, child, resource);
        did_work = true;
    }
    did_work
}

/// Whether any child of `scope` carries an `ExtractionContextId` node, i.e.
/// whether `explode_extraction_context_id` applies to this scope group at
/// all rather than being a no-op.
pub fn has_extraction_context_id_child(tree: &ScopeTree, scope: ScopeId) -> bool {
    tree.scopes[scope].children.iter().any(|&child| {
        tree.scopes[child].contexts.iter().any(|&cid| {
            matches!(
                tree.context(cid).as_expr(),
                Some(e) if e.kind == ExpressionKind::ExtractionContextId
            )
        })
    })
}

fn extraction_context_id_value(tree: &ScopeTree, scope: ScopeId) -> Option<String> {
    tree.scopes[scope].contexts.iter().find_map(|&cid| {
        let e = tree.context(cid).as_expr()?;
        if e.kind != ExpressionKind::ExtractionContextId {
            return None;
        }
        e.value.as_ref()?.first()?.as_str().map(str::to_string)
    })
}

fn manufacture_empty_resource(tree: &ScopeTree, scope: ScopeId) -> Resource {
    let resource_type = tree.scopes[scope]
        .contexts
        .iter()
        .find_map(|&cid| {
            let e = tree.context(cid).as_expr()?;
            if e.kind != ExpressionKind::ExtractionContext {
                return None;
            }
            Some(e.text.split('?').next().unwrap_or_default().to_string())
        })
        .unwrap_or_default();
    serde_json::json!({ "resourceType": resource_type })
}

fn set_extraction_context_value(tree: &mut ScopeTree, scope: ScopeId, resource: Resource) {
    let target = tree.scopes[scope].contexts.iter().copied().find(|&cid| {
        matches!(
            tree.context(cid).as_expr(),
            Some(e) if e.kind == ExpressionKind::ExtractionContext
        )
    });
    if let Some(cid) = target {
        let rc = Rc::new(resource);
        if let Some(e) = tree.context_mut(cid).as_expr_mut() {
            e.value = Some(vec![Value::Resource(rc.clone())]);
            e.source_resource = Some(rc);
        }
    }
}

/// Asserts the structural invariant fan-out depends on: a non-root scope
/// always has a parent, and it always appears in that parent's child list.
/// Both can only fail if the arena has been corrupted elsewhere, so this is
/// an internal "should never happen" check (`anyhow`, not a public
/// `ResolveError` variant); the caller `.expect()`s the result.
fn locate_in_parent(tree: &ScopeTree, scope: ScopeId) -> anyhow::Result<(ScopeId, usize)> {
    let parent = tree.scopes[scope]
        .parent
        .with_context(|| format!("scope {scope} has no parent but is not root"))?;
    let position = tree.scopes[parent]
        .children
        .iter()
        .position(|&c| c == scope)
        .with_context(|| format!("scope {scope} is not a child of its recorded parent {parent}"))?;
    Ok((parent, position))
}

fn clone_scope_recursive(
    tree: &mut ScopeTree,
    ids: &IdAllocator,
    scope: ScopeId,
    new_parent: ScopeId,
    id_map: &mut HashMap<ContextId, ContextId>,
) -> ScopeId {
    let (item, response_item, context_ids, children) = {
        let s = &tree.scopes[scope];
        (
            s.item.clone(),
            s.response_item.clone(),
            s.contexts.clone(),
            s.children.clone(),
        )
    };

    let new_scope = tree.push_child(new_parent, item, response_item);

    for old_cid in context_ids {
        let new_cid = clone_context_shell(tree, ids, old_cid, new_scope);
        id_map.insert(old_cid, new_cid);
    }

    for child in children {
        clone_scope_recursive(tree, ids, child, new_scope, id_map);
    }

    new_scope
}

fn clone_context_shell(tree: &mut ScopeTree, ids: &IdAllocator, old_cid: ContextId, new_scope: ScopeId) -> ContextId {
    let new_id = ids.next_id() as ContextId;
    let new_ctx = match tree.context(old_cid) {
        Context::Launch(l) => Context::Launch(LaunchContext {
            id: new_id,
            scope: new_scope,
            name: l.name.clone(),
            resource: l.resource.clone(),
        }),
        Context::Expr(e) => Context::Expr(ExpressionNode {
            id: new_id,
            name: e.name.clone(),
            text: e.text.clone(),
            language: e.language,
            kind: e.kind,
            scope: new_scope,
            item: e.item.clone(),
            response_item: e.response_item.clone(),
            dependencies: Default::default(),
            dependants: Default::default(),
            value: e.value.clone(),
            source_resource: e.source_resource.clone(),
            response_dependant: e.response_dependant,
            cloned_from: Some(old_cid),
        }),
    };
    tree.add_context(new_ctx)
}

/// Rewrites dependency edges of every newly-cloned context: targets inside
/// the subtree redirect to the corresponding clone; targets outside remain
/// pointing at the unchanged external originals. Since `add_dependency`
/// maintains `dependants` symmetrically, a cloned dependant automatically
/// ends up depending on the new expression instead of the original exactly
/// when both are in `id_map`, so the rewiring rule falls out of this without
/// extra bookkeeping.
fn rewire_internal_edges(tree: &mut ScopeTree, id_map: &HashMap<ContextId, ContextId>) {
    for (&old_cid, &new_cid) in id_map {
        let old_deps: Vec<ContextId> = match tree.context(old_cid) {
            Context::Expr(e) => e.dependencies.iter().copied().collect(),
            Context::Launch(_) => vec![],
        };
        for old_dep in old_deps {
            let target = id_map.get(&old_dep).copied().unwrap_or(old_dep);
            tree.add_dependency(new_cid, target);
        }
    }
}
