// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::form::{Item, Language, ResponseItem};
use crate::value::{Resource, Value};

pub type ScopeId = usize;
pub type ContextId = usize;

/// Selects which expression kinds are active during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvingContext {
    Population,
    Extraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExpressionKind {
    PopulationContext,
    ExtractionContext,
    InitialExpression,
    VariableExpression,
    CalculatedExpression,
    ExtractionContextId,
    Embedded,
}

impl ExpressionKind {
    /// Whether this kind may be scheduled at all in `resolving_context`:
    /// Population excludes `ExtractionContext*`; Extraction excludes
    /// `PopulationContext`/`InitialExpression`.
    pub fn permitted_in(self, resolving_context: ResolvingContext) -> bool {
        use ExpressionKind::*;
        use ResolvingContext::*;
        match (self, resolving_context) {
            (ExtractionContext | ExtractionContextId, Population) => false,
            (PopulationContext | InitialExpression, Extraction) => false,
            _ => true,
        }
    }
}

/// One occurrence of an expression.
#[derive(Debug, Clone)]
pub struct ExpressionNode {
    pub id: ContextId,
    pub name: Option<String>,
    pub text: String,
    pub language: Language,
    pub kind: ExpressionKind,
    pub scope: ScopeId,
    pub item: Option<Rc<Item>>,
    pub response_item: Option<Rc<ResponseItem>>,
    pub dependencies: BTreeSet<ContextId>,
    pub dependants: BTreeSet<ContextId>,
    pub value: Option<Vec<Value>>,
    pub source_resource: Option<Rc<Resource>>,
    pub response_dependant: bool,
    pub cloned_from: Option<ContextId>,
}

impl ExpressionNode {
    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub id: ContextId,
    pub scope: ScopeId,
    pub name: String,
    pub resource: Rc<Resource>,
}

impl LaunchContext {
    /// Builds a launch context for a caller to hand to `resolve`. `id` and
    /// `scope` are arena bookkeeping the parser assigns on installation; a
    /// caller has no use for them beforehand, so this constructor zeroes
    /// them and the parser overwrites both fields when it inserts the
    /// context into the tree.
    pub fn new(name: impl Into<String>, resource: Rc<Resource>) -> Self {
        Self {
            id: 0,
            scope: 0,
            name: name.into(),
            resource,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Context {
    Launch(LaunchContext),
    Expr(ExpressionNode),
}

impl Context {
    pub fn id(&self) -> ContextId {
        match self {
            Context::Launch(c) => c.id,
            Context::Expr(c) => c.id,
        }
    }

    pub fn scope(&self) -> ScopeId {
        match self {
            Context::Launch(c) => c.scope,
            Context::Expr(c) => c.scope,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Context::Launch(c) => Some(c.name.as_str()),
            Context::Expr(c) => c.name.as_deref(),
        }
    }

    pub fn as_expr(&self) -> Option<&ExpressionNode> {
        match self {
            Context::Expr(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_expr_mut(&mut self) -> Option<&mut ExpressionNode> {
        match self {
            Context::Expr(e) => Some(e),
            _ => None,
        }
    }

    /// Launch contexts are externally supplied and always resolved.
    pub fn is_resolved(&self) -> bool {
        match self {
            Context::Launch(_) => true,
            Context::Expr(e) => e.is_resolved(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub item: Option<Rc<Item>>,
    pub response_item: Option<Rc<ResponseItem>>,
    pub contexts: Vec<ContextId>,
}

impl Scope {
    fn root(id: ScopeId) -> Self {
        Self {
            id,
            parent: None,
            children: vec![],
            item: None,
            response_item: None,
            contexts: vec![],
        }
    }
}

/// The mutable tree of scopes, mirroring the item tree, plus the arena of all
/// contexts ever created during the pass.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    pub scopes: Vec<Scope>,
    pub contexts: Vec<Context>,
    pub root: ScopeId,
}

impl ScopeTree {
    pub fn new() -> Self {
        let root = Scope::root(0);
        Self {
            scopes: vec![root],
            contexts: vec![],
            root: 0,
        }
    }

    pub fn push_child(&mut self, parent: ScopeId, item: Option<Rc<Item>>, response_item: Option<Rc<ResponseItem>>) -> ScopeId {
        let id = self.scopes.len();
        self.scopes.push(Scope {
            id,
            parent: Some(parent),
            children: vec![],
            item,
            response_item,
            contexts: vec![],
        });
        self.scopes[parent].children.push(id);
        id
    }

    pub fn add_context(&mut self, ctx: Context) -> ContextId {
        let scope = ctx.scope();
        let id = ctx.id();
        debug_assert_eq!(id, self.contexts.len(), "context id must equal arena index");
        self.contexts.push(ctx);
        self.scopes[scope].contexts.push(id);
        id
    }

    pub fn context(&self, id: ContextId) -> &Context {
        &self.contexts[id]
    }

    pub fn context_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.contexts[id]
    }

    /// Name lookup from `scope` for `name`: the nearest ancestor context
    /// (including `scope` itself) whose name matches, searching each scope's
    /// own contexts in reverse-insertion order so a later redefinition wins.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<ContextId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            for &cid in self.scopes[s].contexts.iter().rev() {
                if self.contexts[cid].name() == Some(name) {
                    return Some(cid);
                }
            }
            current = self.scopes[s].parent;
        }
        None
    }

    /// Adds a dependency edge, maintaining the reverse `dependants` index
    /// symmetrically.
    pub fn add_dependency(&mut self, from: ContextId, on: ContextId) {
        if let Some(e) = self.contexts[from].as_expr_mut() {
            e.dependencies.insert(on);
        }
        if let Some(e) = self.contexts[on].as_expr_mut() {
            e.dependants.insert(from);
        }
    }

    pub fn all_expr_ids(&self) -> Vec<ContextId> {
        self.contexts
            .iter()
            .filter_map(|c| c.as_expr().map(|e| e.id))
            .collect()
    }

    /// Scope ids reachable from `root` by walking `children`. Fan-out
    /// replaces a scope with N clones in its parent's child list but never
    /// deletes the original from the arena, so a pre-explode scope and its
    /// contexts remain allocated but unreachable, and must be excluded from
    /// resolution bookkeeping or they get reconsidered forever.
    pub fn reachable_scopes(&self) -> std::collections::HashSet<ScopeId> {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![self.root];
        while let Some(s) = stack.pop() {
            if seen.insert(s) {
                stack.extend(self.scopes[s].children.iter().copied());
            }
        }
        seen
    }

    /// Contexts whose owning scope is reachable from root; see
    /// `reachable_scopes`.
    pub fn reachable_expr_ids(&self) -> Vec<ContextId> {
        let reachable = self.reachable_scopes();
        self.contexts
            .iter()
            .filter_map(|c| c.as_expr())
            .filter(|e| reachable.contains(&e.scope))
            .map(|e| e.id)
            .collect()
    }
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;

    fn launch(tree: &mut ScopeTree, ids: &IdAllocator, scope: ScopeId, name: &str) -> ContextId {
        let id = ids.next_id() as ContextId;
        tree.add_context(Context::Launch(LaunchContext {
            id,
            scope,
            name: name.to_string(),
            resource: Rc::new(serde_json::json!({})),
        }))
    }

    #[test]
    fn lookup_walks_to_root() {
        let mut tree = ScopeTree::new();
        let ids = IdAllocator::new();
        let root = tree.root;
        launch(&mut tree, &ids, root, "patient");
        let child = tree.push_child(root, None, None);
        assert_eq!(tree.lookup(child, "patient"), Some(0));
        assert_eq!(tree.lookup(child, "missing"), None);
    }

    #[test]
    fn nearer_definition_shadows_root() {
        let mut tree = ScopeTree::new();
        let ids = IdAllocator::new();
        let root = tree.root;
        launch(&mut tree, &ids, root, "x");
        let child = tree.push_child(root, None, None);
        let shadowed = launch(&mut tree, &ids, child, "x");
        assert_eq!(tree.lookup(child, "x"), Some(shadowed));
    }

    #[test]
    fn dependency_edges_are_symmetric() {
        let mut tree = ScopeTree::new();
        let ids = IdAllocator::new();
        let a = tree.add_context(Context::Expr(ExpressionNode {
            id: ids.next_id() as ContextId,
            name: None,
            text: "a".into(),
            language: Language::Path,
            kind: ExpressionKind::CalculatedExpression,
            scope: tree.root,
            item: None,
            response_item: None,
            dependencies: Default::default(),
            dependants: Default::default(),
            value: None,
            source_resource: None,
            response_dependant: false,
            cloned_from: None,
        }));
        let b = tree.add_context(Context::Expr(ExpressionNode {
            id: ids.next_id() as ContextId,
            name: None,
            text: "b".into(),
            language: Language::Path,
            kind: ExpressionKind::CalculatedExpression,
            scope: tree.root,
            item: None,
            response_item: None,
            dependencies: Default::default(),
            dependants: Default::default(),
            value: None,
            source_resource: None,
            response_dependant: false,
            cloned_from: None,
        }));
        tree.add_dependency(a, b);
        assert!(tree.context(a).as_expr().unwrap().dependencies.contains(&b));
        assert!(tree.context(b).as_expr().unwrap().dependants.contains(&a));
    }
}
