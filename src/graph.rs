// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Graph builder: scans expression text for variable references and
//! embedded expressions and wires dependency edges.

use std::rc::Rc;

use crate::form::{Item, Language};
use crate::ids::IdAllocator;
use crate::scope::{Context, ContextId, ExpressionKind, ExpressionNode, ScopeId, ScopeTree};

/// Variables that refer to the response-relative environment rather than to
/// another context by name; a path expression using one of these is flagged
/// `response_dependant` instead of getting a normal dependency edge.
const RESPONSE_DEPENDENT_VARS: &[&str] = &["resource", "context"];

/// Splits `text` on `.` while keeping parenthesized groups intact, e.g.
/// `func(a.b).c` tokenizes as `["func(a.b)", "c"]`.
pub fn tokenize_path(text: &str) -> Vec<String> {
    let mut tokens = vec![];
    let mut current = String::new();
    let mut depth: i32 = 0;
    for ch in text.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            '.' if depth == 0 => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Collects every `%var` token appearing anywhere in `text` (including
/// within parenthesized sub-expressions tokenization preserves as one
/// token), in order of first appearance.
fn variable_references(text: &str) -> Vec<String> {
    let mut out = vec![];
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let start = i + 1;
            let mut j = start;
            while j < bytes.len()
                && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_')
            {
                j += 1;
            }
            if j > start {
                out.push(text[start..j].to_string());
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }
    out
}

/// Extracts `{{...}}`-delimited substrings from a query expression, in
/// order, along with the byte ranges they occupy in `text`.
fn embedded_spans(text: &str) -> Vec<(usize, usize, String)> {
    let mut spans = vec![];
    let mut search_from = 0;
    while let Some(start_rel) = text[search_from..].find("{{") {
        let start = search_from + start_rel;
        if let Some(end_rel) = text[start + 2..].find("}}") {
            let end = start + 2 + end_rel + 2;
            let inner = text[start + 2..start + 2 + end_rel].to_string();
            spans.push((start, end, inner));
            search_from = end;
        } else {
            break;
        }
    }
    spans
}

pub struct GraphBuilder<'a> {
    pub tree: &'a mut ScopeTree,
    pub ids: &'a IdAllocator,
    pub warnings: Vec<String>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(tree: &'a mut ScopeTree, ids: &'a IdAllocator) -> Self {
        Self { tree, ids, warnings: vec![] }
    }

    /// Processes one newly-parsed expression node: wires its dependency
    /// edges (and, for queries, splices in fresh `Embedded` nodes).
    pub fn process(&mut self, node_id: ContextId) {
        let (language, text, scope) = {
            let node = self.tree.context(node_id).as_expr().unwrap();
            (node.language, node.text.clone(), node.scope)
        };

        match language {
            Language::Query => self.process_query(node_id, &text, scope),
            Language::Path => self.process_path(node_id, &text, scope),
        }
    }

    fn process_query(&mut self, node_id: ContextId, text: &str, scope: ScopeId) {
        for (_, _, inner) in embedded_spans(text) {
            let embedded_id = self.ids.next_id() as ContextId;
            let embedded = ExpressionNode {
                id: embedded_id,
                name: None,
                text: inner,
                language: Language::Path,
                kind: ExpressionKind::Embedded,
                scope,
                item: None,
                response_item: None,
                dependencies: Default::default(),
                dependants: Default::default(),
                value: None,
                source_resource: None,
                response_dependant: false,
                cloned_from: None,
            };
            self.tree.add_context(Context::Expr(embedded));
            let embedded_text = self.tree.context(embedded_id).as_expr().unwrap().text.clone();
            self.process_path(embedded_id, &embedded_text, scope);
            self.tree.add_dependency(node_id, embedded_id);
        }
    }

    fn process_path(&mut self, node_id: ContextId, text: &str, scope: ScopeId) {
        let vars = variable_references(text);
        let mut response_dependant = false;

        for var in &vars {
            if RESPONSE_DEPENDENT_VARS.contains(&var.as_str()) {
                response_dependant = true;
                continue;
            }
            match self.tree.lookup(scope, var) {
                Some(target) => self.tree.add_dependency(node_id, target),
                None => {
                    tracing::warn!(
                        variable = %var,
                        expression = %text,
                        "unknown variable reference in path expression"
                    );
                    self.warnings.push(format!(
                        "unknown variable `{var}` referenced in expression `{text}`"
                    ));
                }
            }
        }

        if response_dependant {
            if let Some(e) = self.tree.context_mut(node_id).as_expr_mut() {
                e.response_dependant = true;
            }
            self.synthesize_response_dependency(node_id, text, scope);
        }
    }

    /// Rewrite `%resource`→`%questionnaire`, `%context`→`%qitem`, locate the
    /// target form item via that rewritten text, and depend on that item's
    /// scope's `InitialExpression` if present.
    fn synthesize_response_dependency(&mut self, node_id: ContextId, text: &str, scope: ScopeId) {
        let rewritten = text.replace("%resource", "%questionnaire").replace("%context", "%qitem");

        let Some(link_id) = locate_item_link_id(&rewritten) else {
            return;
        };

        let Some(target_scope) = find_scope_for_item(self.tree, scope, &link_id) else {
            return;
        };

        if let Some(initial_id) = self.tree.scopes[target_scope]
            .contexts
            .iter()
            .copied()
            .find(|&cid| {
                matches!(
                    self.tree.context(cid).as_expr(),
                    Some(e) if e.kind == ExpressionKind::InitialExpression
                )
            })
        {
            self.tree.add_dependency(node_id, initial_id);
        }
    }
}

/// Evaluates the synthesized `%questionnaire`/`%qitem` lookup clone
/// immediately to find the target form item. The mini-language here is
/// deliberately trivial: the rewritten text is
/// expected to end with `.linkId("<id>")` or simply name a dotted path whose
/// last segment is the link id; we take the last token as the link id.
fn locate_item_link_id(rewritten: &str) -> Option<String> {
    let tokens = tokenize_path(rewritten);
    tokens.last().map(|t| t.trim_start_matches('%').to_string())
}

fn find_scope_for_item(tree: &ScopeTree, _from: ScopeId, link_id: &str) -> Option<ScopeId> {
    fn matches(item: &Option<Rc<Item>>, link_id: &str) -> bool {
        item.as_ref().map(|i| i.link_id == link_id).unwrap_or(false)
    }
    fn search(tree: &ScopeTree, scope: ScopeId, link_id: &str) -> Option<ScopeId> {
        if matches(&tree.scopes[scope].item, link_id) {
            return Some(scope);
        }
        for &child in &tree.scopes[scope].children {
            if let Some(found) = search(tree, child, link_id) {
                return Some(found);
            }
        }
        None
    }
    search(tree, tree.root, link_id)
}
