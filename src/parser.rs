// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Parser: walks the form tree in lexical order, creating an expression node
//! in the current scope for every recognized extension.

use std::rc::Rc;

use crate::extensions::{accepts_language, kind_for};
use crate::form::{matching_responses, Extension, ExtensionValue, Form, Item, Response, ResponseItem};
use crate::ids::IdAllocator;
use crate::scope::{Context, ExpressionNode, LaunchContext, ResolvingContext, ScopeId, ScopeTree};

pub struct Parser<'a> {
    ids: &'a IdAllocator,
    resolving_context: ResolvingContext,
}

impl<'a> Parser<'a> {
    pub fn new(ids: &'a IdAllocator, resolving_context: ResolvingContext) -> Self {
        Self {
            ids,
            resolving_context,
        }
    }

    pub fn parse(
        &self,
        form: &Form,
        response: Option<&Response>,
        launch_contexts: Vec<LaunchContext>,
        warnings: &mut Vec<String>,
    ) -> ScopeTree {
        let mut tree = ScopeTree::new();

        for mut launch in launch_contexts {
            launch.id = self.ids.next_id() as _;
            launch.scope = tree.root;
            tree.add_context(Context::Launch(launch));
        }

        let root = tree.root;
        self.parse_extensions(&mut tree, root, &form.extensions, None, None, warnings);

        let empty = vec![];
        let responses = response.map(|r| &r.items).unwrap_or(&empty);
        for item in &form.items {
            self.parse_item(&mut tree, root, item, responses, warnings);
        }

        tree
    }

    fn parse_item(
        &self,
        tree: &mut ScopeTree,
        parent: ScopeId,
        item: &Rc<Item>,
        sibling_responses: &[Rc<ResponseItem>],
        warnings: &mut Vec<String>,
    ) {
        let matches = matching_responses(sibling_responses, &item.link_id);
        let pushes: Vec<Rc<ResponseItem>> = if matches.is_empty() {
            vec![Rc::new(ResponseItem::empty(item.link_id.clone()))]
        } else {
            matches
        };

        for response_item in pushes {
            let scope = tree.push_child(parent, Some(item.clone()), Some(response_item.clone()));
            self.parse_extensions(tree, scope, &item.extensions, Some(item.clone()), Some(response_item.clone()), warnings);
            for child in &item.items {
                self.parse_item(tree, scope, child, &response_item.items, warnings);
            }
        }
    }

    fn parse_extensions(
        &self,
        tree: &mut ScopeTree,
        scope: ScopeId,
        extensions: &[Extension],
        item: Option<Rc<Item>>,
        response_item: Option<Rc<ResponseItem>>,
        warnings: &mut Vec<String>,
    ) {
        for ext in extensions {
            let Some(kind) = kind_for(&ext.url, self.resolving_context) else {
                continue;
            };

            let ExtensionValue::Expression { language, expression, name } = &ext.value else {
                tracing::warn!(url = %ext.url, "extension value is not an expression; skipped");
                warnings.push(format!("extension `{}` has a non-expression value; skipped", ext.url));
                continue;
            };

            let Some(language) = language else {
                tracing::warn!(url = %ext.url, "extension expression has no language; skipped");
                warnings.push(format!("extension `{}` has no declared language; skipped", ext.url));
                continue;
            };

            if expression.trim().is_empty() {
                tracing::warn!(url = %ext.url, "extension expression is empty; skipped");
                warnings.push(format!("extension `{}` has an empty expression; skipped", ext.url));
                continue;
            }

            if !accepts_language(kind, *language) {
                tracing::warn!(url = %ext.url, ?language, "extension language not accepted for this kind; skipped");
                warnings.push(format!("extension `{}` uses a language its kind does not accept; skipped", ext.url));
                continue;
            }

            let id = self.ids.next_id() as _;
            let node = ExpressionNode {
                id,
                name: name.clone(),
                text: expression.clone(),
                language: *language,
                kind,
                scope,
                item: item.clone(),
                response_item: response_item.clone(),
                dependencies: Default::default(),
                dependants: Default::default(),
                value: None,
                source_resource: None,
                response_dependant: false,
                cloned_from: None,
            };
            tree.add_context(Context::Expr(node));
        }
    }
}
