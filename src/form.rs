// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use crate::value::Value;

/// The two small languages an expression can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Path,
    Query,
}

/// An extension carries either an expression value (what the parser cares
/// about) or something else entirely, which the parser ignores.
#[derive(Debug, Clone)]
pub enum ExtensionValue {
    Expression {
        language: Option<Language>,
        expression: String,
        /// The expression's declared `name`, used by `VariableExpression`s so
        /// other expressions can reference them by symbol (`%name`).
        name: Option<String>,
    },
    Other,
}

#[derive(Debug, Clone)]
pub struct Extension {
    pub url: String,
    pub value: ExtensionValue,
}

/// The minimal type tags the resolver needs to distinguish: `group` items
/// recurse without being answerable, `display` items never carry answers,
/// everything else is an answerable leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Group,
    Display,
    Answerable,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub link_id: String,
    pub item_type: ItemType,
    pub repeats: bool,
    pub initial: Vec<Value>,
    pub items: Vec<Rc<Item>>,
    pub extensions: Vec<Extension>,
}

impl Item {
    pub fn new(link_id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            link_id: link_id.into(),
            item_type,
            repeats: false,
            initial: vec![],
            items: vec![],
            extensions: vec![],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Form {
    pub extensions: Vec<Extension>,
    pub items: Vec<Rc<Item>>,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub value: Option<Value>,
    pub items: Vec<Rc<ResponseItem>>,
}

#[derive(Debug, Clone)]
pub struct ResponseItem {
    pub link_id: String,
    pub answers: Vec<Answer>,
    pub items: Vec<Rc<ResponseItem>>,
}

impl ResponseItem {
    pub fn empty(link_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            answers: vec![],
            items: vec![],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub items: Vec<Rc<ResponseItem>>,
}

/// Finds every response item under `parent` (or the top-level response)
/// matching `link_id`. A form item with no matching response item gets a
/// synthesized empty response (one push); a response repeated N times drives
/// N scope pushes.
pub fn matching_responses<'a>(
    responses: &'a [Rc<ResponseItem>],
    link_id: &str,
) -> Vec<Rc<ResponseItem>> {
    responses
        .iter()
        .filter(|r| r.link_id == link_id)
        .cloned()
        .collect()
}
