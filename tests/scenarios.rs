// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Concrete end-to-end scenarios from the resolver's acceptance surface.
//! Unit-level coverage for individual components lives next to the code in
//! `src/`; these exercise the full `resolve` pipeline.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use formscope::{
    resolve, Extension, ExtensionValue, Form, Item, ItemType, Language, LaunchContext, LoaderError,
    Resource, ResolveError, ResolverConfig, ResolvingContext, ResourceLoader, SimplePathEvaluator,
    Value,
};

const POPULATION_CONTEXT: &str = "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-populationContext";
const EXTRACTION_CONTEXT: &str = "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-extractionContext";
const INITIAL_EXPRESSION: &str = "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-initialExpression";
const EXTRACTION_CONTEXT_ID: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-extractionContextId";

fn path_expr(url: &str, text: &str, name: Option<&str>) -> Extension {
    Extension {
        url: url.to_string(),
        value: ExtensionValue::Expression {
            language: Some(Language::Path),
            expression: text.to_string(),
            name: name.map(String::from),
        },
    }
}

fn query_expr(url: &str, text: &str, name: Option<&str>) -> Extension {
    Extension {
        url: url.to_string(),
        value: ExtensionValue::Expression {
            language: Some(Language::Query),
            expression: text.to_string(),
            name: name.map(String::from),
        },
    }
}

/// Records every url it was asked for and answers from a fixed table.
struct TableLoader {
    table: HashMap<String, Vec<Resource>>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl TableLoader {
    fn new(table: HashMap<String, Vec<Resource>>) -> Self {
        Self {
            table,
            calls: RefCell::new(vec![]),
        }
    }
}

#[async_trait(?Send)]
impl ResourceLoader for TableLoader {
    async fn fetch(
        &self,
        urls: &[String],
        _cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<Resource>>, LoaderError> {
        self.calls.borrow_mut().push(urls.to_vec());
        Ok(urls
            .iter()
            .filter_map(|u| self.table.get(u).map(|r| (u.clone(), r.clone())))
            .collect())
    }
}

#[tokio::test]
async fn launch_only_form_succeeds_with_no_children() {
    let form = Form::default();
    let evaluator = SimplePathEvaluator;
    let loader = TableLoader::new(HashMap::new());
    let cancel = CancellationToken::new();

    let outcome = resolve(
        &form,
        None,
        vec![LaunchContext::new("patient", Rc::new(serde_json::json!({"id": "P1"})))],
        &loader,
        &evaluator,
        ResolvingContext::Population,
        &cancel,
        &ResolverConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.tree.scopes.len(), 1);
    assert_eq!(outcome.tree.scopes[outcome.tree.root].children.len(), 0);
    assert_eq!(outcome.tree.contexts.len(), 1);
}

#[tokio::test]
async fn embedded_query_splices_single_path_result_into_query_text() {
    let mut form = Form::default();
    let mut item = Item::new("obs", ItemType::Answerable);
    item.extensions.push(query_expr(
        POPULATION_CONTEXT,
        "Observation?subject={{%patient.id}}",
        None,
    ));
    form.items.push(Rc::new(item));

    let evaluator = SimplePathEvaluator;
    let loader = TableLoader::new(HashMap::from([(
        "Observation?subject=P1".to_string(),
        vec![serde_json::json!({"resourceType": "Observation", "id": "obs1"})],
    )]));
    let cancel = CancellationToken::new();

    let outcome = resolve(
        &form,
        None,
        vec![LaunchContext::new("patient", Rc::new(serde_json::json!({"id": "P1"})))],
        &loader,
        &evaluator,
        ResolvingContext::Population,
        &cancel,
        &ResolverConfig::default(),
    )
    .await
    .unwrap();

    let last_call = loader.calls.borrow().last().cloned().unwrap();
    assert_eq!(last_call, vec!["Observation?subject=P1".to_string()]);

    let population_context = outcome
        .tree
        .contexts
        .iter()
        .filter_map(|c| c.as_expr())
        .find(|e| e.language == Language::Query)
        .unwrap();
    assert_eq!(population_context.text, "Observation?subject=P1");
    assert_eq!(population_context.value.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn embedded_query_with_zero_results_leaves_query_text_unsubstituted() {
    let mut form = Form::default();
    let mut item = Item::new("obs", ItemType::Answerable);
    item.extensions.push(query_expr(
        POPULATION_CONTEXT,
        "Observation?subject={{%patient.missingField}}",
        None,
    ));
    form.items.push(Rc::new(item));

    let evaluator = SimplePathEvaluator;
    let loader = TableLoader::new(HashMap::new());
    let cancel = CancellationToken::new();

    let err = resolve(
        &form,
        None,
        vec![LaunchContext::new("patient", Rc::new(serde_json::json!({"id": "P1"})))],
        &loader,
        &evaluator,
        ResolvingContext::Population,
        &cancel,
        &ResolverConfig::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ResolveError::Unresolvable { .. }));
}

#[tokio::test]
async fn population_fan_out_replaces_scope_with_one_clone_per_resource() {
    let mut form = Form::default();
    let mut group = Item::new("group1", ItemType::Group);
    group.extensions.push(path_expr(POPULATION_CONTEXT, "%patients", Some("family")));

    let mut child = Item::new("name1", ItemType::Answerable);
    child
        .extensions
        .push(path_expr(INITIAL_EXPRESSION, "%family.name", None));
    group.items.push(Rc::new(child));
    form.items.push(Rc::new(group));

    let evaluator = SimplePathEvaluator;
    let loader = TableLoader::new(HashMap::new());
    let cancel = CancellationToken::new();

    let patients = serde_json::json!([
        {"resourceType": "Patient", "id": "P1", "name": "Ada"},
        {"resourceType": "Patient", "id": "P2", "name": "Grace"},
        {"resourceType": "Patient", "id": "P3", "name": "Hedy"},
    ]);

    let outcome = resolve(
        &form,
        None,
        vec![LaunchContext::new("patients", Rc::new(patients))],
        &loader,
        &evaluator,
        ResolvingContext::Population,
        &cancel,
        &ResolverConfig::default(),
    )
    .await
    .unwrap();

    let root_children = &outcome.tree.scopes[outcome.tree.root].children;
    assert_eq!(root_children.len(), 3);

    let mut names: Vec<String> = vec![];
    for &clone_scope in root_children {
        for &nested in &outcome.tree.scopes[clone_scope].children {
            for &cid in &outcome.tree.scopes[nested].contexts {
                if let Some(e) = outcome.tree.context(cid).as_expr() {
                    if e.text == "%family.name" {
                        if let Some(Value::String(s)) = e.value.as_ref().and_then(|v| v.first()) {
                            names.push(s.to_string());
                        }
                    }
                }
            }
        }
    }
    names.sort();
    assert_eq!(names, vec!["Ada".to_string(), "Grace".to_string(), "Hedy".to_string()]);
}

#[tokio::test]
async fn cycle_between_two_variables_is_rejected() {
    let mut form = Form::default();
    form.extensions.push(path_expr(
        "http://hl7.org/fhir/StructureDefinition/variable",
        "%b",
        Some("a"),
    ));
    form.extensions.push(path_expr(
        "http://hl7.org/fhir/StructureDefinition/variable",
        "%a",
        Some("b"),
    ));

    let evaluator = SimplePathEvaluator;
    let loader = TableLoader::new(HashMap::new());
    let cancel = CancellationToken::new();

    let err = resolve(
        &form,
        None,
        vec![],
        &loader,
        &evaluator,
        ResolvingContext::Population,
        &cancel,
        &ResolverConfig::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ResolveError::Cycle { .. }));
}

#[tokio::test]
async fn extraction_context_resolves_to_loader_result_not_a_manufactured_resource() {
    let mut form = Form::default();
    let mut item = Item::new("patient-extract", ItemType::Group);
    item.extensions.push(path_expr(EXTRACTION_CONTEXT_ID, "%answerId", None));
    item.extensions.push(query_expr(EXTRACTION_CONTEXT, "Patient?identifier=P7", None));
    form.items.push(Rc::new(item));

    let evaluator = SimplePathEvaluator;
    let loader = TableLoader::new(HashMap::from([(
        "Patient?identifier=P7".to_string(),
        vec![serde_json::json!({"resourceType": "Patient", "id": "P7"})],
    )]));
    let cancel = CancellationToken::new();

    let outcome = resolve(
        &form,
        None,
        vec![LaunchContext::new("answerId", Rc::new(serde_json::json!("P7")))],
        &loader,
        &evaluator,
        ResolvingContext::Extraction,
        &cancel,
        &ResolverConfig::default(),
    )
    .await
    .unwrap();

    let extraction_context = outcome
        .tree
        .contexts
        .iter()
        .filter_map(|c| c.as_expr())
        .find(|e| e.text == "Patient?identifier=P7")
        .unwrap();
    assert_eq!(
        extraction_context.value,
        Some(vec![Value::from_json(&serde_json::json!({"resourceType": "Patient", "id": "P7"}))])
    );
}

#[tokio::test]
async fn item_with_no_extensions_gets_empty_child_scope() {
    let mut form = Form::default();
    form.items.push(Rc::new(Item::new("q1", ItemType::Answerable)));

    let evaluator = SimplePathEvaluator;
    let loader = TableLoader::new(HashMap::new());
    let cancel = CancellationToken::new();

    let outcome = resolve(
        &form,
        None,
        vec![],
        &loader,
        &evaluator,
        ResolvingContext::Population,
        &cancel,
        &ResolverConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.tree.scopes.len(), 2);
    assert!(outcome.tree.contexts.is_empty());
}
