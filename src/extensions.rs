// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fixed switch from extension url to expression-node kind, keyed also by
//! which `ResolvingContext` it is active in.

use crate::scope::{ExpressionKind, ResolvingContext};

pub const POPULATION_CONTEXT: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-populationContext";
pub const EXTRACTION_CONTEXT: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-extractionContext";
pub const INITIAL_EXPRESSION: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-initialExpression";
pub const VARIABLE_EXPRESSION: &str = "http://hl7.org/fhir/StructureDefinition/variable";
pub const CALCULATED_EXPRESSION: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-calculatedExpression";
pub const EXTRACTION_CONTEXT_ID: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-extractionContextId";

/// Looks up the node kind for `url`, gated by which pass is active. Returns
/// `None` for an unrecognized url, which the parser treats as "not one of
/// ours" (silently ignored, not even a warning, unlike a recognized url with
/// a malformed value, which does warn).
pub fn kind_for(url: &str, resolving_context: ResolvingContext) -> Option<ExpressionKind> {
    use ResolvingContext::*;
    match (url, resolving_context) {
        (POPULATION_CONTEXT, Population) => Some(ExpressionKind::PopulationContext),
        (EXTRACTION_CONTEXT, Extraction) => Some(ExpressionKind::ExtractionContext),
        (INITIAL_EXPRESSION, Population) => Some(ExpressionKind::InitialExpression),
        (VARIABLE_EXPRESSION, Population) | (VARIABLE_EXPRESSION, Extraction) => {
            Some(ExpressionKind::VariableExpression)
        }
        (CALCULATED_EXPRESSION, Population) | (CALCULATED_EXPRESSION, Extraction) => {
            Some(ExpressionKind::CalculatedExpression)
        }
        (EXTRACTION_CONTEXT_ID, Extraction) => Some(ExpressionKind::ExtractionContextId),
        _ => None,
    }
}

/// Accepted languages per kind: the two *Context* kinds may be written in
/// either language, everything else is path-only.
pub fn accepts_language(kind: ExpressionKind, language: crate::form::Language) -> bool {
    use crate::form::Language::*;
    use ExpressionKind::*;
    match kind {
        PopulationContext | ExtractionContext => matches!(language, Path | Query),
        _ => matches!(language, Path),
    }
}
