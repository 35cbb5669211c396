//! Entity/relationship/term extraction from the retrieved context.

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::info;

use loupe_core::error::{LoupeError, Result};
use loupe_core::models::{Entity, EntityTermExtraction, Relationship, Term};
use loupe_graph::node::{GraphNode, NodeContext};
use loupe_graph::state::dedup_sections;

use crate::parsing::strip_code_fences;
use crate::prompts;
use crate::state::{MainDelta, MainField, MainState};

/// Extract entities, relationships, and terms for the refinement
/// decomposition.
///
/// The response must be JSON (after stripping code fences) — anything else
/// fails the run. Absent or malformed sub-keys default to empty
/// collections.
pub struct ExtractEntities;

impl GraphNode<MainState> for ExtractEntities {
    fn name(&self) -> &'static str {
        "extract_entities"
    }

    fn writes(&self) -> &'static [MainField] {
        &[MainField::Extraction]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let relevant_docs = dedup_sections(
                state
                    .documents
                    .iter()
                    .chain(state.original_question_documents.iter())
                    .cloned(),
            );

            let prompt = prompts::fill(
                prompts::ENTITY_TERM_PROMPT,
                &[
                    ("question", ctx.config.query.as_str()),
                    ("context", &prompts::format_docs(&relevant_docs)),
                ],
            );
            let response = ctx.config.fast_llm.invoke(prompt).await?;
            let cleaned = strip_code_fences(&response);
            let parsed: Value = serde_json::from_str(&cleaned)
                .map_err(|e| LoupeError::LlmParse(format!("entity extraction: {e}")))?;

            let extraction = parse_extraction(&parsed);
            info!(
                entities = extraction.entities.len(),
                relationships = extraction.relationships.len(),
                terms = extraction.terms.len(),
                "extracted entities and terms"
            );

            Ok(MainDelta {
                extraction: Some(extraction),
                ..Default::default()
            })
        })
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Walk the parsed response, defaulting every absent or malformed sub-key
/// to an empty collection.
fn parse_extraction(parsed: &Value) -> EntityTermExtraction {
    let body = parsed
        .get("retrieved_entities_relationships")
        .cloned()
        .unwrap_or_default();

    let entities = body
        .get("entities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|entry| Entity {
                    name: str_field(entry, "entity_name"),
                    entity_type: str_field(entry, "entity_type"),
                })
                .collect()
        })
        .unwrap_or_default();

    let relationships = body
        .get("relationships")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|entry| Relationship {
                    name: str_field(entry, "relationship_name"),
                    relationship_type: str_field(entry, "relationship_type"),
                    entities: string_list(entry, "relationship_entities"),
                })
                .collect()
        })
        .unwrap_or_default();

    let terms = body
        .get("terms")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|entry| Term {
                    name: str_field(entry, "term_name"),
                    term_type: str_field(entry, "term_type"),
                    similar_to: string_list(entry, "term_similar_to"),
                })
                .collect()
        })
        .unwrap_or_default();

    EntityTermExtraction {
        entities,
        relationships,
        terms,
    }
}
