//! Prompt templates and formatting helpers.
//!
//! Templates use `{name}` placeholders filled by [`fill`]; keeping them as
//! plain constants makes the node code that assembles prompts easy to scan.

use loupe_core::models::EntityTermExtraction;
use loupe_core::types::Section;

pub const ASSISTANT_SYSTEM_PROMPT_DEFAULT: &str =
    "You are an assistant for question-answering tasks.";

pub const ASSISTANT_SYSTEM_PROMPT_PERSONA: &str = "\
You are an assistant for question-answering tasks. Follow this persona:
{persona_prompt}";

pub const INITIAL_DECOMPOSITION_PROMPT: &str = "\
Decompose the question below into the smallest set of self-contained \
sub-questions that together cover it. Each sub-question must be answerable \
by a document search on its own.

Respond with one sub-question per line and nothing else. If the question \
cannot usefully be decomposed, respond with an empty line.

Question:
{question}";

pub const FOLLOW_UP_DECOMPOSITION_PROMPT: &str = "\
An initial research pass over the question below produced a draft answer. \
Propose follow-up sub-questions that would close its remaining gaps, \
informed by the entities and terms found so far. Do not repeat \
sub-questions that were already answered; do revisit the failed ones from \
a different angle.

Question:
{question}

Draft answer:
{base_answer}

Entities, relationships and terms seen in the retrieved context:
{entity_term_extraction}

Sub-questions already answered:
{answered_sub_questions}

Sub-questions that could not be answered:
{failed_sub_questions}

Respond with a JSON object of the form \
{\"sub_questions\": [{\"sub_question\": \"...\"}, ...]} and nothing else.";

pub const QUERY_REWRITE_PROMPT: &str = "\
Rewrite the question below into at most {num_queries} short keyword search \
queries that together retrieve the evidence needed to answer it. Respond \
with one query per line and nothing else.

Question:
{question}";

pub const DOC_VERIFICATION_PROMPT: &str = "\
Determine whether the document excerpt below is useful for answering the \
question. Respond with exactly 'yes' or 'no'.

Question:
{question}

Document excerpt:
{document}";

pub const SUB_ANSWER_PROMPT: &str = "\
Answer the question using only the documents below. If the documents do \
not contain the answer, respond with exactly: I don't know

Question:
{question}

Documents:
{context}";

pub const SUB_CHECK_PROMPT: &str = "\
Determine whether the proposed answer actually addresses the question. \
Respond with 'yes' or 'no', optionally followed by a short reason.

Question:
{question}

Proposed answer:
{answer}";

pub const INITIAL_SYNTHESIS_PROMPT: &str = "\
{persona_specification}

Answer the question using the answered sub-questions and the retrieved \
documents below. Prefer the sub-answers where they apply and the documents \
for everything else. Give a complete, direct answer.

Question:
{question}

Answered sub-questions:
{answered_sub_questions}

Documents:
{context}";

pub const INITIAL_SYNTHESIS_PROMPT_NO_SUB_ANSWERS: &str = "\
{persona_specification}

Answer the question using the retrieved documents below. Give a complete, \
direct answer.

Question:
{question}

Documents:
{context}";

pub const BASE_SYNTHESIS_PROMPT: &str = "\
Answer the question using only the documents below.

Question:
{question}

Documents:
{context}";

pub const REFINED_SYNTHESIS_PROMPT: &str = "\
{persona_specification}

A first research pass produced the draft answer below. Improve it using \
the answered sub-questions and the combined documents: correct mistakes, \
fill gaps, and keep what is already right.

Question:
{question}

Draft answer:
{initial_answer}

Answered sub-questions:
{answered_sub_questions}

Documents:
{context}";

pub const REFINED_SYNTHESIS_PROMPT_NO_SUB_ANSWERS: &str = "\
{persona_specification}

A first research pass produced the draft answer below. Improve it using \
the combined documents: correct mistakes, fill gaps, and keep what is \
already right.

Question:
{question}

Draft answer:
{initial_answer}

Documents:
{context}";

pub const ENTITY_TERM_PROMPT: &str = "\
From the documents below, extract the entities, the relationships between \
them, and the important domain terms relevant to the question.

Question:
{question}

Documents:
{context}

Respond with a JSON object of the form:
{\"retrieved_entities_relationships\": {
  \"entities\": [{\"entity_name\": \"...\", \"entity_type\": \"...\"}],
  \"relationships\": [{\"relationship_name\": \"...\", \
\"relationship_type\": \"...\", \"relationship_entities\": [\"...\"]}],
  \"terms\": [{\"term_name\": \"...\", \"term_type\": \"...\", \
\"term_similar_to\": [\"...\"]}]
}}";

pub const SUB_QUESTION_ANSWER_TEMPLATE: &str = "\
Sub-question: {sub_question}
Sub-answer: {sub_answer}";

/// Fill `{name}` placeholders in a template.
pub fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in pairs {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Render sections for inclusion in a prompt context block.
pub fn format_docs(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|section| match &section.title {
            Some(title) => format!("[{title}]\n{}", section.content),
            None => section.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Render an extraction result for inclusion in a prompt.
pub fn format_entity_term_extraction(extraction: &EntityTermExtraction) -> String {
    let entities = extraction
        .entities
        .iter()
        .map(|e| format!("- {} ({})", e.name, e.entity_type))
        .collect::<Vec<_>>()
        .join("\n");
    let relationships = extraction
        .relationships
        .iter()
        .map(|r| format!("- {} ({}): {}", r.name, r.relationship_type, r.entities.join(", ")))
        .collect::<Vec<_>>()
        .join("\n");
    let terms = extraction
        .terms
        .iter()
        .map(|t| format!("- {} ({})", t.name, t.term_type))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Entities:\n{entities}\n\nRelationships:\n{relationships}\n\nTerms:\n{terms}")
}

/// The persona-conditional system preamble for synthesis prompts.
pub fn persona_specification(persona_prompt: Option<&str>) -> String {
    match persona_prompt {
        Some(prompt) if !prompt.trim().is_empty() => fill(
            ASSISTANT_SYSTEM_PROMPT_PERSONA,
            &[("persona_prompt", prompt)],
        ),
        _ => ASSISTANT_SYSTEM_PROMPT_DEFAULT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill() {
        let rendered = fill("a {x} b {y} c {x}", &[("x", "1"), ("y", "2")]);
        assert_eq!(rendered, "a 1 b 2 c 1");
    }

    #[test]
    fn test_persona_specification() {
        assert_eq!(persona_specification(None), ASSISTANT_SYSTEM_PROMPT_DEFAULT);
        assert_eq!(persona_specification(Some("  ")), ASSISTANT_SYSTEM_PROMPT_DEFAULT);
        let persona = persona_specification(Some("Be terse."));
        assert!(persona.contains("Be terse."));
    }

    #[test]
    fn test_format_docs() {
        let sections = vec![
            Section {
                document_id: "d1".into(),
                chunk_ind: 0,
                title: Some("Guide".into()),
                link: None,
                content: "Body.".into(),
                score: None,
            },
            Section {
                document_id: "d2".into(),
                chunk_ind: 0,
                title: None,
                link: None,
                content: "More.".into(),
                score: None,
            },
        ];
        let rendered = format_docs(&sections);
        assert!(rendered.contains("[Guide]\nBody."));
        assert!(rendered.contains("More."));
        assert!(rendered.contains("---"));
    }
}
