//! Interpreting a document-answering model's JSON reply.

use std::collections::HashMap;

use parley_core::messages::RelevantChunk;
use serde::Deserialize;
use serde_json::Value;

use crate::collaborators::DocumentChunk;

/// Content used when the model gives no answer at all.
pub const NO_ANSWER: &str = "N/A";

/// Fields of the JSON answer contract. Everything is optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RagAnswer {
    /// Step-by-step analysis.
    pub step_by_step_analysis: Option<String>,
    /// Short reasoning summary.
    pub reasoning_summary: Option<String>,
    /// The answer.
    pub final_answer: Option<String>,
    /// Cited chunk IDs.
    pub relevant_chunks_ids: Option<Vec<String>>,
    /// Relevance per cited chunk, same order.
    pub chunks_relevance: Option<Vec<f64>>,
}

/// Strip code fences and any text before the JSON object, and fold line
/// breaks into spaces.
fn clean(raw: &str) -> String {
    let mut text = raw.trim_start();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.strip_prefix("json").unwrap_or(rest);
    }
    let text = text.find('{').map_or("", |i| &text[i..]);
    let text = text.trim_end();
    let text = text.strip_suffix("```").unwrap_or(text);
    text.split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_owned()
}

/// Parse a reply. An empty reply is an empty answer. Replies that wrap
/// every field as `schema.properties.<field>.value` are flattened.
pub fn parse_rag_answer(raw: &str) -> Result<RagAnswer, serde_json::Error> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return Ok(RagAnswer::default());
    }
    let mut value: Value = serde_json::from_str(&cleaned)?;
    if let Some(props) = value.pointer("/schema/properties").and_then(Value::as_object) {
        value = Value::Object(
            props
                .iter()
                .map(|(k, v)| (k.clone(), v.get("value").cloned().unwrap_or(Value::Null)))
                .collect(),
        );
    }
    serde_json::from_value(value)
}

impl RagAnswer {
    /// Message content: the final answer (or `raw`, or `N/A`), followed by
    /// the reasoning summary as a quote.
    pub fn content(&self, raw: &str) -> String {
        let mut content = [self.final_answer.as_deref(), Some(raw.trim())]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or(NO_ANSWER)
            .to_owned();
        if let Some(summary) = self.reasoning_summary.as_deref().filter(|s| !s.is_empty()) {
            content.push_str("\n\n> ");
            content.push_str(summary);
        }
        content
    }

    /// Cited chunks that were actually retrieved, with their relevance
    /// (0 when missing).
    pub fn relevant_chunks(&self, retrieved: &[DocumentChunk]) -> Vec<RelevantChunk> {
        let by_id: HashMap<&str, &DocumentChunk> = retrieved.iter().map(|c| (c.id.as_str(), c)).collect();
        let relevance = self.chunks_relevance.as_deref().unwrap_or_default();
        self.relevant_chunks_ids
            .iter()
            .flatten()
            .enumerate()
            .filter_map(|(i, id)| {
                let chunk = by_id.get(id.as_str())?;
                Some(RelevantChunk {
                    id: id.clone(),
                    relevance: relevance.get(i).copied().unwrap_or(0.0),
                    document_id: chunk.document_id.clone(),
                    document_name: chunk.document_name.clone(),
                    page: chunk.page,
                    page_index: chunk.page_index,
                    content: chunk.content.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use parley_core::DocumentId;

    use super::*;

    #[test]
    fn fenced_reply_with_preamble() {
        let raw = "```json\nHere you go:\n{\"final_answer\": \"Paris\",\n\"reasoning_summary\": \"Stated on page 2\"}\n```";
        let answer = parse_rag_answer(raw).unwrap();
        assert_eq!(answer.final_answer.as_deref(), Some("Paris"));
        assert_eq!(answer.content(raw), "Paris\n\n> Stated on page 2");
    }

    #[test]
    fn schema_wrapped_reply_is_flattened() {
        let raw = r#"{"schema":{"properties":{"final_answer":{"value":"42"},"relevant_chunks_ids":{"value":["c1"]}}}}"#;
        let answer = parse_rag_answer(raw).unwrap();
        assert_eq!(answer.final_answer.as_deref(), Some("42"));
        assert_eq!(answer.relevant_chunks_ids, Some(vec!["c1".to_owned()]));
    }

    #[test]
    fn empty_reply_falls_back() {
        let answer = parse_rag_answer("").unwrap();
        assert_eq!(answer.content(""), NO_ANSWER);
        let answer = parse_rag_answer("no json here").unwrap();
        assert_eq!(answer.content("no json here"), "no json here");
    }

    #[test]
    fn broken_json_is_an_error() {
        assert!(parse_rag_answer("{\"final_answer\": ").is_err());
    }

    #[test]
    fn only_retrieved_chunks_are_cited() {
        let retrieved = vec![DocumentChunk {
            id: "c1".into(),
            document_id: DocumentId::from("d1"),
            document_name: Some("report.pdf".into()),
            page: 2,
            page_index: 1,
            content: "text".into(),
        }];
        let answer = RagAnswer {
            relevant_chunks_ids: Some(vec!["missing".into(), "c1".into()]),
            chunks_relevance: Some(vec![0.3]),
            ..RagAnswer::default()
        };
        let cited = answer.relevant_chunks(&retrieved);
        assert_eq!(cited.len(), 1);
        assert_eq!(cited[0].id, "c1");
        assert_eq!(cited[0].document_id, DocumentId::from("d1"));
        assert!(cited[0].relevance.abs() < f64::EPSILON);
    }
}
