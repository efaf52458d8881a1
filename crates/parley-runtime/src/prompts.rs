//! Prompt templates for title synthesis and document answering.

use std::fmt::Write as _;

use serde_json::json;

use crate::collaborators::DocumentChunk;

/// Prompt asking for a short chat title.
pub fn chat_title(question: &str, answer: &str) -> String {
    format!(
        "Please provide a short title from 1 to 7 words for a chat based on the following question and answer.\n\
         Question: {question}\n\
         Answer: {answer}\n\
         The title should be concise and capture the essence of the conversation and have a maximum of 7 words."
    )
}

/// System prompt and user input for one document-answering request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RagPrompt {
    /// Instructions plus the JSON answer contract.
    pub system_prompt: String,
    /// Retrieved chunks followed by the question.
    pub user_input: String,
}

const RAG_INSTRUCTION: &str = "You are a RAG (Retrieval-Augmented Generation) answering system.
Your task is to answer the given question based only on information from the provided documents, which is uploaded in the format of relevant pages extracted using RAG.

Before giving a final answer, carefully think out loud and step by step. Pay special attention to the wording of the question.
- Keep in mind that the content containing the answer may be worded differently than the question.
- If it is a date, it should be in ISO Format \"yyyy-MM-dd\" (e.g., 2020-01-01).
- If the question asks for a specific detail (e.g., date, full name, exact term), ensure your answer matches that detail precisely.
  But if only partial date is available, like year and month or only month, then provide this info in the final answer.";

fn rag_schema() -> serde_json::Value {
    json!({
        "name": "rag_response",
        "strict": true,
        "schema": {
            "type": "object",
            "properties": {
                "step_by_step_analysis": {
                    "type": "string",
                    "description": "Detailed step-by-step analysis of the answer with at least 5 steps and at least 150 words."
                },
                "reasoning_summary": {
                    "type": "string",
                    "description": "Concise summary of the step-by-step reasoning process. Around 50 words."
                },
                "final_answer": {
                    "type": "string",
                    "description": "Final answer without any extra words or comments. Return 'N/A' if information is not available in the context."
                },
                "relevant_chunks_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "IDs of the input chunks containing information directly used to answer the question."
                },
                "chunks_relevance": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "Relevance score between 0 and 1 for each chunk ID, in the same order."
                }
            },
            "additionalProperties": false,
            "required": ["final_answer", "relevant_chunks_ids"]
        }
    })
}

/// Build the document-answering prompt for `chunks` and `question`.
pub fn rag_request(chunks: &[DocumentChunk], question: &str) -> RagPrompt {
    let schema = serde_json::to_string_pretty(&rag_schema()).unwrap_or_default();
    let system_prompt = format!(
        "{RAG_INSTRUCTION}\n\n---\n\n\
         Your answer should be in JSON and strictly follow this schema, filling in the fields in the order they are given:\n\
         ```\n{schema}\n```"
    );

    let mut context = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            context.push_str("\n\n---\n\n");
        }
        let content = chunk.content.split(['\r', '\n']).filter(|l| !l.is_empty()).collect::<Vec<_>>().join("\n");
        let _ = write!(context, "#Chunk\nid: {}\ncontent:\n\"\"\"\n{content}\n\"\"\"", chunk.id);
    }
    let user_input = format!(
        "Here is the context:\n\"\"\"\n{context}\n\"\"\"\n\n---\n\nHere is the question:\n\"\"\"\n{question}\n\"\"\""
    );

    RagPrompt {
        system_prompt,
        user_input,
    }
}
