//! History normalization before a request reaches an adapter.
//!
//! Backends reject or misread histories with two consecutive turns of the
//! same role, which happen after edits, branch switches and repeated sends.
//! [`collapse_history`] orders the turns and folds such runs into one turn.

use parley_core::{MessageBody, MessageRole, ModelMessage};

/// Order turns and merge consecutive same-role runs.
///
/// - Turns are stably sorted by timestamp (missing timestamps first). At
///   equal timestamps a user turn sorts before any other role.
/// - Two text bodies are joined with `"\n"`. Otherwise both sides become
///   part lists and are concatenated.
/// - A turn whose body equals the previous same-role body is dropped.
/// - An empty turn is skipped unless it joins an existing run.
pub fn collapse_history(mut history: Vec<ModelMessage>) -> Vec<ModelMessage> {
    history.sort_by_key(|m| (m.timestamp, m.role != MessageRole::User));

    let mut out: Vec<ModelMessage> = Vec::with_capacity(history.len());
    for msg in history {
        match out.last_mut() {
            Some(last) if last.role == msg.role => {
                if last.body != msg.body {
                    merge_bodies(&mut last.body, msg.body);
                }
            }
            _ if msg.body.is_empty() => {}
            _ => out.push(msg),
        }
    }
    out
}

fn merge_bodies(target: &mut MessageBody, next: MessageBody) {
    match (target, next) {
        (MessageBody::Text(a), MessageBody::Text(b)) => {
            a.push('\n');
            a.push_str(&b);
        }
        (target, next) => {
            let mut parts = std::mem::replace(target, MessageBody::Parts(Vec::new())).into_parts();
            parts.extend(next.into_parts());
            *target = MessageBody::Parts(parts);
        }
    }
}
