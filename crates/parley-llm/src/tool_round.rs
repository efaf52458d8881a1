//! One round of model-requested tool calls.
//!
//! Every adapter runs the same sequence: announce the calls, show each tool's
//! status, execute everything concurrently, then report the results. Tool
//! failures arrive as error-text results and never end the stream.

use parley_core::{ProgressUpdate, StreamStatus, ToolCallRecord, ToolResultRecord};
use tracing::debug;

use crate::provider::ToolExecutor;

/// Forced `tool_call` progress carrying the requested calls.
pub fn requested(calls: &[ToolCallRecord]) -> ProgressUpdate {
    ProgressUpdate {
        tool_calls: calls.to_vec(),
        ..ProgressUpdate::forced_status(StreamStatus::ToolCall)
    }
}

/// Forced status for a call about to run, with its arguments as detail.
pub fn running(executor: &dyn ToolExecutor, call: &ToolCallRecord) -> ProgressUpdate {
    ProgressUpdate {
        detail: serde_json::to_string(&call.arguments).ok(),
        ..ProgressUpdate::forced_status(executor.status_for(&call.name))
    }
}

/// Forced `tool_call_completed` progress carrying the results.
pub fn completed(results: &[ToolResultRecord]) -> ProgressUpdate {
    ProgressUpdate {
        tools: results.to_vec(),
        ..ProgressUpdate::forced_status(StreamStatus::ToolCallCompleted)
    }
}

/// Run every call; results keep the call order.
pub async fn execute_all(executor: &dyn ToolExecutor, calls: &[ToolCallRecord]) -> Vec<ToolResultRecord> {
    debug!(count = calls.len(), "executing tool calls");
    futures::future::join_all(calls.iter().map(|call| executor.execute(call))).await
}

/// Scripted tool executor for adapter tests.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use parley_core::{StreamStatus, ToolCallRecord, ToolDefinition, ToolResultRecord};

    use crate::provider::ToolExecutor;

    /// Echo executor: answers `"{name}:{query}"` and records every call.
    #[derive(Default)]
    pub struct EchoTools {
        /// Calls received so far.
        pub seen: Mutex<Vec<ToolCallRecord>>,
    }

    #[async_trait]
    impl ToolExecutor for EchoTools {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "web_search".into(),
                description: "Search the web".into(),
                parameters: serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}}),
            }]
        }

        fn status_for(&self, _name: &str) -> StreamStatus {
            StreamStatus::WebSearch
        }

        async fn execute(&self, call: &ToolCallRecord) -> ToolResultRecord {
            self.seen.lock().push(call.clone());
            let query = call.arguments.get("query").and_then(|v| v.as_str()).unwrap_or("N/A");
            ToolResultRecord::ok(&call.call_id, &call.name, format!("{}:{query}", call.name))
        }
    }
}
