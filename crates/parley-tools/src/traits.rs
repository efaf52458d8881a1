//! The trait every chat tool implements.

use async_trait::async_trait;
use parley_core::{ConnectionParams, StreamStatus, ToolDefinition};
use serde_json::{Map, Value};

use crate::errors::ToolError;

/// A tool a model may call during a turn.
///
/// - **Schema** via [`definition()`](ParleyTool::definition), sent to the model
/// - **Execution** via [`call()`](ParleyTool::call), with parsed arguments
/// - **Status** shown to the user while the call runs
#[async_trait]
pub trait ParleyTool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    /// Schema advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Stream status while the tool runs.
    fn status(&self) -> StreamStatus {
        StreamStatus::ToolCall
    }

    /// Run the tool. `Ok` is the text returned to the model.
    async fn call(
        &self,
        args: Map<String, Value>,
        call_id: &str,
        connection: &ConnectionParams,
    ) -> Result<String, ToolError>;

    /// Text returned to the model when [`call()`](ParleyTool::call) fails.
    fn error_text(&self, error: &ToolError) -> String {
        format!("Error: {error}")
    }
}
