//! The remote agent that produces the event stream.

mod http;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::InvokeError;
use crate::mcp::ToolDescriptor;

pub use http::{frame_lines, HttpUpstream};

/// Raw lines of one attempt's response body.
pub type FrameStream = BoxStream<'static, Result<String, InvokeError>>;

/// Body of one upstream invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRequest {
    pub prompt: String,
    /// Tools the agent may call, from the manifest cache.
    pub tools: Vec<ToolDescriptor>,
    /// MCP session the agent should run its tool calls over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_session: Option<String>,
}

/// Starts a streaming invocation of the remote agent.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `request` and return the response body as lines once headers
    /// arrive. Faults after that point surface as items of the stream.
    async fn invoke(&self, request: InvocationRequest) -> Result<FrameStream, InvokeError>;
}
