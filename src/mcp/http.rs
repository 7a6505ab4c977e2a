//! MCP over streamable HTTP.
//!
//! Each channel performs the `initialize` handshake on connect, keeps the
//! server-assigned `Mcp-Session-Id`, and ends the session with `DELETE` on
//! close. Replies may come back as plain JSON or as a short event stream.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::connection::{Connector, ToolChannel};
use super::manifest::{ToolDescriptor, ToolManifest};
use crate::error::InvokeError;

const PROTOCOL_VERSION: &str = "2025-06-18";
const SESSION_HEADER: &str = "mcp-session-id";

/// Upper bound on `tools/list` pages followed for one manifest.
const MAX_TOOL_PAGES: usize = 64;

/// Opens MCP sessions against one server URL.
#[derive(Debug, Clone)]
pub struct McpHttpConnector {
    client: reqwest::Client,
    url: Url,
    auth_token: Option<String>,
}

impl McpHttpConnector {
    pub fn new(client: reqwest::Client, url: Url, auth_token: Option<String>) -> Self {
        Self {
            client,
            url,
            auth_token,
        }
    }
}

#[async_trait]
impl Connector for McpHttpConnector {
    async fn connect(&self) -> Result<Box<dyn ToolChannel>, InvokeError> {
        let mut channel = McpHttpChannel {
            client: self.client.clone(),
            url: self.url.clone(),
            auth_token: self.auth_token.clone(),
            session_id: None,
            next_id: 1,
        };
        channel.initialize().await?;
        Ok(Box::new(channel))
    }
}

struct McpHttpChannel {
    client: reqwest::Client,
    url: Url,
    auth_token: Option<String>,
    session_id: Option<String>,
    next_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl McpHttpChannel {
    async fn initialize(&mut self) -> Result<(), InvokeError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self.request("initialize", params).await?;
        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        debug!(
            server,
            session_id = ?self.session_id,
            "MCP session initialized"
        );
        self.notify("notifications/initialized").await
    }

    fn post(&self, body: &Value) -> RequestBuilder {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(session) = &self.session_id {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, InvokeError> {
        let id = self.next_id;
        self.next_id += 1;
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = self
            .post(&body)
            .send()
            .await
            .map_err(|e| InvokeError::from_reqwest(e, "calling the tool server"))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::from_status(status, body));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let text = response
            .text()
            .await
            .map_err(|e| InvokeError::from_reqwest(e, "reading tool server reply"))?;

        let message = if is_event_stream {
            find_event_stream_reply(&text, id)?
        } else {
            serde_json::from_str(&text)
                .map_err(|e| InvokeError::Transport(format!("invalid JSON-RPC reply to {method}: {e}")))?
        };
        into_result(method, message)
    }

    async fn notify(&mut self, method: &str) -> Result<(), InvokeError> {
        let body = json!({"jsonrpc": "2.0", "method": method});
        let response = self
            .post(&body)
            .send()
            .await
            .map_err(|e| InvokeError::from_reqwest(e, "notifying the tool server"))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(InvokeError::from_status(status, body))
        }
    }
}

#[async_trait]
impl ToolChannel for McpHttpChannel {
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn list_tools(&mut self) -> Result<ToolManifest, InvokeError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| InvokeError::Transport(format!("invalid tools/list result: {e}")))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(ToolManifest::new(tools)),
            }
        }

        Err(InvokeError::Transport(format!(
            "tools/list still paginating after {MAX_TOOL_PAGES} pages"
        )))
    }

    async fn close(&mut self) -> Result<(), InvokeError> {
        // The id stays set until the DELETE lands, so an interrupted close
        // can run again.
        let Some(session) = self.session_id.clone() else {
            return Ok(());
        };

        let mut request = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, &session);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| InvokeError::from_reqwest(e, "closing the MCP session"))?;

        let status = response.status();
        // Servers that keep no session state answer 405.
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            self.session_id = None;
            debug!(session_id = %session, "MCP session closed");
            Ok(())
        } else {
            Err(InvokeError::from_status(status, String::new()))
        }
    }
}

/// Pick the JSON-RPC reply with `id` out of an event-stream body.
fn find_event_stream_reply(body: &str, id: u64) -> Result<Value, InvokeError> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .find(|message| message.get("id").and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| InvokeError::Transport(format!("no reply to request {id} in event stream")))
}

fn into_result(method: &str, mut message: Value) -> Result<Value, InvokeError> {
    if let Some(error) = message.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(InvokeError::Transport(format!(
            "{method} failed with JSON-RPC error {code}: {text}"
        )));
    }
    match message.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(InvokeError::Transport(format!("{method} reply has no result"))),
    }
}
