//! MCP transport over streamable HTTP
//!
//! Talks JSON-RPC 2.0 to a Model Context Protocol server such as Home
//! Assistant's `mcp_server` integration. Each user request becomes a
//! `tools/call` of the configured conversation tool.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{AssistantTransport, SessionInfo};
use crate::config::AssistantConfig;
use crate::{Error, Result};

/// Protocol revision we offer during `initialize`
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Header carrying the server-issued session id
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Cap on `tools/list` pages walked while looking for the conversation tool
const MAX_TOOL_PAGES: usize = 10;

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// JSON-RPC notification (no id, no response)
#[derive(Debug, Serialize)]
struct RpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<Value>,
    result: Option<Value>,
    error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: Option<String>,
    #[serde(default)]
    capabilities: ServerCapabilities,
    server_info: Option<Implementation>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerCapabilities {
    tools: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Implementation {
    name: String,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Content>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// MCP client transport
pub struct McpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
    token: Option<SecretString>,
    tool: String,
    next_id: AtomicU64,
}

impl McpTransport {
    /// Create a transport for `endpoint`, calling `tool` for each request
    #[must_use]
    pub fn new(endpoint: url::Url, token: Option<SecretString>, tool: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token,
            tool: tool.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a transport from assistant configuration
    #[must_use]
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(config.url.clone(), config.token.clone(), config.tool.clone())
    }

    fn post(&self, session_id: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json, text/event-stream");

        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(id) = session_id {
            req = req.header(SESSION_HEADER, id);
        }
        req
    }

    /// Send a request and return its result plus any session id the server assigned
    async fn request(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<(Value, Option<String>)> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        tracing::trace!(id, method, "MCP request");

        let response = self
            .post(session_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("assistant unreachable: {e}")))?;

        let status = response.status();
        let assigned_session = header_str(response.headers(), SESSION_HEADER);
        let is_sse = header_str(response.headers(), CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response
            .text()
            .await
            .map_err(|e| Error::Connection(format!("failed to read assistant response: {e}")))?;

        check_status(status, session_id.is_some(), &text)?;

        let rpc = if is_sse {
            parse_sse(&text, id)?
        } else {
            serde_json::from_str::<RpcResponse>(&text)
                .map_err(|e| Error::backend(format!("invalid JSON-RPC response: {e}")))?
        };

        if rpc.id.as_ref().and_then(Value::as_u64) != Some(id) {
            return Err(Error::backend(format!(
                "response id {:?} does not match request {id}",
                rpc.id
            )));
        }

        if let Some(error) = rpc.error {
            return Err(Error::backend(format!(
                "JSON-RPC error {}: {}",
                error.code, error.message
            )));
        }

        let result = rpc
            .result
            .ok_or_else(|| Error::backend("JSON-RPC response without result"))?;

        Ok((result, assigned_session))
    }

    async fn notify(&self, session_id: Option<&str>, method: &str) -> Result<()> {
        let response = self
            .post(session_id)
            .json(&RpcNotification {
                jsonrpc: "2.0",
                method,
            })
            .send()
            .await
            .map_err(|e| Error::Connection(format!("assistant unreachable: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        check_status(status, session_id.is_some(), &text)
    }

    /// Walk `tools/list` until the conversation tool shows up
    async fn has_tool(&self, session_id: Option<&str>) -> Result<bool> {
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor
                .as_ref()
                .map_or_else(|| json!({}), |c| json!({ "cursor": c }));
            let (result, _) = self.request(session_id, "tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;

            if page.tools.iter().any(|t| t.name == self.tool) {
                return Ok(true);
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(false),
            }
        }

        Ok(false)
    }
}

#[async_trait]
impl AssistantTransport for McpTransport {
    async fn handshake(&self) -> Result<SessionInfo> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let (result, session_id) = self
            .request(None, "initialize", params)
            .await
            .map_err(into_connection)?;

        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| Error::Connection(format!("invalid initialize result: {e}")))?;

        if init.capabilities.tools.is_none() {
            return Err(Error::Connection(
                "assistant backend does not offer tools".to_string(),
            ));
        }

        self.notify(session_id.as_deref(), "notifications/initialized")
            .await
            .map_err(into_connection)?;

        if !self
            .has_tool(session_id.as_deref())
            .await
            .map_err(into_connection)?
        {
            return Err(Error::Connection(format!(
                "assistant backend has no {:?} tool",
                self.tool
            )));
        }

        let (server_name, server_version) = init
            .server_info
            .map_or((None, None), |s| (Some(s.name), s.version));

        Ok(SessionInfo {
            session_id,
            server_name,
            server_version,
            protocol_version: init.protocol_version,
        })
    }

    async fn exchange(&self, session: &SessionInfo, text: &str) -> Result<String> {
        let params = json!({
            "name": self.tool,
            "arguments": { "text": text },
        });

        let (result, _) = self
            .request(session.session_id.as_deref(), "tools/call", params)
            .await?;

        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| Error::backend(format!("invalid tools/call result: {e}")))?;

        let reply = call
            .content
            .into_iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text),
                Content::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if call.is_error {
            return Err(Error::backend(reply));
        }

        Ok(reply)
    }

    async fn close(&self, session: &SessionInfo) -> Result<()> {
        let Some(id) = session.session_id.as_deref() else {
            return Ok(());
        };

        let mut req = self
            .client
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, id);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let status = req.send().await?.status();
        // Servers may refuse client-initiated termination
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(Error::Connection(format!("session close rejected: {status}")))
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Map HTTP status to the error taxonomy
fn check_status(status: StatusCode, has_session: bool, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Connection(format!(
            "assistant rejected credentials ({status})"
        ))),
        StatusCode::NOT_FOUND if has_session => {
            Err(Error::Connection("assistant session expired".to_string()))
        }
        _ => Err(Error::backend(format!("HTTP {status}: {body}"))),
    }
}

/// Extract the JSON-RPC response for `id` from an SSE body
fn parse_sse(body: &str, id: u64) -> Result<RpcResponse> {
    let mut data = String::new();
    let mut events = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            if !data.is_empty() {
                events.push(std::mem::take(&mut data));
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    events
        .iter()
        .filter_map(|event| serde_json::from_str::<RpcResponse>(event).ok())
        .find(|rpc| rpc.id.as_ref().and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| Error::backend(format!("no response for request {id} in event stream")))
}

/// Any failure during the handshake means there is no session
fn into_connection(e: Error) -> Error {
    match e {
        Error::Connection(_) => e,
        other => Error::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sse_response_by_id() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\
                    \n";
        let rpc = parse_sse(body, 7).unwrap();
        assert_eq!(rpc.result, Some(json!({ "ok": true })));
    }

    #[test]
    fn sse_without_matching_id_is_backend_error() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}\n\n";
        assert!(matches!(parse_sse(body, 4), Err(Error::Backend { .. })));
    }

    #[test]
    fn status_mapping() {
        assert!(check_status(StatusCode::OK, true, "").is_ok());
        assert!(check_status(StatusCode::ACCEPTED, false, "").is_ok());
        assert!(matches!(
            check_status(StatusCode::UNAUTHORIZED, false, ""),
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND, true, ""),
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND, false, ""),
            Err(Error::Backend { .. })
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, true, "upstream"),
            Err(Error::Backend { .. })
        ));
    }

    #[test]
    fn tool_result_content_ignores_non_text() {
        let call: CallToolResult = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "Lights are on." },
                { "type": "image", "data": "...", "mimeType": "image/png" }
            ]
        }))
        .unwrap();
        assert!(!call.is_error);
        assert_eq!(call.content.len(), 2);
        assert!(matches!(call.content[1], Content::Other));
    }
}
