//! A [`ToolHost`] backed by an in-process MCP server.
//!
//! Any rmcp `ServerHandler` can serve tools to the live model: the server runs
//! on one end of an in-memory duplex pipe and this host drives it as an MCP
//! client on the other end.

use crate::tool::{FunctionDeclaration, ToolDispatchError, ToolHost};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rmcp::{
    ServerHandler, ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct McpToolHost {
    client: RunningService<RoleClient, ()>,
    declarations: Vec<FunctionDeclaration>,
    server_handle: JoinHandle<()>,
}

impl McpToolHost {
    /// Starts `server` in a background task and lists its tools once.
    ///
    /// The tool list is fixed for the lifetime of the host, matching the
    /// rule that a session's tool schema never changes after connect.
    pub async fn start<S: ServerHandler>(server: S) -> Result<Self> {
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        let server_handle = tokio::spawn(async move {
            match server.serve(server_transport).await {
                Ok(service) => {
                    let _ = service.waiting().await;
                }
                Err(e) => warn!(error = ?e, "MCP tool server failed to start"),
            }
        });
        let client = ()
            .serve(client_transport)
            .await
            .context("Failed to connect MCP client to tool server")?;

        let declarations = client
            .list_all_tools()
            .await
            .context("Failed to list MCP tools")?
            .into_iter()
            .map(|t| {
                Ok(FunctionDeclaration::new(
                    t.name.to_string(),
                    t.description.map(|d| d.to_string()).unwrap_or_default(),
                    serde_json::to_value(&*t.input_schema)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(tools = declarations.len(), "MCP tool host ready");

        Ok(Self {
            client,
            declarations,
            server_handle,
        })
    }
}

impl Drop for McpToolHost {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

#[async_trait]
impl ToolHost for McpToolHost {
    fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.declarations.clone()
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolDispatchError> {
        let failed = |message: String| ToolDispatchError::Failed {
            name: name.to_string(),
            message,
        };
        if !self.declarations.iter().any(|d| d.name == name) {
            return Err(ToolDispatchError::UnknownTool(name.to_string()));
        }

        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: args.as_object().cloned(),
            })
            .await
            .map_err(|e| failed(e.to_string()))?;

        let annotated_content = result
            .content
            .and_then(|mut content| content.pop())
            .ok_or_else(|| failed("Tool call returned no content".to_string()))?;
        let text = match annotated_content.raw {
            RawContent::Text(text_content) => text_content.text,
            _ => return Err(failed("Unexpected content type from tool".to_string())),
        };
        if result.is_error == Some(true) {
            return Err(failed(text));
        }
        Ok(Value::String(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{Document, Workspace, WorkspaceService};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    async fn host() -> (McpToolHost, Arc<Mutex<Workspace>>) {
        let workspace = Arc::new(Mutex::new(Workspace::new(vec![Document {
            title: "Plan".into(),
            body: "Ship it".into(),
        }])));
        let host = McpToolHost::start(WorkspaceService::new(workspace.clone(), None))
            .await
            .unwrap();
        (host, workspace)
    }

    #[tokio::test]
    async fn test_declarations_come_from_server_tools() {
        let (host, _) = host().await;
        let mut names: Vec<_> = host.declarations().into_iter().map(|d| d.name).collect();
        names.sort();
        assert_eq!(
            names,
            ["add_shortcut", "create_document", "list_documents", "read_document"]
        );
    }

    #[tokio::test]
    async fn test_dispatch_reaches_server_state() {
        let (host, workspace) = host().await;
        let result = host
            .dispatch("create_document", json!({"title": "Notes", "body": "hi"}))
            .await
            .unwrap();
        assert!(result.as_str().unwrap().contains("Notes"));
        assert!(workspace.lock().await.documents.contains_key("Notes"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected_locally() {
        let (host, _) = host().await;
        let err = host.dispatch("delete_everything", json!({})).await;
        assert!(matches!(err, Err(ToolDispatchError::UnknownTool(_))));
    }
}
