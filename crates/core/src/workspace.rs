//! Workspace Tool Service
//!
//! The host application's documents and shortcuts, exposed to the live model
//! as Model Context Protocol (MCP) tools. The same state doubles as the
//! [`ContextSource`] that grounds one-shot multimodal queries.

use crate::context::ContextSource;
use async_trait::async_trait;
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

// --- Workspace State ---

/// A titled text document owned by the host.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct Document {
    pub title: String,
    pub body: String,
}

/// A named pointer to something the user opens often (a URL, a path).
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct Shortcut {
    pub name: String,
    pub target: String,
}

/// Everything the host currently holds, keyed by title/name.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Default)]
pub struct Workspace {
    pub documents: BTreeMap<String, Document>,
    pub shortcuts: BTreeMap<String, Shortcut>,
}

impl Workspace {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents
                .into_iter()
                .map(|d| (d.title.clone(), d))
                .collect(),
            shortcuts: BTreeMap::new(),
        }
    }

    /// One short line per item, documents first.
    pub fn descriptors(&self) -> Vec<String> {
        self.documents
            .keys()
            .map(|title| format!("document: {title}"))
            .chain(
                self.shortcuts
                    .values()
                    .map(|s| format!("shortcut: {} -> {}", s.name, s.target)),
            )
            .collect()
    }
}

// --- Data Structures for Tools ---

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ReadDocumentArgs {
    /// Exact title of the document to read.
    pub title: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct CreateDocumentArgs {
    /// Title of the new document. An existing document with this title is replaced.
    pub title: String,
    /// Plain-text content of the document.
    pub body: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct AddShortcutArgs {
    /// Short name the user will refer to the shortcut by.
    pub name: String,
    #[schemars(description = "What the shortcut opens: a URL or a file path")]
    pub target: String,
}

// --- Service and Handler Implementation ---

/// MCP tool server over a shared [`Workspace`].
pub struct WorkspaceService {
    pub workspace: Arc<Mutex<Workspace>>,
    /// Optional channel notified after every mutation.
    pub changes_tx: Option<mpsc::Sender<Workspace>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for WorkspaceService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl WorkspaceService {
    pub fn new(
        workspace: Arc<Mutex<Workspace>>,
        changes_tx: Option<mpsc::Sender<Workspace>>,
    ) -> Self {
        Self {
            workspace,
            changes_tx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List the titles of all documents and the names of all shortcuts.")]
    pub async fn list_documents(&self) -> Result<String, String> {
        info!("Executing tool 'list_documents'");
        let workspace = self.workspace.lock().await;
        serde_json::to_string(&workspace.descriptors())
            .map_err(|e| format!("Failed to serialize workspace: {}", e))
    }

    #[tool(description = "Read the full text of a document by its title.")]
    pub async fn read_document(
        &self,
        args: Parameters<ReadDocumentArgs>,
    ) -> Result<String, String> {
        info!(title = %args.0.title, "Executing tool 'read_document'");
        let workspace = self.workspace.lock().await;
        workspace
            .documents
            .get(&args.0.title)
            .map(|d| d.body.clone())
            .ok_or_else(|| format!("Document '{}' not found.", args.0.title))
    }

    #[tool(description = "Create or replace a document with the given title and body.")]
    pub async fn create_document(
        &self,
        args: Parameters<CreateDocumentArgs>,
    ) -> Result<String, String> {
        info!(title = %args.0.title, "Executing tool 'create_document'");
        let Parameters(CreateDocumentArgs { title, body }) = args;
        let mut workspace = self.workspace.lock().await;
        let replaced = workspace
            .documents
            .insert(title.clone(), Document {
                title: title.clone(),
                body,
            })
            .is_some();
        self.notify(&workspace).await;
        Ok(if replaced {
            format!("OK. Document '{}' replaced.", title)
        } else {
            format!("OK. Document '{}' created.", title)
        })
    }

    #[tool(description = "Add a named shortcut to a URL or file path.")]
    pub async fn add_shortcut(&self, args: Parameters<AddShortcutArgs>) -> Result<String, String> {
        info!(name = %args.0.name, "Executing tool 'add_shortcut'");
        let Parameters(AddShortcutArgs { name, target }) = args;
        if target.trim().is_empty() {
            return Err("Shortcut target must not be empty.".to_string());
        }
        let mut workspace = self.workspace.lock().await;
        workspace
            .shortcuts
            .insert(name.clone(), Shortcut {
                name: name.clone(),
                target,
            });
        self.notify(&workspace).await;
        Ok(format!("OK. Shortcut '{}' added.", name))
    }
}

impl WorkspaceService {
    async fn notify(&self, workspace: &Workspace) {
        if let Some(tx) = &self.changes_tx {
            if tx.send(workspace.clone()).await.is_err() {
                tracing::warn!("Failed to broadcast workspace change: receiver dropped.");
            }
        }
    }
}

#[async_trait]
impl ContextSource for WorkspaceService {
    async fn describe(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.workspace.lock().await.descriptors())
    }
}
