//! Loading and saving the workspace documents as Markdown files.

use anyhow::Context;
use live_core::workspace::{Document, Workspace};
use std::fs;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Reads every `*.md` file in `dir` as a document titled by its file stem.
///
/// A missing directory is an empty workspace.
pub fn load_workspace(dir: &Path) -> anyhow::Result<Workspace> {
    if !dir.exists() {
        warn!(path = %dir.display(), "Workspace directory not found; starting empty");
        return Ok(Workspace::default());
    }
    let mut documents = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let title = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let body = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            documents.push(Document { title, body });
        }
    }
    info!(documents = documents.len(), path = %dir.display(), "Workspace loaded");
    Ok(Workspace::new(documents))
}

/// Writes every document back as `<title>.md`.
pub fn save_documents(dir: &Path, workspace: &Workspace) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for doc in workspace.documents.values() {
        let file_name = sanitize_title(&doc.title);
        if file_name.is_empty() {
            warn!(title = %doc.title, "Skipping document with an unusable title");
            continue;
        }
        let path = dir.join(format!("{file_name}.md"));
        fs::write(&path, &doc.body).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Persists every change broadcast by the workspace tool server.
pub async fn persist_changes(dir: &Path, mut changes: mpsc::Receiver<Workspace>) {
    while let Some(workspace) = changes.recv().await {
        if let Err(e) = save_documents(dir, &workspace) {
            warn!(error = %e, "Failed to persist workspace change");
        }
    }
}

fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '\0'))
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .to_string()
}
