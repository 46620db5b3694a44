//! Bounded, read-only digest of host-side state used to ground one-shot queries.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Maximum number of descriptors kept in a snapshot.
pub const MAX_ENTRIES: usize = 100;
/// Maximum length of a single descriptor, in characters.
pub const MAX_DESCRIPTOR_CHARS: usize = 160;

/// Anything on the host that can describe its current state as short lines.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn describe(&self) -> anyhow::Result<Vec<String>>;
}

/// An ordered list of short descriptors, capped at [`MAX_ENTRIES`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    entries: Vec<String>,
}

impl ContextSnapshot {
    /// Builds a snapshot, truncating each descriptor and dropping blank ones.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = String>) -> Self {
        let entries = descriptors
            .into_iter()
            .map(|d| d.trim().chars().take(MAX_DESCRIPTOR_CHARS).collect::<String>())
            .filter(|d| !d.is_empty())
            .take(MAX_ENTRIES)
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the snapshot as a bulleted block, or an empty string.
    pub fn to_grounding_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Rebuilds and serves the latest [`ContextSnapshot`].
///
/// Grounding is an enhancement only: a failing source leaves an empty
/// snapshot behind and never surfaces an error.
#[derive(Clone)]
pub struct ContextSnapshotProvider {
    source: Option<Arc<dyn ContextSource>>,
    snapshot: Arc<RwLock<ContextSnapshot>>,
}

impl ContextSnapshotProvider {
    pub fn new(source: Arc<dyn ContextSource>) -> Self {
        Self {
            source: Some(source),
            snapshot: Arc::default(),
        }
    }

    /// A provider with nothing to describe.
    pub fn empty() -> Self {
        Self {
            source: None,
            snapshot: Arc::default(),
        }
    }

    pub async fn refresh(&self) {
        let Some(source) = &self.source else {
            return;
        };
        let snapshot = match source.describe().await {
            Ok(descriptors) => ContextSnapshot::from_descriptors(descriptors),
            Err(e) => {
                warn!(error = %e, "Context refresh failed; grounding will be empty");
                ContextSnapshot::default()
            }
        };
        debug!(entries = snapshot.entries().len(), "Context snapshot refreshed");
        *self.snapshot.write().await = snapshot;
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn grounding_text(&self) -> String {
        self.snapshot.read().await.to_grounding_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct Fixed(Vec<String>);

    #[async_trait]
    impl ContextSource for Fixed {
        async fn describe(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl ContextSource for Broken {
        async fn describe(&self) -> anyhow::Result<Vec<String>> {
            Err(anyhow!("store offline"))
        }
    }

    #[test]
    fn test_snapshot_is_capped_and_truncated() {
        let long = "x".repeat(MAX_DESCRIPTOR_CHARS * 2);
        let descriptors = std::iter::once(long)
            .chain((0..300).map(|i| format!("document {i}")))
            .collect::<Vec<_>>();
        let snapshot = ContextSnapshot::from_descriptors(descriptors);

        assert_eq!(snapshot.entries().len(), MAX_ENTRIES);
        assert_eq!(snapshot.entries()[0].chars().count(), MAX_DESCRIPTOR_CHARS);
        assert_eq!(snapshot.entries()[1], "document 0");
    }

    #[test]
    fn test_blank_descriptors_are_dropped() {
        let snapshot =
            ContextSnapshot::from_descriptors(vec!["  ".into(), "shortcut: mail".into()]);
        assert_eq!(snapshot.to_grounding_text(), "- shortcut: mail");
    }

    #[tokio::test]
    async fn test_refresh_stores_descriptors() {
        let provider = ContextSnapshotProvider::new(Arc::new(Fixed(vec![
            "document: Notes".into(),
            "document: Plan".into(),
        ])));
        provider.refresh().await;
        assert_eq!(
            provider.grounding_text().await,
            "- document: Notes\n- document: Plan"
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_yields_empty_grounding() {
        let provider = ContextSnapshotProvider::new(Arc::new(Broken));
        provider.refresh().await;
        assert!(provider.snapshot().await.is_empty());
        assert_eq!(provider.grounding_text().await, "");
    }
}
