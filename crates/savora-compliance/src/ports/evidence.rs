//! Evidence blob store port.
//!
//! The engine only ever stores and compares the opaque references this port
//! returns; raw bytes and URL signing stay behind the boundary.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ComplianceError, Result};

/// Trait for evidence upload and retrieval.
#[async_trait::async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Store a file, returning an opaque reference.
    async fn upload(&self, owner_id: &str, item_id: &str, bytes: Vec<u8>) -> Result<String>;

    /// Resolve a reference to a short-lived fetch URL.
    async fn resolve(&self, reference: &str) -> Result<String>;
}

/// In-memory evidence store for testing.
#[derive(Debug, Default)]
pub struct InMemoryEvidenceStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryEvidenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EvidenceStore for InMemoryEvidenceStore {
    async fn upload(&self, owner_id: &str, item_id: &str, bytes: Vec<u8>) -> Result<String> {
        let reference = format!("evidence://{owner_id}/{item_id}/{}", Uuid::new_v4());
        self.blobs.write().await.insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn resolve(&self, reference: &str) -> Result<String> {
        let blobs = self.blobs.read().await;
        if blobs.contains_key(reference) {
            Ok(format!("https://evidence.local/fetch/{reference}"))
        } else {
            Err(ComplianceError::Store(format!(
                "unknown evidence reference: {reference}"
            )))
        }
    }
}
