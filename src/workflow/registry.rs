//! Named workflow registry using ArcSwap
//!
//! Maps human-chosen names to document files plus a cached summary. Reads are
//! lock-free pointer loads; each write clones the map, updates it, persists the
//! index and swaps the new map in.

use crate::error::{Result, WorkflowError};
use crate::runtime::resolver::Resolver;
use crate::workflow::document::WorkflowDocument;
use crate::workflow::steps::Workflow;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::now_epoch;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Registry entry: where the document lives plus a summary of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub file_path: PathBuf,
    pub workflow_id: Uuid,
    pub name: String,
    pub version: String,
    pub step_count: usize,
    pub registered_at: f64,
}

/// Lock-free registry of named workflows
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: registered name
    entries: ArcSwap<BTreeMap<String, RegistryEntry>>,
    storage: WorkflowStorage,
    /// Serializes writers so the persisted index matches the swapped-in map
    writer: Mutex<()>,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            entries: ArcSwap::new(Arc::new(BTreeMap::new())),
            storage,
            writer: Mutex::new(()),
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    /// Restore the registry from the persisted index
    pub async fn init_from_storage(&self) -> Result<()> {
        self.storage.init().await?;
        let entries = self.storage.load_index().await?;
        self.entries.store(Arc::new(entries));
        tracing::info!("📚 Initialized workflow registry with {} workflows", self.entries.load().len());
        Ok(())
    }

    /// Save the workflow's document and register it under `name`
    ///
    /// `path` defaults to the slugged name inside the storage directory.
    /// Registering an existing name replaces its entry.
    pub async fn register(
        &self,
        name: &str,
        workflow: &Workflow,
        path: Option<PathBuf>,
    ) -> Result<RegistryEntry> {
        let _writer = self.writer.lock().await;
        let path = path.unwrap_or_else(|| self.storage.document_path(name));
        self.storage
            .save_document(&path, &WorkflowDocument::export(workflow))
            .await?;

        let entry = RegistryEntry {
            file_path: path,
            workflow_id: workflow.meta.id,
            name: workflow.meta.name.clone(),
            version: workflow.meta.version.clone(),
            step_count: workflow.steps.len(),
            registered_at: now_epoch(),
        };

        let mut next = (**self.entries.load()).clone();
        next.insert(name.to_string(), entry.clone());
        self.storage.save_index(&next).await?;
        self.entries.store(Arc::new(next));

        tracing::info!("📚 Registered workflow: {} -> {}", name, entry.file_path.display());
        Ok(entry)
    }

    /// Snapshot of every entry, ordered by name
    pub fn list(&self) -> BTreeMap<String, RegistryEntry> {
        (**self.entries.load()).clone()
    }

    pub fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.load().get(name).cloned()
    }

    /// Load a registered workflow's document into a fresh workflow
    pub async fn load_by_name(&self, name: &str, resolver: &Resolver) -> Result<Workflow> {
        let entry = self
            .get(name)
            .ok_or_else(|| WorkflowError::WorkflowNotRegistered(name.to_string()))?;
        let document = self.storage.load_document(&entry.file_path).await?;
        let workflow = document.into_workflow(resolver)?;
        tracing::info!("📂 Loaded registered workflow: {} ({} steps)", name, workflow.steps.len());
        Ok(workflow)
    }

    /// Drop an entry; the document file stays on disk
    pub async fn unregister(&self, name: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let mut next = (**self.entries.load()).clone();
        if next.remove(name).is_none() {
            tracing::warn!("⚠️ Workflow '{}' is not registered", name);
            return Ok(false);
        }
        self.storage.save_index(&next).await?;
        self.entries.store(Arc::new(next));
        tracing::info!("🗑️ Unregistered workflow: {}", name);
        Ok(true)
    }
}
