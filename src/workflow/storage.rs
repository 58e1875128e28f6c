//! File persistence for workflow documents and the registry index
//!
//! One JSON document per registered workflow plus `registry.json` holding the
//! name -> entry index, all inside a single directory.

use crate::error::{Result, WorkflowError};
use crate::workflow::document::WorkflowDocument;
use crate::workflow::registry::RegistryEntry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "registry.json";

/// Deterministic document file name for a workflow name
///
/// Lower-cased; spaces and every other non-alphanumeric character become `_`.
pub fn document_file_name(name: &str) -> String {
    let stem: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "workflow.json".to_string()
    } else {
        format!("{}.json", stem)
    }
}

/// Directory-backed workflow storage
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    dir: PathBuf,
}

impl WorkflowStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the storage directory; safe to call repeatedly
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub fn document_path(&self, name: &str) -> PathBuf {
        self.dir.join(document_file_name(name))
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub async fn save_document(&self, path: &Path, document: &WorkflowDocument) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(path, document.to_json()?.as_bytes()).await?;
        tracing::info!("💾 Saved workflow document: {}", path.display());
        Ok(())
    }

    pub async fn load_document(&self, path: &Path) -> Result<WorkflowDocument> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WorkflowError::Storage(format!("{}: {}", path.display(), e)))?;
        WorkflowDocument::from_json(&json)
    }

    /// Load the registry index; a missing index is an empty registry
    pub async fn load_index(&self) -> Result<BTreeMap<String, RegistryEntry>> {
        let path = self.index_path();
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&json)
            .map_err(|e| WorkflowError::Storage(format!("{}: {}", path.display(), e)))
    }

    pub async fn save_index(&self, entries: &BTreeMap<String, RegistryEntry>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| WorkflowError::Storage(e.to_string()))?;
        write_atomic(&self.index_path(), json.as_bytes()).await
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
