//! Directory-backed knowledge index.
//!
//! Each knowledge base lives in `{dir}/{org_id}/{user_id}/{kb}` and holds
//! one text file per ingested document under `documents/` plus a
//! `manifest.json` mapping index paths to documents. The manifest is kept
//! in memory and written on flush.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use ulid::Ulid;

use kbsync_lifecycle::{IndexOutcome, IngestRequest, KnowledgeIndex, SyncError, TextSource};
use kbsync_types::Identity;

/// Knowledge base used when the event names none.
pub const DEFAULT_KNOWLEDGE_BASE: &str = "default";

const MANIFEST_FILE: &str = "manifest.json";
const DOCUMENTS_DIR: &str = "documents";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub full_path: PathBuf,
    pub text_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// Index path -> document.
pub type Manifest = BTreeMap<String, IndexedDocument>;

type ManifestKey = (Identity, String);

pub struct DirectoryIndex {
    dir: PathBuf,
    manifests: DashMap<ManifestKey, Manifest>,
}

fn index_error(op: &str, path: &Path, e: impl std::fmt::Display) -> SyncError {
    SyncError::IndexSync(format!("{} {}: {}", op, path.display(), e))
}

impl DirectoryIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            manifests: DashMap::new(),
        }
    }

    pub fn knowledge_base_dir(&self, identity: &Identity, knowledge_base_id: &str) -> PathBuf {
        self.dir
            .join(&identity.org_id)
            .join(&identity.user_id)
            .join(knowledge_base_id)
    }

    /// Copy of the manifest, loading it from disk on first use.
    pub async fn manifest(
        &self,
        identity: &Identity,
        knowledge_base_id: &str,
    ) -> Result<Manifest, SyncError> {
        let key = (identity.clone(), knowledge_base_id.to_string());
        if let Some(manifest) = self.manifests.get(&key) {
            return Ok(manifest.clone());
        }

        let path = self
            .knowledge_base_dir(identity, knowledge_base_id)
            .join(MANIFEST_FILE);
        let loaded: Manifest = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| index_error("parse", &path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::new(),
            Err(e) => return Err(index_error("read", &path, e)),
        };
        Ok(self.manifests.entry(key).or_insert(loaded).clone())
    }

    /// Mutate a loaded manifest in place.
    fn update<R>(
        &self,
        identity: &Identity,
        knowledge_base_id: &str,
        f: impl FnOnce(&mut Manifest) -> R,
    ) -> R {
        let mut manifest = self
            .manifests
            .entry((identity.clone(), knowledge_base_id.to_string()))
            .or_default();
        f(&mut manifest)
    }

    /// Extracted text of one indexed document.
    pub async fn document_text(
        &self,
        identity: &Identity,
        knowledge_base_id: &str,
        index_path: &str,
    ) -> Result<Option<String>, SyncError> {
        let manifest = self.manifest(identity, knowledge_base_id).await?;
        let Some(document) = manifest.get(index_path) else {
            return Ok(None);
        };
        let path = self
            .knowledge_base_dir(identity, knowledge_base_id)
            .join(DOCUMENTS_DIR)
            .join(&document.text_file);
        fs::read_to_string(&path)
            .await
            .map(Some)
            .map_err(|e| index_error("read", &path, e))
    }

    async fn remove_text(&self, identity: &Identity, knowledge_base_id: &str, text_file: &str) {
        let path = self
            .knowledge_base_dir(identity, knowledge_base_id)
            .join(DOCUMENTS_DIR)
            .join(text_file);
        if let Err(e) = fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Could not remove indexed text");
        }
    }
}

#[async_trait]
impl KnowledgeIndex for DirectoryIndex {
    async fn knowledge_base_id(
        &self,
        _identity: &Identity,
        extra_info: &Value,
    ) -> Result<String, SyncError> {
        let id = extra_info
            .get("knowledge_base")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_KNOWLEDGE_BASE);
        if id.is_empty() || id.contains(['/', '\\']) || id == ".." {
            return Err(SyncError::Validation(format!(
                "invalid knowledge base id '{}'",
                id
            )));
        }
        Ok(id.to_string())
    }

    async fn ingest_file(
        &self,
        request: &IngestRequest,
        text: TextSource,
    ) -> Result<IndexOutcome, SyncError> {
        let contents = text.read_to_string().await?;
        let kb_dir = self.knowledge_base_dir(&request.identity, &request.knowledge_base_id);
        let documents_dir = kb_dir.join(DOCUMENTS_DIR);
        fs::create_dir_all(&documents_dir)
            .await
            .map_err(|e| index_error("create", &documents_dir, e))?;

        let text_file = format!("{}.txt", Ulid::new());
        let text_path = documents_dir.join(&text_file);
        fs::write(&text_path, contents.as_bytes())
            .await
            .map_err(|e| index_error("write", &text_path, e))?;

        self.manifest(&request.identity, &request.knowledge_base_id)
            .await?;
        let document = IndexedDocument {
            full_path: request.full_path.clone(),
            text_file,
            language: request.language.clone(),
            indexed_at: Utc::now(),
        };
        let replaced = self.update(&request.identity, &request.knowledge_base_id, |m| {
            m.insert(request.index_path.clone(), document)
        });
        if let Some(old) = replaced {
            self.remove_text(&request.identity, &request.knowledge_base_id, &old.text_file)
                .await;
        }

        info!(
            path = %request.index_path,
            knowledge_base = %request.knowledge_base_id,
            chars = contents.len(),
            "Ingested document"
        );
        Ok(IndexOutcome::success())
    }

    async fn uningest_file(
        &self,
        full_path: &Path,
        identity: &Identity,
        knowledge_base_id: &str,
    ) -> Result<IndexOutcome, SyncError> {
        self.manifest(identity, knowledge_base_id).await?;
        let removed: Vec<IndexedDocument> = self.update(identity, knowledge_base_id, |m| {
            let keys: Vec<String> = m
                .iter()
                .filter(|(_, doc)| doc.full_path == full_path)
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| m.remove(key)).collect()
        });

        for document in &removed {
            self.remove_text(identity, knowledge_base_id, &document.text_file)
                .await;
        }
        debug!(path = %full_path.display(), removed = removed.len(), "Uningested document");
        Ok(IndexOutcome {
            result: !removed.is_empty(),
        })
    }

    async fn rename_file(
        &self,
        from: &Path,
        to: &Path,
        to_index_path: &str,
        identity: &Identity,
        knowledge_base_id: &str,
    ) -> Result<IndexOutcome, SyncError> {
        self.manifest(identity, knowledge_base_id).await?;
        let moved = self.update(identity, knowledge_base_id, |m| {
            let key = m
                .iter()
                .find(|(_, doc)| doc.full_path == from)
                .map(|(key, _)| key.clone());
            match key.and_then(|key| m.remove(&key)) {
                Some(mut document) => {
                    document.full_path = to.to_path_buf();
                    m.insert(to_index_path.to_string(), document);
                    true
                }
                None => false,
            }
        });
        if !moved {
            debug!(from = %from.display(), "Rename of a document that is not indexed");
        }
        Ok(IndexOutcome { result: moved })
    }

    /// Drop manifest entries whose text is gone.
    async fn rebuild(&self, identity: &Identity, knowledge_base_id: &str) -> Result<(), SyncError> {
        let manifest = self.manifest(identity, knowledge_base_id).await?;
        let documents_dir = self
            .knowledge_base_dir(identity, knowledge_base_id)
            .join(DOCUMENTS_DIR);
        let mut dangling = Vec::new();
        for (key, document) in manifest {
            if fs::metadata(documents_dir.join(&document.text_file)).await.is_err() {
                warn!(path = %key, "Dropping index entry with missing text");
                dangling.push((key, document.text_file));
            }
        }
        self.update(identity, knowledge_base_id, |m| {
            for (key, text_file) in dangling {
                if m.get(&key).map(|doc| doc.text_file == text_file).unwrap_or(false) {
                    m.remove(&key);
                }
            }
        });
        Ok(())
    }

    async fn flush(&self, identity: &Identity, knowledge_base_id: &str) -> Result<(), SyncError> {
        let manifest = self.manifest(identity, knowledge_base_id).await?;
        let kb_dir = self.knowledge_base_dir(identity, knowledge_base_id);
        fs::create_dir_all(&kb_dir)
            .await
            .map_err(|e| index_error("create", &kb_dir, e))?;

        let path = kb_dir.join(MANIFEST_FILE);
        let working = kb_dir.join(format!(".{}.{}", MANIFEST_FILE, Ulid::new()));
        let raw = serde_json::to_vec_pretty(&manifest).map_err(|e| index_error("encode", &path, e))?;
        fs::write(&working, raw)
            .await
            .map_err(|e| index_error("write", &working, e))?;
        fs::rename(&working, &path)
            .await
            .map_err(|e| index_error("rename", &path, e))?;
        debug!(knowledge_base = knowledge_base_id, documents = manifest.len(), "Flushed manifest");
        Ok(())
    }
}
