use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{LibError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    GraphData,
    Visual,
    AnalysisResult,
}

impl BlobKind {
    const fn file_stem(self) -> &'static str {
        match self {
            BlobKind::GraphData => "graph_data_file",
            BlobKind::Visual => "graph_visual_file",
            BlobKind::AnalysisResult => "graph_results_file",
        }
    }

    const fn extension(self) -> &'static str {
        match self {
            BlobKind::GraphData | BlobKind::AnalysisResult => "json",
            BlobKind::Visual => "svg",
        }
    }
}

/// Fresh, never-reused key: `<prefix>/<kind stem>_<uuid>.<ext>`.
pub fn new_blob_key(prefix: &str, kind: BlobKind) -> String {
    format!(
        "{}/{}_{}.{}",
        prefix,
        kind.file_stem(),
        Uuid::new_v4(),
        kind.extension()
    )
}

/// Key-addressed binary storage for payloads, renders and results.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fails with `NotFound` when no blob is stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

fn missing_blob(key: &str) -> LibError {
    LibError::not_found("Stored blob not found", anyhow!("blob {} does not exist", key))
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs
            .read()
            .map(|blobs| blobs.contains_key(key))
            .unwrap_or(false)
    }
}

fn poisoned() -> LibError {
    LibError::storage("Blob storage is unavailable", anyhow!("blob map lock poisoned"))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .map_err(|_| poisoned())?
            .get(key)
            .cloned()
            .ok_or_else(|| missing_blob(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}

/// Stores each blob as a file under `root`, mirroring the key's path segments.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|err| {
            LibError::storage(
                "Failed to prepare blob directory",
                anyhow!("{}: {}", root.display(), err),
            )
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !well_formed {
            return Err(LibError::invalid(
                "Blob key is not a relative path",
                anyhow!("rejected blob key {:?}", key),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // temp-file-then-rename so readers never observe a partial blob
        let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(missing_blob(key)),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
