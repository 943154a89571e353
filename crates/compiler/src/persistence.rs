//! Hand-off of finished compilations to storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dayreel_common::{ReelError, ReelResult};
use dayreel_model::{
    generate_record_id, CompilationRecord, CompiledArtifact, RecordError, SaveCompilation,
};

/// Persists an artifact together with its compilation record.
///
/// Upload and metadata insert form one operation from the caller's
/// point of view: either a record comes back or nothing was saved.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(
        &self,
        artifact: &CompiledArtifact,
        request: SaveCompilation,
    ) -> ReelResult<CompilationRecord>;
}

/// Store that keeps `<id>.<ext>` and `<id>.json` side by side in a
/// directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn write_record(&self, record: &CompilationRecord) -> Result<(), RecordError> {
        let path = self.record_path(&record.id);
        let json = serde_json::to_vec_pretty(record).map_err(|source| RecordError::ParseError {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| RecordError::IoError { path, source })
    }

    /// Load one record by id.
    pub async fn get(&self, id: &str) -> Result<CompilationRecord, RecordError> {
        let path = self.record_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecordError::NotFound { id: id.to_string() })
            }
            Err(source) => return Err(RecordError::IoError { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| RecordError::ParseError { path, source })
    }

    /// All stored records, newest first. Unreadable records are skipped
    /// with a warning.
    pub async fn list(&self) -> Result<Vec<CompilationRecord>, RecordError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RecordError::IoError {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut records = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| RecordError::IoError {
                path: self.root.clone(),
                source,
            })?;
            let Some(entry) = entry else {
                break;
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(id).await {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Clear the draft flag on a saved compilation.
    pub async fn promote_draft(&self, id: &str) -> Result<CompilationRecord, RecordError> {
        let mut record = self.get(id).await?;
        if record.is_draft {
            record.is_draft = false;
            self.write_record(&record).await?;
            tracing::info!(id = %id, "Draft compilation promoted");
        }
        Ok(record)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(
        &self,
        artifact: &CompiledArtifact,
        request: SaveCompilation,
    ) -> ReelResult<CompilationRecord> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            ReelError::storage(format!("cannot create {}: {e}", self.root.display()))
        })?;

        let id = generate_record_id();
        let video_path = self.root.join(format!("{id}.{}", artifact.extension()));
        tokio::fs::write(&video_path, &artifact.bytes)
            .await
            .map_err(|e| ReelError::storage(format!("upload failed: {e}")))?;

        let record = CompilationRecord {
            id,
            user_id: request.user_id,
            title: request.title,
            description: request.description,
            video_url: video_path.to_string_lossy().into_owned(),
            duration: request.duration,
            clip_count: request.clip_count,
            clip_ids: request.clip_ids,
            journey_id: request.journey_id,
            is_draft: request.is_draft,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        if let Err(e) = self.write_record(&record).await {
            let _ = tokio::fs::remove_file(&video_path).await;
            return Err(ReelError::storage(format!("failed to save compilation: {e}")));
        }

        tracing::info!(
            id = %record.id,
            bytes = artifact.size_bytes(),
            content_type = artifact.format.content_type(),
            "Compilation saved"
        );
        Ok(record)
    }
}
