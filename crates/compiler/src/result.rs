//! Actions available once a compilation is done.
//!
//! Saving, downloading and sharing are independent: a failed save keeps
//! the artifact so the caller can retry, download or share instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dayreel_common::{ReelError, ReelResult};
use dayreel_model::{CompilationRecord, CompiledArtifact, SaveCompilation};

use crate::persistence::ArtifactStore;

const SHARE_TITLE: &str = "My Compilation";

/// What a [`ShareTarget`] receives.
#[derive(Debug, Clone, Copy)]
pub struct SharePayload<'a> {
    pub bytes: &'a [u8],
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub title: &'a str,
}

/// Somewhere a finished video can be handed off to, such as a system
/// share sheet.
#[async_trait]
pub trait ShareTarget: Send + Sync {
    /// Whether a file of `content_type` can be handed off.
    fn can_share(&self, content_type: &str) -> bool;

    /// Hand the video off. Returns [`ReelError::Cancelled`] when the user
    /// dismisses the share.
    async fn share(&self, payload: SharePayload<'_>) -> ReelResult<()>;
}

/// How a share request resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared,
    /// The user dismissed the share; nothing was written.
    Dismissed,
    /// No usable share target, so the video was downloaded instead.
    Downloaded(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CompilationResult {
    artifact: Arc<CompiledArtifact>,
    saved: Option<CompilationRecord>,
}

impl CompilationResult {
    pub fn new(artifact: Arc<CompiledArtifact>) -> Self {
        Self {
            artifact,
            saved: None,
        }
    }

    pub fn artifact(&self) -> &Arc<CompiledArtifact> {
        &self.artifact
    }

    pub fn is_saved(&self) -> bool {
        self.saved.is_some()
    }

    pub fn saved_record(&self) -> Option<&CompilationRecord> {
        self.saved.as_ref()
    }

    /// Build a save request for this artifact with the default title.
    pub fn save_request(
        &self,
        user_id: impl Into<String>,
        clip_ids: Vec<String>,
        journey: Option<(&str, &str)>,
    ) -> SaveCompilation {
        let today = chrono::Local::now().date_naive();
        SaveCompilation {
            user_id: user_id.into(),
            title: SaveCompilation::default_title(journey.map(|(_, name)| name), today),
            description: None,
            duration: self.artifact.duration_secs,
            clip_count: self.artifact.clip_count,
            clip_ids,
            journey_id: journey.map(|(id, _)| id.to_string()),
            is_draft: false,
        }
    }

    /// Persist the artifact. Saving twice returns the first record.
    pub async fn save(
        &mut self,
        store: &dyn ArtifactStore,
        request: SaveCompilation,
    ) -> ReelResult<&CompilationRecord> {
        if self.saved.is_none() {
            match store.save(&self.artifact, request).await {
                Ok(record) => self.saved = Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Save failed; compilation kept for retry");
                    return Err(e);
                }
            }
        }
        self.saved
            .as_ref()
            .ok_or_else(|| ReelError::storage("compilation record missing after save"))
    }

    /// Hand the artifact to `target`, downloading into `fallback_dir`
    /// when there is no target, it cannot take this content type, or the
    /// hand-off fails.
    pub async fn share(
        &self,
        target: Option<&dyn ShareTarget>,
        fallback_dir: &Path,
    ) -> ReelResult<ShareOutcome> {
        if let Some(target) = target {
            let content_type = self.artifact.format.content_type();
            if target.can_share(content_type) {
                let file_name = self
                    .artifact
                    .suggested_file_name(chrono::Utc::now().timestamp_millis());
                let payload = SharePayload {
                    bytes: &self.artifact.bytes,
                    file_name: &file_name,
                    content_type,
                    title: SHARE_TITLE,
                };
                match target.share(payload).await {
                    Ok(()) => {
                        tracing::info!(file_name = %file_name, content_type, "Compilation shared");
                        return Ok(ShareOutcome::Shared);
                    }
                    Err(ReelError::Cancelled) => return Ok(ShareOutcome::Dismissed),
                    Err(e) => tracing::warn!(error = %e, "Share failed; downloading instead"),
                }
            } else {
                tracing::debug!(content_type, "Share target cannot take this video; downloading");
            }
        }
        self.download(fallback_dir).await.map(ShareOutcome::Downloaded)
    }

    /// Write the artifact into `dir` as `compilation-<millis>.<ext>`.
    pub async fn download(&self, dir: &Path) -> ReelResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let millis = chrono::Utc::now().timestamp_millis();
        let path = dir.join(self.artifact.suggested_file_name(millis));
        tokio::fs::write(&path, &self.artifact.bytes).await?;
        tracing::info!(path = %path.display(), bytes = self.artifact.size_bytes(), "Compilation downloaded");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dayreel_platform_core::OutputFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyStore {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactStore for FlakyStore {
        async fn save(
            &self,
            _artifact: &CompiledArtifact,
            request: SaveCompilation,
        ) -> ReelResult<CompilationRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ReelError::storage("upload failed: network down"));
            }
            Ok(CompilationRecord {
                id: "rec-1".to_string(),
                user_id: request.user_id,
                title: request.title,
                description: request.description,
                video_url: "memory://rec-1.mp4".to_string(),
                duration: request.duration,
                clip_count: request.clip_count,
                clip_ids: request.clip_ids,
                journey_id: request.journey_id,
                is_draft: request.is_draft,
                created_at: "2026-01-01T00:00:00Z".to_string(),
            })
        }
    }

    fn result() -> CompilationResult {
        CompilationResult::new(Arc::new(CompiledArtifact {
            bytes: vec![9; 16],
            format: OutputFormat::MP4_H264,
            clip_count: 3,
            duration_secs: 6.0,
            width: 720,
            height: 1280,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }))
    }

    #[tokio::test]
    async fn test_failed_save_keeps_artifact_for_retry() {
        let store = FlakyStore {
            failures_left: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
        };
        let mut result = result();
        let request = result.save_request("user-1", vec!["a".into()], None);

        assert!(result.save(&store, request.clone()).await.is_err());
        assert!(!result.is_saved());
        assert_eq!(result.artifact().size_bytes(), 16);

        let record = result.save(&store, request.clone()).await.unwrap().clone();
        assert_eq!(record.clip_count, 3);
        assert!(result.is_saved());

        // Second save is answered from the stored record.
        result.save(&store, request).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_save_request_titles() {
        let result = result();
        let request = result.save_request("u", vec![], Some(("j-1", "Baby Mia")));
        assert_eq!(request.title, "Baby Mia Compilation");
        assert_eq!(request.journey_id.as_deref(), Some("j-1"));
        assert_eq!(request.duration, 6.0);

        let untitled = result.save_request("u", vec![], None);
        assert!(untitled.title.starts_with("Compilation - "));
    }

    #[derive(Clone, Copy)]
    enum Answer {
        Accept,
        Dismiss,
        Fail,
    }

    struct SheetTarget {
        accepts: &'static str,
        answer: Answer,
        received: std::sync::Mutex<Vec<(String, String, usize)>>,
    }

    impl SheetTarget {
        fn new(accepts: &'static str, answer: Answer) -> Self {
            Self {
                accepts,
                answer,
                received: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ShareTarget for SheetTarget {
        fn can_share(&self, content_type: &str) -> bool {
            content_type == self.accepts
        }

        async fn share(&self, payload: SharePayload<'_>) -> ReelResult<()> {
            self.received.lock().unwrap().push((
                payload.file_name.to_string(),
                payload.content_type.to_string(),
                payload.bytes.len(),
            ));
            match self.answer {
                Answer::Accept => Ok(()),
                Answer::Dismiss => Err(ReelError::Cancelled),
                Answer::Fail => Err(ReelError::unsupported("share sheet unavailable")),
            }
        }
    }

    fn share_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dayreel-share-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn test_share_hands_off_file_with_content_type() {
        let dir = share_dir("sheet");
        let target = SheetTarget::new("video/mp4", Answer::Accept);
        let outcome = result().share(Some(&target), &dir).await.unwrap();
        assert_eq!(outcome, ShareOutcome::Shared);

        let received = target.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        let (file_name, content_type, size) = &received[0];
        assert!(file_name.starts_with("compilation-") && file_name.ends_with(".mp4"));
        assert_eq!(content_type, "video/mp4");
        assert_eq!(*size, 16);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_share_without_target_downloads() {
        let dir = share_dir("none");
        let outcome = result().share(None, &dir).await.unwrap();
        let ShareOutcome::Downloaded(path) = outcome else {
            panic!("expected a download, got {outcome:?}");
        };
        assert_eq!(std::fs::read(&path).unwrap().len(), 16);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_share_falls_back_when_target_cannot_take_video() {
        let dir = share_dir("webm-only");
        let target = SheetTarget::new("video/webm", Answer::Accept);
        let outcome = result().share(Some(&target), &dir).await.unwrap();
        assert!(matches!(outcome, ShareOutcome::Downloaded(_)));
        assert!(target.received.lock().unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_failed_share_downloads_but_dismissal_does_not() {
        let dir = share_dir("fail");
        let failing = SheetTarget::new("video/mp4", Answer::Fail);
        let outcome = result().share(Some(&failing), &dir).await.unwrap();
        assert!(matches!(outcome, ShareOutcome::Downloaded(_)));
        let _ = std::fs::remove_dir_all(&dir);

        let dir = share_dir("dismiss");
        let dismissing = SheetTarget::new("video/mp4", Answer::Dismiss);
        let outcome = result().share(Some(&dismissing), &dir).await.unwrap();
        assert_eq!(outcome, ShareOutcome::Dismissed);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_download_uses_format_extension() {
        let dir = std::env::temp_dir().join(format!("dayreel-download-{}", std::process::id()));
        let path = result().download(&dir).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("compilation-"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(std::fs::read(&path).unwrap().len(), 16);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
