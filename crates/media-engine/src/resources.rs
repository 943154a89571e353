//! Temporary local resources and the ledger that counts them.
//!
//! Every fetched clip becomes a [`LocalResource`]: a scratch file or an
//! in-memory buffer. Allocations and releases are counted by a shared
//! [`ResourceLedger`] so a finished run can assert that nothing leaked.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct LedgerCounts {
    allocated: AtomicU64,
    released: AtomicU64,
}

/// Shared allocate/release counter. Cloning shares the counts.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    counts: Arc<LedgerCounts>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> u64 {
        self.counts.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.counts.released.load(Ordering::SeqCst)
    }

    /// Resources allocated but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.allocated().saturating_sub(self.released())
    }

    /// Returns the 1-based id of the new allocation.
    fn record_allocation(&self) -> u64 {
        self.counts.allocated.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_release(&self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Where a resource's bytes live.
#[derive(Debug, Clone)]
pub enum ResourceLocation {
    File(PathBuf),
    Memory(Arc<Vec<u8>>),
}

/// A fetched clip held locally until the run releases it.
///
/// Release is explicit through [`LocalResource::release`]; dropping an
/// unreleased resource releases it too and logs a warning.
#[derive(Debug)]
pub struct LocalResource {
    id: u64,
    source_uri: String,
    location: ResourceLocation,
    size_bytes: u64,
    ledger: ResourceLedger,
    released: bool,
}

impl LocalResource {
    /// Register a scratch file that now holds `source_uri`'s content.
    pub fn file(
        ledger: &ResourceLedger,
        source_uri: impl Into<String>,
        path: PathBuf,
        size_bytes: u64,
    ) -> Self {
        Self::register(ledger, source_uri.into(), ResourceLocation::File(path), size_bytes)
    }

    /// Register an in-memory buffer.
    pub fn memory(ledger: &ResourceLedger, source_uri: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len() as u64;
        Self::register(
            ledger,
            source_uri.into(),
            ResourceLocation::Memory(Arc::new(bytes)),
            size_bytes,
        )
    }

    fn register(
        ledger: &ResourceLedger,
        source_uri: String,
        location: ResourceLocation,
        size_bytes: u64,
    ) -> Self {
        let id = ledger.record_allocation();
        tracing::debug!(resource_id = id, uri = %source_uri, size_bytes, "Resource allocated");
        Self {
            id,
            source_uri,
            location,
            size_bytes,
            ledger: ledger.clone(),
            released: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    pub fn location(&self) -> &ResourceLocation {
        &self.location
    }

    /// Scratch path, for file-backed resources.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            ResourceLocation::File(path) => Some(path),
            ResourceLocation::Memory(_) => None,
        }
    }

    /// Buffer contents, for memory-backed resources.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.location {
            ResourceLocation::File(_) => None,
            ResourceLocation::Memory(bytes) => Some(bytes.as_slice()),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Delete the backing storage and count the release.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let ResourceLocation::File(path) = &self.location {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    resource_id = self.id,
                    path = %path.display(),
                    error = %e,
                    "Failed to delete scratch file"
                ),
            }
        }

        self.ledger.record_release();
        tracing::debug!(resource_id = self.id, "Resource released");
    }
}

impl Drop for LocalResource {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                resource_id = self.id,
                uri = %self.source_uri,
                "Resource dropped without explicit release"
            );
            self.release_inner();
        }
    }
}
