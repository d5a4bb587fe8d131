//! Ephemeral local resources bracketing a pipeline run.
//!
//! Every handle handed out by [`TempResources`] is released exactly once,
//! either explicitly through `release()` or implicitly on drop, so early
//! returns through `?` never leak a credential file or an audio buffer.
//! Remote artifacts are never tracked here.

use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

/// Acquire/release counters shared by all handles of a manager.
#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Snapshot of the acquire/release counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempResourceStats {
    pub acquired: usize,
    pub released: usize,
}

impl TempResourceStats {
    pub fn outstanding(&self) -> usize {
        self.acquired.saturating_sub(self.released)
    }
}

/// Allocates transient files and buffers under a working directory.
#[derive(Debug, Clone)]
pub struct TempResources {
    work_dir: PathBuf,
    counters: Arc<Counters>,
}

impl TempResources {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn stats(&self) -> TempResourceStats {
        TempResourceStats {
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
        }
    }

    /// Write `contents` to a fresh file under the working directory.
    ///
    /// The file is persisted (not auto-deleted by `tempfile`) so that external
    /// processes can open it by path; removal happens when the handle is released.
    pub fn acquire_file(&self, suffix: &str, contents: &[u8]) -> std::io::Result<TempFileHandle> {
        std::fs::create_dir_all(&self.work_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("tubevault-")
            .suffix(suffix)
            .tempfile_in(&self.work_dir)?;
        file.write_all(contents)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        debug!("Acquired temp file {:?}", path);
        Ok(TempFileHandle {
            path,
            counters: Some(self.counters.clone()),
        })
    }

    /// Take ownership of an in-memory buffer for the duration of a run.
    pub fn acquire_buffer(&self, bytes: Vec<u8>) -> TempBuffer {
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        TempBuffer {
            bytes,
            counters: Some(self.counters.clone()),
        }
    }
}

/// A file on local disk removed on release.
#[derive(Debug)]
pub struct TempFileHandle {
    path: PathBuf,
    counters: Option<Arc<Counters>>,
}

impl TempFileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(counters) = self.counters.take() else {
            return;
        };
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temp file {:?}", self.path),
            // Already gone: nothing to release.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temp file {:?}: {}", self.path, e),
        }
        counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for TempFileHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// An in-memory byte buffer counted against its manager until released.
#[derive(Debug)]
pub struct TempBuffer {
    bytes: Vec<u8>,
    counters: Option<Arc<Counters>>,
}

impl TempBuffer {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(counters) = self.counters.take() {
            self.bytes = Vec::new();
            counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Deref for TempBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for TempBuffer {
    fn drop(&mut self) {
        self.release_inner();
    }
}
