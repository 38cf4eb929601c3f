use crate::ids::IndexId;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whether an index can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStatus {
    Ok,
    /// Corruption was detected; the owner should rebuild.
    RequiresRebuild,
    /// A rebuild is running.
    DoingRebuild,
}

/// Emitted once per transition into [`RebuildStatus::RequiresRebuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRequest {
    pub index: IndexId,
    pub cause: String,
}

pub type RebuildListener = Arc<dyn Fn(&RebuildRequest) + Send + Sync>;

pub(crate) struct RebuildState {
    status: Mutex<RebuildStatus>,
    last_request: Mutex<Option<RebuildRequest>>,
    listeners: Mutex<Vec<RebuildListener>>,
    /// Present for persistent indexes: the file exists while a rebuild is
    /// owed, so the next open discards the directory.
    marker: Mutex<Option<PathBuf>>,
}

impl RebuildState {
    pub(crate) fn new(status: RebuildStatus, marker: Option<PathBuf>) -> Self {
        Self {
            status: Mutex::new(status),
            last_request: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            marker: Mutex::new(marker),
        }
    }

    /// Stops touching the marker file; the directory is about to be released.
    pub(crate) fn detach_marker(&self) {
        self.marker.lock().take();
    }

    pub(crate) fn status(&self) -> RebuildStatus {
        *self.status.lock()
    }

    pub(crate) fn last_request(&self) -> Option<RebuildRequest> {
        self.last_request.lock().clone()
    }

    pub(crate) fn subscribe(&self, listener: RebuildListener) {
        self.listeners.lock().push(listener);
    }

    /// Moves to `RequiresRebuild`. Returns `false` (and notifies nobody) when a
    /// rebuild was already requested.
    pub(crate) fn request(&self, index: &IndexId, cause: String) -> bool {
        {
            let mut status = self.status.lock();
            if *status == RebuildStatus::RequiresRebuild {
                return false;
            }
            *status = RebuildStatus::RequiresRebuild;
            if let Some(marker) = self.marker.lock().as_deref() {
                write_marker(marker, &cause);
            }
        }

        tracing::warn!(
            target = "nova.index",
            index = %index,
            cause = %cause,
            "index rebuild requested"
        );

        let request = RebuildRequest {
            index: index.clone(),
            cause,
        };
        *self.last_request.lock() = Some(request.clone());

        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(&request);
        }
        true
    }

    /// `RequiresRebuild` or `Ok` -> `DoingRebuild`. Returns `false` if a rebuild
    /// is already running.
    pub(crate) fn begin(&self) -> bool {
        let mut status = self.status.lock();
        if *status == RebuildStatus::DoingRebuild {
            return false;
        }
        *status = RebuildStatus::DoingRebuild;
        true
    }

    /// `DoingRebuild` -> `Ok`. A request raised while rebuilding wins and
    /// `false` is returned.
    pub(crate) fn finish(&self) -> bool {
        let mut status = self.status.lock();
        if *status != RebuildStatus::DoingRebuild {
            return false;
        }
        *status = RebuildStatus::Ok;
        if let Some(marker) = self.marker.lock().as_deref() {
            remove_marker(marker);
        }
        true
    }
}

fn write_marker(path: &Path, cause: &str) {
    if let Err(err) = nova_storage::atomic_write(path, cause.as_bytes()) {
        tracing::warn!(
            target = "nova.index",
            path = %path.display(),
            error = %err,
            "failed to persist rebuild marker"
        );
    }
}

fn remove_marker(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(
            target = "nova.index",
            path = %path.display(),
            error = %err,
            "failed to remove rebuild marker"
        ),
    }
}
