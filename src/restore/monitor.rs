//! Registry of live restore sessions and their progress.
//!
//! At most one session runs per backup. The monitor observes each session
//! it starts, counting bytes received per supplier slot, and forgets the
//! backup as soon as the session resolves.

use super::session::{AbortHandle, RestoreContext, RestoreRequest, RestoreSession};
use super::traits::RestoreObserver;
use super::{RestoreError, RestoreReport};
use crate::ids::{BackupId, FragmentKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWrite;
use tracing::debug;

/// Called once per session with its outcome.
pub type DoneCallback = Arc<dyn Fn(&BackupId, &Result<RestoreReport, RestoreError>) + Send + Sync>;

/// Owned registry of running restores. Clones share state.
#[derive(Clone, Default)]
pub struct RestoreMonitor {
    inner: Arc<Mutex<MonitorState>>,
}

#[derive(Default)]
struct MonitorState {
    working: HashMap<BackupId, AbortHandle>,
    progress: HashMap<BackupId, BTreeMap<usize, u64>>,
    on_done: Option<DoneCallback>,
}

impl RestoreMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the callback invoked when any session resolves.
    pub fn on_done(&self, callback: DoneCallback) {
        self.lock().on_done = Some(callback);
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session unless one is already running for the backup.
    ///
    /// The caller's observer, if any, still receives every notification.
    pub fn start<W>(
        &self,
        mut ctx: RestoreContext,
        request: RestoreRequest,
        sink: W,
    ) -> Result<RestoreSession, RestoreError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut state = self.lock();
        if state.working.contains_key(&request.backup_id) {
            return Err(RestoreError::AlreadyRunning(request.backup_id));
        }

        ctx.observer = Some(Arc::new(MonitorObserver {
            monitor: self.clone(),
            inner: ctx.observer.take(),
        }));
        let backup_id = request.backup_id.clone();
        let session = RestoreSession::start(ctx, request, sink)?;

        state.working.insert(backup_id.clone(), session.abort_handle());
        state.progress.insert(backup_id, BTreeMap::new());
        Ok(session)
    }

    /// Abort a running session; false if none runs for the backup.
    pub fn abort(&self, backup_id: &BackupId) -> bool {
        match self.lock().working.get(backup_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&self) {
        for handle in self.lock().working.values() {
            handle.abort();
        }
    }

    pub fn is_working(&self, backup_id: &BackupId) -> bool {
        self.lock().working.contains_key(backup_id)
    }

    pub fn working_ids(&self) -> Vec<BackupId> {
        let mut ids: Vec<_> = self.lock().working.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Bytes received so far per supplier slot.
    pub fn progress(&self, backup_id: &BackupId) -> Option<BTreeMap<usize, u64>> {
        self.lock().progress.get(backup_id).cloned()
    }

    fn record(&self, backup_id: &BackupId, slot: usize, bytes: usize) {
        if let Some(progress) = self.lock().progress.get_mut(backup_id) {
            *progress.entry(slot).or_default() += bytes as u64;
        }
    }

    fn finish(&self, backup_id: &BackupId, outcome: &Result<RestoreReport, RestoreError>) {
        let on_done = {
            let mut state = self.lock();
            state.working.remove(backup_id);
            state.progress.remove(backup_id);
            state.on_done.clone()
        };
        debug!(backup_id = %backup_id, ok = outcome.is_ok(), "Restore left the monitor");
        if let Some(on_done) = on_done {
            on_done(backup_id, outcome);
        }
    }
}

struct MonitorObserver {
    monitor: RestoreMonitor,
    inner: Option<Arc<dyn RestoreObserver>>,
}

impl RestoreObserver for MonitorObserver {
    fn fragment_received(&self, backup_id: &BackupId, slot: usize, kind: FragmentKind, bytes: usize) {
        self.monitor.record(backup_id, slot, bytes);
        if let Some(inner) = &self.inner {
            inner.fragment_received(backup_id, slot, kind, bytes);
        }
    }

    fn block_restored(&self, backup_id: &BackupId, block_number: u64, bytes: usize) {
        if let Some(inner) = &self.inner {
            inner.block_restored(backup_id, block_number, bytes);
        }
    }

    fn finished(&self, backup_id: &BackupId, outcome: &Result<RestoreReport, RestoreError>) {
        self.monitor.finish(backup_id, outcome);
        if let Some(inner) = &self.inner {
            inner.finished(backup_id, outcome);
        }
    }
}
