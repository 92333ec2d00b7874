//! In-memory index of runs for the status API.

use itr_common::{RunSnapshot, ScopeId};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::controller::RunHandle;

/// Runs in the order they were started. A run started again for a scope
/// that is already present replaces the earlier entry.
#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<Mutex<Vec<RunHandle>>>,
    history: usize,
}

impl RunRegistry {
    /// Keep at most `history` finished runs.
    pub fn new(history: usize) -> Self {
        Self {
            runs: Arc::new(Mutex::new(Vec::new())),
            history,
        }
    }

    pub fn insert(&self, handle: RunHandle) {
        let mut runs = self.lock();
        runs.retain(|run| run.scope() != handle.scope());
        runs.push(handle);

        let finished = runs.iter().filter(|run| is_terminal(run)).count();
        let mut excess = finished.saturating_sub(self.history);
        if excess > 0 {
            runs.retain(|run| {
                if excess > 0 && is_terminal(run) {
                    debug!(scope = %run.scope(), "Evicting finished run");
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    pub fn snapshots(&self) -> Vec<RunSnapshot> {
        self.lock().iter().map(RunHandle::snapshot).collect()
    }

    pub fn get(&self, scope: &str) -> Option<RunSnapshot> {
        self.lock()
            .iter()
            .find(|run| run.scope().as_str() == scope)
            .map(RunHandle::snapshot)
    }

    pub fn contains(&self, scope: &ScopeId) -> bool {
        self.lock().iter().any(|run| run.scope() == scope)
    }

    /// Runs that have not reached a terminal status.
    pub fn active_count(&self) -> usize {
        self.lock().iter().filter(|run| !is_terminal(run)).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RunHandle>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_terminal(run: &RunHandle) -> bool {
    run.is_finished() || run.snapshot().status.is_terminal()
}
