//! Locked access to a state backend
//!
//! A [`StateSession`] owns a lock from acquisition until release. Writes go
//! through the session so a failed write can be rolled back to the state read
//! when the lock was taken. The lock is released on every exit path: by
//! [`StateSession::release`], by [`with_lock`] after its body finishes or a
//! termination signal arrives, and as a last resort from `Drop`.

use std::sync::Arc;

use crate::backend::{BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::retry::LockRetry;
use crate::state::StateFile;

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Lock held, idle
    Locked,
    Reading,
    Writing,
    /// A write failed and the previous state could not be restored
    Corrupted,
    Released,
}

/// Exclusive, lock-holding handle on a backend
pub struct StateSession {
    backend: Arc<dyn StateBackend>,
    lock: LockInfo,
    /// State as of the last successful read or write, the rollback target
    snapshot: Option<StateFile>,
    phase: SessionPhase,
}

impl StateSession {
    /// Make one attempt to lock `backend` and snapshot its current state
    pub async fn acquire(backend: Arc<dyn StateBackend>, operation: &str) -> BackendResult<Self> {
        let lock = backend.acquire_lock(operation).await?;
        log::debug!(
            "Acquired lock {} on {} for {}",
            lock.id,
            backend.describe(),
            operation
        );

        let mut session = Self {
            backend,
            lock,
            snapshot: None,
            phase: SessionPhase::Locked,
        };

        match session.backend.read_state().await {
            Ok(snapshot) => {
                session.snapshot = snapshot;
                Ok(session)
            }
            Err(e) => {
                if let Err(release_error) = session.unlock().await {
                    log::error!("Failed to release state lock: {}", release_error);
                }
                Err(e)
            }
        }
    }

    pub fn lock(&self) -> &LockInfo {
        &self.lock
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Read the current state under the lock
    pub async fn read_state(&mut self) -> BackendResult<Option<StateFile>> {
        self.ensure_locked()?;
        self.phase = SessionPhase::Reading;
        let result = self.backend.read_state().await;
        self.phase = SessionPhase::Locked;

        let state = result?;
        self.snapshot = state.clone();
        Ok(state)
    }

    /// Persist `state`, bumping its serial
    ///
    /// On failure the state read at acquisition (or last written) is put
    /// back and `WriteFailed` is returned; `state` is left untouched. If
    /// putting it back fails too the session becomes `Corrupted` and
    /// `StateCorruption` is returned. Nothing is written once the lock lease
    /// has run out.
    pub async fn write_state(&mut self, state: &mut StateFile) -> BackendResult<()> {
        self.ensure_locked()?;

        if self.lock.is_expired() {
            return Err(BackendError::LeaseExpired {
                lock_id: self.lock.id.clone(),
                overdue_secs: -self.lock.remaining().num_seconds(),
            });
        }

        if let Some(snapshot) = &self.snapshot
            && snapshot.lineage != state.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: snapshot.lineage.clone(),
                actual: state.lineage.clone(),
            });
        }

        let mut next = state.clone();
        next.increment_serial();
        self.phase = SessionPhase::Writing;

        let write_error = match self.backend.write_state(&next).await {
            Ok(()) => {
                log::debug!("Wrote state serial {} to {}", next.serial, self.backend.describe());
                *state = next.clone();
                self.snapshot = Some(next);
                self.phase = SessionPhase::Locked;
                return Ok(());
            }
            Err(e) => e,
        };

        log::warn!("State write failed, restoring previous state: {}", write_error);

        let restored = match &self.snapshot {
            Some(snapshot) => self.backend.write_state(snapshot).await,
            None => self.backend.remove_state().await,
        };

        match restored {
            Ok(()) => {
                self.phase = SessionPhase::Locked;
                Err(BackendError::WriteFailed(write_error.to_string()))
            }
            Err(restore_error) => {
                self.phase = SessionPhase::Corrupted;
                log::error!(
                    "Could not restore state on {} after failed write",
                    self.backend.describe()
                );
                Err(BackendError::StateCorruption {
                    write_error: write_error.to_string(),
                    restore_error: restore_error.to_string(),
                })
            }
        }
    }

    /// Release the lock and end the session
    pub async fn release(mut self) -> BackendResult<()> {
        self.unlock().await
    }

    async fn unlock(&mut self) -> BackendResult<()> {
        if self.phase == SessionPhase::Released {
            return Ok(());
        }
        if self.phase == SessionPhase::Corrupted {
            log::error!(
                "Releasing lock {} on possibly corrupted state; inspect {} before the next run",
                self.lock.id,
                self.backend.describe()
            );
        }
        self.phase = SessionPhase::Released;
        self.backend.release_lock(&self.lock).await?;
        log::debug!("Released lock {}", self.lock.id);
        Ok(())
    }

    fn ensure_locked(&self) -> BackendResult<()> {
        match self.phase {
            SessionPhase::Locked => Ok(()),
            _ => Err(BackendError::NotLocked),
        }
    }
}

impl Drop for StateSession {
    fn drop(&mut self) {
        if self.phase == SessionPhase::Released {
            return;
        }

        log::warn!("State session dropped while holding lock {}", self.lock.id);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::error!(
                "No runtime to release lock {}; run `strata state force-unlock {}`",
                self.lock.id,
                self.lock.id
            );
            return;
        };

        let backend = Arc::clone(&self.backend);
        let lock = self.lock.clone();
        handle.spawn(async move {
            if let Err(e) = backend.release_lock(&lock).await {
                log::error!("Failed to release lock {}: {}", lock.id, e);
            }
        });
    }
}

/// Run `f` while holding the lock on `backend`
///
/// The lock is acquired with `retry`, then released once `f` finishes,
/// fails, or a termination signal interrupts it. An interrupt surfaces as
/// [`BackendError::Interrupted`].
pub async fn with_lock<T, F>(
    backend: Arc<dyn StateBackend>,
    operation: &str,
    retry: &LockRetry,
    f: F,
) -> BackendResult<T>
where
    F: AsyncFnOnce(&mut StateSession) -> BackendResult<T>,
{
    with_lock_until(backend, operation, retry, termination_signal(), f).await
}

/// [`with_lock`] with the interrupt source supplied by the caller
pub(crate) async fn with_lock_until<T, F, C>(
    backend: Arc<dyn StateBackend>,
    operation: &str,
    retry: &LockRetry,
    cancel: C,
    f: F,
) -> BackendResult<T>
where
    F: AsyncFnOnce(&mut StateSession) -> BackendResult<T>,
    C: Future<Output = ()>,
{
    let mut session = retry.acquire(backend, operation).await?;

    let outcome = tokio::select! {
        result = f(&mut session) => result,
        _ = cancel => Err(BackendError::Interrupted),
    };

    if matches!(outcome, Err(BackendError::Interrupted)) {
        log::warn!("Interrupted, releasing state lock {}", session.lock.id);
    }

    match (outcome, session.release().await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_error)) => Err(release_error),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_error)) => {
            log::error!("Failed to release state lock: {}", release_error);
            Err(e)
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
            return;
        }
    }

    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::LocalBackend;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Wraps a local backend; the next `failing_writes` writes leave a
    /// truncated state behind and then report an error
    struct FlakyBackend {
        inner: LocalBackend,
        failing_writes: AtomicUsize,
    }

    impl FlakyBackend {
        fn new(inner: LocalBackend, failing_writes: usize) -> Self {
            Self {
                inner,
                failing_writes: AtomicUsize::new(failing_writes),
            }
        }
    }

    #[async_trait]
    impl StateBackend for FlakyBackend {
        fn describe(&self) -> String {
            format!("flaky+{}", self.inner.describe())
        }

        async fn read_state(&self) -> BackendResult<Option<StateFile>> {
            self.inner.read_state().await
        }

        async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
            let should_fail = self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                let mut partial = state.clone();
                partial.resources.clear();
                self.inner.write_state(&partial).await?;
                return Err(BackendError::Io("connection reset".to_string()));
            }
            self.inner.write_state(state).await
        }

        async fn remove_state(&self) -> BackendResult<()> {
            self.inner.remove_state().await
        }

        async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
            self.inner.acquire_lock(operation).await
        }

        async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
            self.inner.release_lock(lock).await
        }

        async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
            self.inner.force_unlock(lock_id).await
        }

        async fn current_lock(&self) -> BackendResult<Option<LockInfo>> {
            self.inner.current_lock().await
        }

        async fn init(&self) -> BackendResult<()> {
            self.inner.init().await
        }
    }

    fn seeded_state() -> StateFile {
        let mut state = StateFile::with_lineage("lineage-1".to_string());
        state.upsert_resource(
            "site/bucket",
            [("arn".to_string(), json!("arn:aws:s3:::example.com"))]
                .into_iter()
                .collect(),
        );
        state
    }

    async fn seeded_backend(dir: &tempfile::TempDir, failing_writes: usize) -> Arc<FlakyBackend> {
        let local = LocalBackend::new(dir.path().join("strata.tfstate"));
        local.write_state(&seeded_state()).await.unwrap();
        Arc::new(FlakyBackend::new(local, failing_writes))
    }

    fn modified(mut state: StateFile) -> StateFile {
        state.upsert_resource(
            "site/oac",
            [("id".to_string(), json!("E123"))].into_iter().collect(),
        );
        state
    }

    #[tokio::test]
    async fn test_write_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 0).await;

        let mut session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        let mut state = modified(session.read_state().await.unwrap().unwrap());
        session.write_state(&mut state).await.unwrap();
        assert_eq!(state.serial, 1);
        session.release().await.unwrap();

        assert!(backend.current_lock().await.unwrap().is_none());
        assert_eq!(backend.read_state().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_second_session_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.tfstate");
        let first: Arc<dyn StateBackend> = Arc::new(LocalBackend::new(path.clone()));
        let second: Arc<dyn StateBackend> = Arc::new(LocalBackend::new(path));

        let session = StateSession::acquire(first, "plan").await.unwrap();
        assert!(matches!(
            StateSession::acquire(second.clone(), "plan").await,
            Err(BackendError::Locked { .. })
        ));

        session.release().await.unwrap();
        let session = StateSession::acquire(second, "plan").await.unwrap();
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_restores_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 1).await;

        let mut session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        let mut state = modified(session.read_state().await.unwrap().unwrap());

        let result = session.write_state(&mut state).await;
        assert!(matches!(result, Err(BackendError::WriteFailed(_))));
        assert_eq!(session.phase(), SessionPhase::Locked);
        session.release().await.unwrap();

        let session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        assert_eq!(backend.read_state().await.unwrap(), Some(seeded_state()));
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_without_prior_state_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalBackend::new(dir.path().join("strata.tfstate"));
        let backend = Arc::new(FlakyBackend::new(local, 1));

        let mut session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        let mut state = StateFile::new();
        assert!(matches!(
            session.write_state(&mut state).await,
            Err(BackendError::WriteFailed(_))
        ));
        session.release().await.unwrap();

        assert!(backend.read_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_restore_is_state_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 2).await;

        let mut session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        let mut state = modified(session.read_state().await.unwrap().unwrap());

        match session.write_state(&mut state).await {
            Err(BackendError::StateCorruption {
                write_error,
                restore_error,
            }) => {
                assert!(write_error.contains("connection reset"));
                assert!(restore_error.contains("connection reset"));
            }
            other => panic!("Expected StateCorruption, got {:?}", other.err()),
        }
        assert_eq!(session.phase(), SessionPhase::Corrupted);
        assert!(matches!(
            session.write_state(&mut state).await,
            Err(BackendError::NotLocked)
        ));

        session.release().await.unwrap();
        assert!(backend.current_lock().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lineage_mismatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 0).await;

        let mut session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        let mut foreign = StateFile::with_lineage("lineage-2".to_string());
        assert!(matches!(
            session.write_state(&mut foreign).await,
            Err(BackendError::LineageMismatch { .. })
        ));
        session.release().await.unwrap();
        assert_eq!(backend.read_state().await.unwrap(), Some(seeded_state()));
    }

    #[tokio::test]
    async fn test_with_lock_releases_after_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 0).await;

        let result: BackendResult<()> = with_lock(
            backend.clone(),
            "plan",
            &LockRetry::none(),
            async |session: &mut StateSession| {
                session.read_state().await?;
                Err(BackendError::InvalidState("rejected by caller".to_string()))
            },
        )
        .await;

        assert!(matches!(result, Err(BackendError::InvalidState(_))));
        assert!(backend.current_lock().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_lock_returns_body_value() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 0).await;

        let paths = with_lock(
            backend.clone(),
            "state show",
            &LockRetry::none(),
            async |session: &mut StateSession| {
                let state = session.read_state().await?.unwrap_or_default();
                Ok(state.paths().map(str::to_string).collect::<Vec<_>>())
            },
        )
        .await
        .unwrap();

        assert_eq!(paths, vec!["site/bucket"]);
        assert!(backend.current_lock().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_caller_serial() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 1).await;

        let mut session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        let mut state = modified(session.read_state().await.unwrap().unwrap());
        assert!(session.write_state(&mut state).await.is_err());
        assert_eq!(state.serial, 0);

        session.write_state(&mut state).await.unwrap();
        assert_eq!(state.serial, 1);
        assert_eq!(backend.read_state().await.unwrap().unwrap().serial, 1);
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_lease_ran_out_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 0).await;

        let mut session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        session.lock.expires = session.lock.created - chrono::TimeDelta::seconds(5);

        let mut state = modified(seeded_state());
        match session.write_state(&mut state).await {
            Err(BackendError::LeaseExpired { lock_id, overdue_secs }) => {
                assert_eq!(lock_id, session.lock().id);
                assert!(overdue_secs >= 5);
            }
            other => panic!("Expected LeaseExpired, got {:?}", other),
        }
        assert_eq!(backend.read_state().await.unwrap(), Some(seeded_state()));
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 0).await;

        let result: BackendResult<()> = with_lock_until(
            backend.clone(),
            "state rm",
            &LockRetry::none(),
            tokio::time::sleep(Duration::from_millis(20)),
            async |session: &mut StateSession| {
                session.read_state().await?;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(BackendError::Interrupted)));
        assert!(backend.current_lock().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_session_releases_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir, 0).await;

        let session = StateSession::acquire(backend.clone(), "plan").await.unwrap();
        drop(session);

        for _ in 0..50 {
            if backend.current_lock().await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lock was not released after drop");
    }
}
