//! Local filesystem backend for state storage

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

/// Default state file name when no path is configured
pub const DEFAULT_STATE_PATH: &str = "strata.tfstate";

const GUARD_WAIT: Duration = Duration::from_secs(2);
const GUARD_POLL: Duration = Duration::from_millis(10);

/// State stored in a file, locked with an exclusively created sibling file
///
/// The lock file is only ever deleted while holding a second exclusively
/// created file, the guard, so a delete always removes the lock that was
/// read under that same guard.
pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
    guard_path: PathBuf,
}

impl LocalBackend {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = with_suffix(&state_path, ".lock");
        let guard_path = with_suffix(&lock_path, ".guard");
        Self {
            state_path,
            lock_path,
            guard_path,
        }
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = config.get_string("path").unwrap_or(DEFAULT_STATE_PATH);
        if path.is_empty() {
            return Err(BackendError::configuration("Attribute path must not be empty"));
        }
        Ok(Self::new(path))
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        match fs::read(&self.lock_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BackendError::InvalidState(format!("Unreadable lock file: {}", e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the lock file only if it does not exist yet
    ///
    /// Returns `false` when another invocation already holds the file.
    async fn try_create_lock(&self, lock: &LockInfo) -> BackendResult<bool> {
        let body = serde_json::to_vec_pretty(lock)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await;

        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&self.lock_path).await;
            return Err(e.into());
        }
        Ok(true)
    }

    /// Wait up to [`GUARD_WAIT`] for the guard; `false` if it stayed taken
    async fn take_guard(&self) -> BackendResult<bool> {
        let deadline = tokio::time::Instant::now() + GUARD_WAIT;
        loop {
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.guard_path)
                .await;

            match created {
                Ok(_) => return Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(false);
                    }
                    tokio::time::sleep(GUARD_POLL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn drop_guard(&self) {
        if let Err(e) = fs::remove_file(&self.guard_path).await {
            log::warn!("Failed to remove lock guard {}: {}", self.guard_path.display(), e);
        }
    }

    async fn require_guard(&self) -> BackendResult<()> {
        if self.take_guard().await? {
            return Ok(());
        }
        log::warn!(
            "Lock guard {} stayed taken for {:?}; if its owner crashed, run force-unlock",
            self.guard_path.display(),
            GUARD_WAIT
        );
        Err(BackendError::locked_by_unknown())
    }

    /// Replace `expired` with `lock`, unless someone else got there first
    ///
    /// Must run under the guard.
    async fn take_over(&self, expired: &LockInfo, lock: &LockInfo) -> BackendResult<()> {
        match self.read_lock().await {
            Ok(Some(current)) if current.id == expired.id => {
                log::warn!("Taking over expired lock {} held by {}", expired.id, expired.who);
                self.delete_lock().await?;
            }
            Ok(Some(current)) => return Err(BackendError::locked(&current)),
            Ok(None) => {}
            Err(BackendError::InvalidState(_)) => return Err(BackendError::locked_by_unknown()),
            Err(e) => return Err(e),
        }

        if self.try_create_lock(lock).await? {
            Ok(())
        } else {
            Err(BackendError::locked_by_unknown())
        }
    }

    /// Delete the lock if its id is `lock_id`; must run under the guard
    async fn delete_lock_if(&self, lock_id: &str) -> BackendResult<()> {
        match self.read_lock().await? {
            Some(existing) if existing.id != lock_id => Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            }),
            Some(_) => self.delete_lock().await,
            None => Err(BackendError::LockNotFound(lock_id.to_string())),
        }
    }

    async fn delete_lock(&self) -> BackendResult<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_parent_dir(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    fn describe(&self) -> String {
        format!("local:{}", self.state_path.display())
    }

    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        match fs::read(&self.state_path).await {
            Ok(bytes) => StateFile::from_json(&bytes)
                .map(Some)
                .map_err(BackendError::InvalidState),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        self.ensure_parent_dir().await?;

        // Readers see either the old or the new file, never a partial one
        let tmp_path = with_suffix(&self.state_path, ".tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &self.state_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_state(&self) -> BackendResult<()> {
        match fs::remove_file(&self.state_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        self.ensure_parent_dir().await?;

        let lock = LockInfo::new(operation);
        if self.try_create_lock(&lock).await? {
            return Ok(lock);
        }

        match self.read_lock().await {
            Ok(Some(existing)) if existing.is_expired() => {
                self.require_guard().await?;
                let taken = self.take_over(&existing, &lock).await;
                self.drop_guard().await;
                taken.map(|()| lock)
            }
            Ok(Some(existing)) => Err(BackendError::locked(&existing)),
            // Holder created the file but has not finished writing it
            Ok(None) | Err(BackendError::InvalidState(_)) => Err(BackendError::locked_by_unknown()),
            Err(e) => Err(e),
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        self.require_guard().await?;
        let released = self.delete_lock_if(&lock.id).await;
        self.drop_guard().await;
        released
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        if !self.take_guard().await? {
            log::warn!("Clearing stale lock guard {}", self.guard_path.display());
            self.drop_guard().await;
            self.require_guard().await?;
        }
        let released = self.delete_lock_if(lock_id).await;
        self.drop_guard().await;
        released
    }

    async fn current_lock(&self) -> BackendResult<Option<LockInfo>> {
        self.read_lock().await
    }

    async fn init(&self) -> BackendResult<()> {
        self.ensure_parent_dir().await?;
        if self.read_state().await?.is_none() {
            self.write_state(&StateFile::new()).await?;
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
