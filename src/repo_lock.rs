//! Exclusive repository lock.
//!
//! The tag index assumes a single process owns the repository directory. The
//! owner holds `.meta/repository.lock` and refreshes a heartbeat in it so that
//! a crashed owner's lock can be recognised as stale.
//!
//! - Machine ID + PID identify the holder
//! - Heartbeat every 15 seconds, stale after 120 seconds
//! - Forced takeover backs up the previous lock file

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::{atomic_write_file, RepositoryPaths};
use crate::error::{Error, Result};

/// Lock file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryLockInfo {
    /// Unique machine identifier (OS-specific)
    pub machine_id: String,
    pub hostname: String,
    pub pid: u32,
    pub app_version: String,
    pub locked_at: DateTime<Utc>,
    /// Refreshed every HEARTBEAT_INTERVAL_SECS while the lock is held
    pub heartbeat: DateTime<Utc>,
}

impl RepositoryLockInfo {
    fn for_this_process() -> Self {
        let now = Utc::now();
        Self {
            machine_id: get_machine_id(),
            hostname: get_hostname(),
            pid: std::process::id(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            locked_at: now,
            heartbeat: now,
        }
    }

    pub fn is_stale(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.heartbeat);
        age.num_seconds() > STALE_THRESHOLD_SECS
    }

    pub fn is_mine(&self) -> bool {
        self.machine_id == get_machine_id() && self.pid == std::process::id()
    }
}

#[derive(Debug)]
pub enum LockAcquireResult {
    Acquired(RepositoryLock),
    /// Held by another process or device
    Denied {
        holder: RepositoryLockInfo,
        is_stale: bool,
    },
}

const STALE_THRESHOLD_SECS: i64 = 120;

const HEARTBEAT_INTERVAL_SECS: u64 = 15;

static CACHED_MACHINE_ID: Lazy<String> = Lazy::new(|| {
    #[cfg(target_os = "linux")]
    {
        get_linux_machine_id()
    }
    #[cfg(not(target_os = "linux"))]
    {
        get_hostname()
    }
});

/// Unique machine identifier (cached after first call)
pub fn get_machine_id() -> String {
    CACHED_MACHINE_ID.clone()
}

#[cfg(target_os = "linux")]
fn get_linux_machine_id() -> String {
    for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = fs::read_to_string(candidate) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    get_hostname()
}

pub fn get_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn read_lock_file(lock_path: &Path) -> Result<RepositoryLockInfo> {
    let content = fs::read_to_string(lock_path)
        .map_err(|e| Error::Lock(format!("Failed to read lock file: {}", e)))?;
    serde_json::from_str(&content).map_err(|e| Error::Lock(format!("Failed to parse lock file: {}", e)))
}

fn write_lock_file(lock_path: &Path, info: &RepositoryLockInfo) -> Result<()> {
    let content = serde_json::to_string_pretty(info)?;
    atomic_write_file(lock_path, content.as_bytes())
        .map_err(|e| Error::Lock(format!("Failed to write lock file: {}", e)))
}

/// Keep a copy of a lock we are about to take over, named after its holder
fn backup_lock_file(lock_path: &Path, old_info: &RepositoryLockInfo) {
    let timestamp = Utc::now().format("%Y-%m-%d %H-%M-%S");
    let backup_name = format!(
        "repository.lock (taken over {} from {}).json",
        timestamp, old_info.hostname
    );
    let backup_path = lock_path.with_file_name(backup_name);

    if let Err(e) = fs::copy(lock_path, &backup_path) {
        log::warn!("[repo_lock] Failed to back up old lock file: {}", e);
    } else {
        log::info!("[repo_lock] Old lock file backed up to {:?}", backup_path);
    }
}

/// A held repository lock. Call [`RepositoryLock::release`] to give it up;
/// dropping the guard only stops the heartbeat.
#[derive(Debug)]
pub struct RepositoryLock {
    lock_path: PathBuf,
    info: RepositoryLockInfo,
    heartbeat_running: Arc<AtomicBool>,
    heartbeat_handle: Option<JoinHandle<()>>,
}

impl RepositoryLock {
    pub fn info(&self) -> &RepositoryLockInfo {
        &self.info
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Stop the heartbeat and remove the lock file if it is still ours.
    pub async fn release(mut self) -> Result<()> {
        self.stop_heartbeat();
        if let Some(handle) = self.heartbeat_handle.take() {
            // Wait out the aborted task so it cannot rewrite the file afterwards
            let _ = handle.await;
        }

        if !self.lock_path.exists() {
            return Ok(());
        }
        if let Ok(existing) = read_lock_file(&self.lock_path) {
            if !existing.is_mine() {
                log::warn!("[repo_lock] Lock file belongs to another process, not removing");
                return Ok(());
            }
        }

        fs::remove_file(&self.lock_path)
            .map_err(|e| Error::Lock(format!("Failed to remove lock file: {}", e)))?;
        log::info!("[repo_lock] Repository lock released");
        Ok(())
    }

    fn stop_heartbeat(&self) {
        self.heartbeat_running.store(false, Ordering::SeqCst);
        if let Some(handle) = &self.heartbeat_handle {
            handle.abort();
        }
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

/// Try to take the lock for the repository at `root`.
///
/// Must be called from within a tokio runtime; the heartbeat runs as a task.
pub async fn acquire_repository_lock(root: &Path, force: bool) -> Result<LockAcquireResult> {
    let paths = RepositoryPaths::new(root);
    let lock_path = paths.lock_file();
    log::info!("[repo_lock] Attempting to acquire lock: {:?}", lock_path);

    fs::create_dir_all(paths.meta_dir())
        .map_err(|e| Error::Lock(format!("Failed to create metadata directory: {}", e)))?;

    if lock_path.exists() {
        match read_lock_file(&lock_path) {
            Ok(existing) => {
                let is_stale = existing.is_stale();
                if existing.is_mine() {
                    log::info!("[repo_lock] Reclaiming lock left by this process");
                } else if !force {
                    log::warn!(
                        "[repo_lock] Repository locked by {} ({}), stale: {}",
                        existing.hostname,
                        existing.machine_id,
                        is_stale
                    );
                    return Ok(LockAcquireResult::Denied {
                        holder: existing,
                        is_stale,
                    });
                } else {
                    backup_lock_file(&lock_path, &existing);
                    log::info!("[repo_lock] Force acquiring lock from {}", existing.hostname);
                }
            }
            Err(e) => {
                log::warn!("[repo_lock] Unreadable lock file, will overwrite: {}", e);
            }
        }
    }

    let info = RepositoryLockInfo::for_this_process();
    write_lock_file(&lock_path, &info)?;
    log::info!("[repo_lock] Repository lock acquired");

    let heartbeat_running = Arc::new(AtomicBool::new(true));
    let running = Arc::clone(&heartbeat_running);
    let heartbeat_path = lock_path.clone();
    let heartbeat_info = info.clone();

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        // The first tick completes immediately; the file was just written
        interval.tick().await;

        while running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let mut updated = heartbeat_info.clone();
            updated.heartbeat = Utc::now();
            if let Err(e) = write_lock_file(&heartbeat_path, &updated) {
                log::error!("[repo_lock] Failed to update heartbeat: {}", e);
            } else {
                log::debug!("[repo_lock] Heartbeat updated");
            }
        }

        log::debug!("[repo_lock] Heartbeat task stopped");
    });

    Ok(LockAcquireResult::Acquired(RepositoryLock {
        lock_path,
        info,
        heartbeat_running,
        heartbeat_handle: Some(handle),
    }))
}

/// Current holder of the repository lock and whether it is stale, if locked.
pub fn check_repository_lock(root: &Path) -> Option<(RepositoryLockInfo, bool)> {
    let lock_path = RepositoryPaths::new(root).lock_file();
    if !lock_path.exists() {
        return None;
    }
    read_lock_file(&lock_path).ok().map(|info| {
        let is_stale = info.is_stale();
        (info, is_stale)
    })
}
