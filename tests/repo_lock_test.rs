//! Tests for the repository lock
//!
//! A repository directory must only be written by one process at a time

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use notetags::repo_lock::{
    acquire_repository_lock, check_repository_lock, get_hostname, get_machine_id,
    LockAcquireResult,
};
use notetags::{Error, Repository};

fn write_foreign_lock(root: &Path, hostname: &str, heartbeat: chrono::DateTime<chrono::Utc>) {
    let meta_dir = root.join(".meta");
    fs::create_dir_all(&meta_dir).unwrap();
    let lock = serde_json::json!({
        "machine_id": "other-machine-id-12345",
        "hostname": hostname,
        "pid": 99999,
        "app_version": "1.0.0",
        "locked_at": heartbeat.to_rfc3339(),
        "heartbeat": heartbeat.to_rfc3339()
    });
    fs::write(
        meta_dir.join("repository.lock"),
        serde_json::to_string_pretty(&lock).unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn test_acquire_and_release_lock() {
    let temp_dir = TempDir::new().unwrap();

    let result = acquire_repository_lock(temp_dir.path(), false).await.unwrap();
    let lock = match result {
        LockAcquireResult::Acquired(lock) => lock,
        other => panic!("Unexpected result: {:?}", other),
    };

    let lock_path = temp_dir.path().join(".meta").join("repository.lock");
    assert!(lock_path.exists(), "Lock file should exist");
    assert_eq!(lock.lock_path(), lock_path.as_path());

    let (holder, is_stale) = check_repository_lock(temp_dir.path()).expect("should be locked");
    assert!(holder.is_mine());
    assert!(!is_stale);

    lock.release().await.unwrap();
    assert!(!lock_path.exists(), "Lock file should be removed after release");
    assert!(check_repository_lock(temp_dir.path()).is_none());
}

#[tokio::test]
async fn test_lock_denied_by_another_device() {
    let temp_dir = TempDir::new().unwrap();
    write_foreign_lock(temp_dir.path(), "OTHER-DEVICE", chrono::Utc::now());

    let result = acquire_repository_lock(temp_dir.path(), false).await.unwrap();
    match result {
        LockAcquireResult::Denied { holder, is_stale } => {
            assert_eq!(holder.hostname, "OTHER-DEVICE");
            assert!(!is_stale, "Lock should not be stale (recent heartbeat)");
        }
        other => panic!("Expected Denied, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_stale_lock_detection() {
    let temp_dir = TempDir::new().unwrap();
    let old_time = chrono::Utc::now() - chrono::Duration::minutes(5);
    write_foreign_lock(temp_dir.path(), "STALE-DEVICE", old_time);

    let result = acquire_repository_lock(temp_dir.path(), false).await.unwrap();
    match result {
        LockAcquireResult::Denied { holder, is_stale } => {
            assert!(is_stale, "Lock should be detected as stale");
            assert_eq!(holder.hostname, "STALE-DEVICE");
        }
        other => panic!("Expected Denied with stale flag, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_force_acquire_lock() {
    let temp_dir = TempDir::new().unwrap();
    write_foreign_lock(temp_dir.path(), "ANOTHER-PC", chrono::Utc::now());

    let result = acquire_repository_lock(temp_dir.path(), true).await.unwrap();
    let lock = match result {
        LockAcquireResult::Acquired(lock) => lock,
        other => panic!("Expected Acquired on force acquire, got: {:?}", other),
    };
    assert!(lock.info().is_mine());

    let backup_files: Vec<_> = fs::read_dir(temp_dir.path().join(".meta"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("taken over"))
        .collect();
    assert!(!backup_files.is_empty(), "Backup file should be created on force acquire");
    assert!(backup_files[0]
        .file_name()
        .to_string_lossy()
        .contains("ANOTHER-PC"));

    lock.release().await.unwrap();
}

#[tokio::test]
async fn test_release_keeps_foreign_lock() {
    let temp_dir = TempDir::new().unwrap();
    let lock = match acquire_repository_lock(temp_dir.path(), false).await.unwrap() {
        LockAcquireResult::Acquired(lock) => lock,
        other => panic!("Unexpected result: {:?}", other),
    };

    // Another device force-took the lock while we were running
    write_foreign_lock(temp_dir.path(), "INTRUDER", chrono::Utc::now());
    lock.release().await.unwrap();

    let (holder, _) = check_repository_lock(temp_dir.path()).expect("foreign lock should remain");
    assert_eq!(holder.hostname, "INTRUDER");
}

#[tokio::test]
async fn test_machine_id_generation() {
    assert!(!get_machine_id().is_empty(), "Machine ID should not be empty");
    assert!(!get_hostname().is_empty(), "Hostname should not be empty");
}

#[tokio::test]
async fn test_open_locked_holds_repository() {
    let temp_dir = TempDir::new().unwrap();

    let (repo, lock) = Repository::open_locked(temp_dir.path(), false).await.unwrap();
    assert!(lock.info().is_mine());
    assert!(repo.paths().lock_file().exists());

    lock.release().await.unwrap();
    assert!(check_repository_lock(temp_dir.path()).is_none());
}

#[tokio::test]
async fn test_open_locked_refuses_foreign_holder() {
    let temp_dir = TempDir::new().unwrap();
    write_foreign_lock(temp_dir.path(), "OTHER-DEVICE", chrono::Utc::now());

    let err = match Repository::open_locked(temp_dir.path(), false).await {
        Err(e) => e,
        Ok(_) => panic!("Expected the foreign lock to refuse the open"),
    };
    assert!(matches!(err, Error::Lock(_)));
    assert!(err.to_string().contains("OTHER-DEVICE"));

    // Forcing takes the lock over
    let (_repo, lock) = Repository::open_locked(temp_dir.path(), true).await.unwrap();
    assert!(lock.info().is_mine());
    lock.release().await.unwrap();
}
