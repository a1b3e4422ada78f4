// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backup payload files.
//!
//! Each backup is one JSON document `backup-<id>-<kind>.json` next to a
//! `backup-<id>-<kind>.json.sha256` sidecar holding its hex SHA-256. Files
//! are written to a temporary name, fsynced, then renamed into place, so a
//! payload visible under its final name is always complete.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::{BackupId, BackupKind, BackupRecord, VaultError, VaultResult};

/// A payload that is durable on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPayload {
    pub path: PathBuf,
    pub checksum: String,
    pub size: u64,
}

pub struct BackupStorage {
    dir: PathBuf,
}

impl BackupStorage {
    pub fn new(dir: impl Into<PathBuf>) -> VaultResult<Self> {
        let dir = dir.into();

        std::fs::create_dir_all(&dir).map_err(|e| {
            VaultError::Storage(format!(
                "Failed to create backup directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let marker = dir.join(".cvault-write-test");
        std::fs::write(&marker, b"test").map_err(|e| {
            VaultError::Storage(format!("Backup directory {} is not writable: {}", dir.display(), e))
        })?;
        std::fs::remove_file(&marker)?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload_path(&self, id: BackupId, kind: BackupKind) -> PathBuf {
        self.dir.join(format!("backup-{}-{}.json", id, kind))
    }

    pub async fn write(&self, id: BackupId, kind: BackupKind, bytes: &[u8]) -> VaultResult<StoredPayload> {
        let path = self.payload_path(id, kind);
        let checksum = checksum(bytes);

        write_durably(&path, bytes).await?;
        if let Err(e) = write_durably(&sidecar_path(&path), checksum.as_bytes()).await {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!(backup_id = %id, "Failed to remove payload without sidecar: {}", cleanup);
            }
            return Err(e);
        }
        sync_dir(&self.dir).await;

        debug!(backup_id = %id, path = %path.display(), size = bytes.len(), "Wrote backup payload");
        Ok(StoredPayload {
            path,
            checksum,
            size: bytes.len() as u64,
        })
    }

    /// Read a payload and check it against the checksum captured at creation.
    pub async fn read_verified(&self, record: &BackupRecord) -> VaultResult<Vec<u8>> {
        let bytes = tokio::fs::read(&record.storage_path).await.map_err(|e| {
            VaultError::Storage(format!(
                "Failed to read backup {} at {}: {}",
                record.id,
                record.storage_path.display(),
                e
            ))
        })?;

        if bytes.len() as u64 != record.size {
            return Err(VaultError::Integrity(format!(
                "backup {} size mismatch: expected {} bytes, found {}",
                record.id,
                record.size,
                bytes.len()
            )));
        }

        let actual = checksum(&bytes);
        if actual != record.checksum {
            return Err(VaultError::Integrity(format!(
                "backup {} checksum mismatch: expected {}, computed {}",
                record.id, record.checksum, actual
            )));
        }

        match tokio::fs::read_to_string(sidecar_path(&record.storage_path)).await {
            Ok(sidecar) if sidecar.trim() != record.checksum => {
                return Err(VaultError::Integrity(format!(
                    "backup {} checksum sidecar disagrees with its record",
                    record.id
                )));
            }
            Ok(_) => {}
            Err(e) => warn!(backup_id = %record.id, "Checksum sidecar unreadable: {}", e),
        }

        Ok(bytes)
    }

    /// Delete a payload and its sidecar. Already-missing files are fine.
    pub async fn remove(&self, record: &BackupRecord) -> VaultResult<()> {
        for path in [record.storage_path.clone(), sidecar_path(&record.storage_path)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

async fn write_durably(path: &Path, bytes: &[u8]) -> VaultResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(VaultError::Storage(format!(
            "Failed to write {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    if let Ok(handle) = tokio::fs::File::open(dir).await {
        if let Err(e) = handle.sync_all().await {
            debug!("Directory fsync failed for {}: {}", dir.display(), e);
        }
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PayloadCounts, PendingBackup};
    use chrono::Utc;

    fn record_for(stored: &StoredPayload, id: BackupId) -> BackupRecord {
        PendingBackup {
            id,
            kind: BackupKind::Full,
            base_backup_id: None,
            chain_depth: 0,
            created_at: Utc::now(),
            watermark: 1,
        }
        .into_valid(
            stored.path.clone(),
            stored.checksum.clone(),
            stored.size,
            Utc::now(),
            PayloadCounts::default(),
        )
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_write_then_read_verified() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BackupStorage::new(dir.path()).unwrap();
        let stored = storage.write(BackupId(7), BackupKind::Full, b"{\"k\":1}").await.unwrap();

        assert!(stored.path.ends_with("backup-7-full.json"));
        assert!(sidecar_path(&stored.path).exists());
        let record = record_for(&stored, BackupId(7));
        assert_eq!(storage.read_verified(&record).await.unwrap(), b"{\"k\":1}");
    }

    #[tokio::test]
    async fn test_flipped_byte_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BackupStorage::new(dir.path()).unwrap();
        let stored = storage.write(BackupId(8), BackupKind::Full, b"{\"k\":1}").await.unwrap();
        let record = record_for(&stored, BackupId(8));

        let mut bytes = std::fs::read(&stored.path).unwrap();
        bytes[2] ^= 0x01;
        std::fs::write(&stored.path, bytes).unwrap();

        let err = storage.read_verified(&record).await.unwrap_err();
        assert!(matches!(err, VaultError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_missing_payload_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BackupStorage::new(dir.path()).unwrap();
        let stored = storage.write(BackupId(9), BackupKind::Full, b"{}").await.unwrap();
        let record = record_for(&stored, BackupId(9));

        storage.remove(&record).await.unwrap();
        storage.remove(&record).await.unwrap();
        let err = storage.read_verified(&record).await.unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));
    }

    #[tokio::test]
    async fn test_failed_sidecar_leaves_no_payload_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BackupStorage::new(dir.path()).unwrap();
        let path = storage.payload_path(BackupId(10), BackupKind::Full);
        // A directory squatting on the sidecar name makes the final rename fail.
        std::fs::create_dir(sidecar_path(&path)).unwrap();

        let err = storage.write(BackupId(10), BackupKind::Full, b"{}").await.unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));
        assert!(!path.exists());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp") || name.ends_with(".json"))
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }
}
