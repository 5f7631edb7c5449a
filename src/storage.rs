//! 文件仓库：存储根目录下的文件增删查，并与元数据存储保持一致。

use serde_json::Value;
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ErrorKind};
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::locking::LockManager;
use crate::metadata::{METADATA_FILE_NAME, MetadataRecord, MetadataStore};
use crate::sanitize::SafeName;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
    #[error("invalid path")]
    InvalidPath,
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("metadata must be a JSON object")]
    InvalidMetadata,
    #[error("file is busy: {0}")]
    Busy(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 列表中的单个文件条目。
#[derive(Debug)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub mtime: u64,
    pub metadata: MetadataRecord,
}

/// 上传成功后的文件信息。
#[derive(Debug)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub mtime: u64,
}

/// An opened file ready to be streamed to a client.
#[derive(Debug)]
pub struct Download {
    pub file: File,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

#[derive(Debug)]
pub struct FileRepository {
    root: PathBuf,
    metadata: MetadataStore,
    locks: LockManager,
    lock_timeout: Duration,
}

impl FileRepository {
    /// 打开（必要时创建）存储根目录与元数据文档。
    pub async fn open(root: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self, StorageError> {
        fs::create_dir_all(root.as_ref()).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        let metadata = MetadataStore::open(root.join(METADATA_FILE_NAME)).await?;
        Ok(Self {
            root,
            metadata,
            locks: LockManager::new(),
            lock_timeout,
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 列出存储根目录中的文件，按名称不区分大小写升序。
    pub async fn list(&self) -> Result<Vec<FileEntry>, StorageError> {
        let document = self.metadata.snapshot().await?;
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                // not reachable through any sanitized name
                debug!(name = ?entry.file_name(), "skipping non-UTF-8 entry");
                continue;
            };
            // reserved document and in-flight temp files
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // deleted between read_dir and stat
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            let record = document.get(&name).cloned().unwrap_or_default();
            entries.push(FileEntry {
                mtime: epoch_seconds(metadata.modified().ok()),
                size: metadata.len(),
                name,
                metadata: record,
            });
        }

        entries.sort_by(|a, b| compare_names(&a.name, &b.name));
        Ok(entries)
    }

    /// 写入文件（覆盖同名文件），超出 `size_limit` 时中止。`size_limit` 为 0 表示不限制。
    pub async fn put<R>(
        &self,
        name: &SafeName,
        reader: R,
        size_limit: u64,
    ) -> Result<StoredFile, StorageError>
    where
        R: AsyncRead,
    {
        let _guard = self.lock_name(name).await?;
        let target = self.resolve(name);
        match fs::symlink_metadata(&target).await {
            Ok(existing) if !existing.file_type().is_file() => {
                warn!(name = %name, "refusing to overwrite non-regular file");
                return Err(StorageError::InvalidPath);
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let mut atomic = AtomicFile::new(&target).await?;
        let written = match copy_limited(reader, atomic.file_mut(), size_limit).await {
            Ok(written) => written,
            Err(err) => {
                atomic.cleanup().await;
                if let StorageError::PayloadTooLarge { limit } = err {
                    warn!(name = %name, limit, "upload rejected: too large");
                }
                return Err(err);
            }
        };
        // record first: a live file must never lack one
        self.metadata.ensure_record(name).await?;
        atomic.finalize().await?;

        let metadata = fs::metadata(&target).await?;
        info!(name = %name, size = written, "file stored");
        Ok(StoredFile {
            name: name.to_string(),
            size: metadata.len(),
            mtime: epoch_seconds(metadata.modified().ok()),
        })
    }

    /// 打开文件用于下载，并校验解析后的路径仍位于存储根目录内。
    pub async fn get(&self, name: &SafeName) -> Result<Download, StorageError> {
        let target = self.resolve(name);
        if let Err(err) = fs::symlink_metadata(&target).await {
            return Err(not_found_or_io(err, name));
        }
        let resolved = fs::canonicalize(&target)
            .await
            .map_err(|err| not_found_or_io(err, name))?;
        self.ensure_contained(&resolved)?;

        let file = File::open(&resolved)
            .await
            .map_err(|err| not_found_or_io(err, name))?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Ok(Download {
            file,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    /// 删除文件及其元数据。
    pub async fn delete(&self, name: &SafeName) -> Result<(), StorageError> {
        let _guard = self.lock_name(name).await?;
        let target = self.resolve(name);
        let metadata = fs::symlink_metadata(&target)
            .await
            .map_err(|err| not_found_or_io(err, name))?;
        if metadata.is_dir() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        fs::remove_file(&target)
            .await
            .map_err(|err| not_found_or_io(err, name))?;
        self.metadata.delete_record(name).await?;
        info!(name = %name, "file deleted");
        Ok(())
    }

    pub async fn get_metadata(&self, name: &SafeName) -> Result<MetadataRecord, StorageError> {
        self.metadata.get_record(name).await
    }

    pub async fn set_metadata(&self, name: &SafeName, value: Value) -> Result<(), StorageError> {
        self.metadata.set_record(name, value).await?;
        info!(name = %name, "metadata updated");
        Ok(())
    }

    async fn lock_name(
        &self,
        name: &SafeName,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, StorageError> {
        self.locks
            .lock_name_with_timeout(name, self.lock_timeout)
            .await
            .map_err(|_| StorageError::Busy(name.to_string()))
    }

    fn resolve(&self, name: &SafeName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Component-wise containment, so `/srv/storage-evil` is not inside
    /// `/srv/storage`.
    fn ensure_contained(&self, resolved: &Path) -> Result<(), StorageError> {
        if resolved != self.root && resolved.starts_with(&self.root) {
            Ok(())
        } else {
            warn!(path = %resolved.display(), "resolved path escapes storage root");
            Err(StorageError::InvalidPath)
        }
    }
}

async fn copy_limited<R>(reader: R, file: &mut File, limit: u64) -> Result<u64, StorageError>
where
    R: AsyncRead,
{
    let mut reader = std::pin::pin!(reader);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        total += read as u64;
        if limit > 0 && total > limit {
            return Err(StorageError::PayloadTooLarge { limit });
        }
        file.write_all(&buffer[..read]).await?;
    }
    Ok(total)
}

fn not_found_or_io(err: io::Error, name: &SafeName) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(err)
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn epoch_seconds(time: Option<SystemTime>) -> u64 {
    time.and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
