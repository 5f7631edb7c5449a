//! 临时写入与原子替换的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{debug, warn};
use uuid::Uuid;

/// 可用于原子替换的临时文件封装。
///
/// The temp file lives next to the target and is named `.<target>.tmp.<uuid>`,
/// so directory scans that skip dot-files never see it. Dropping an
/// `AtomicFile` without a successful [`AtomicFile::finalize`] removes it, so a
/// cancelled writer leaves nothing behind.
pub struct AtomicFile {
    target: PathBuf,
    // closed before `temp` removes the path
    file: File,
    temp: TempPath,
}

/// Removes the temp file on drop unless disarmed.
struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed abandoned temp file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove temp file"),
        }
    }
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target path"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_name = format!(".{base}.tmp.{}", Uuid::new_v4());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            file,
            temp: TempPath {
                path: temp_path,
                armed: true,
            },
        })
    }

    /// 返回临时文件的可写句柄。
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        let Self { file, mut temp, .. } = self;
        drop(file);
        if fs::remove_file(&temp.path).await.is_ok() {
            temp.disarm();
        }
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(self) -> io::Result<()> {
        let Self {
            target,
            file,
            mut temp,
        } = self;
        // on any early return `temp` removes the temp file
        file.sync_all().await?;
        drop(file);

        if let Err(err) = fs::rename(&temp.path, &target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&target).await.is_ok() {
                    fs::rename(&temp.path, &target).await?;
                } else {
                    return Err(err);
                }
            }
            #[cfg(not(windows))]
            {
                return Err(err);
            }
        }
        temp.disarm();

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

/// 以原子方式整体写入文件内容。
pub async fn write_atomic(target: &Path, contents: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut atomic = AtomicFile::new(target).await?;
    if let Err(err) = atomic.file_mut().write_all(contents).await {
        atomic.cleanup().await;
        return Err(err);
    }
    atomic.finalize().await
}

#[cfg(unix)]
async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
