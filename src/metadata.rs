//! 文件元数据存储：单一 JSON 文档，读改写全程持锁并原子落盘。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::atomic::write_atomic;
use crate::sanitize::SafeName;
use crate::storage::StorageError;

/// Reserved name of the metadata document inside the storage root. Sanitized
/// names never start with `.`, so an upload can never collide with it.
pub const METADATA_FILE_NAME: &str = ".umdrive-metadata.json";

/// Arbitrary JSON object attached to a file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord(Map<String, Value>);

impl MetadataRecord {
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Value> for MetadataRecord {
    type Error = StorageError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(StorageError::InvalidMetadata),
        }
    }
}

/// Full contents of the metadata document.
pub type MetadataDocument = BTreeMap<String, MetadataRecord>;

/// Owns the metadata document and serializes every access to it.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl MetadataStore {
    /// 打开元数据文档，不存在时创建空文档。
    pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
        let store = Self {
            path,
            lock: RwLock::new(()),
        };
        match fs::metadata(&store.path).await {
            Ok(_) => {
                // refuse to start on a document we could not rewrite safely
                store.load().await?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                store.persist(&MetadataDocument::new()).await?;
            }
            Err(err) => return Err(err.into()),
        }
        debug!(path = %store.path().display(), "metadata document ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取单个文件的元数据，不存在时返回空对象。
    pub async fn get_record(&self, name: &SafeName) -> Result<MetadataRecord, StorageError> {
        let _guard = self.lock.read().await;
        let mut document = self.load().await?;
        Ok(document.remove(name.as_str()).unwrap_or_default())
    }

    /// 整体替换文件的元数据，仅接受 JSON 对象。
    pub async fn set_record(&self, name: &SafeName, value: Value) -> Result<(), StorageError> {
        let record = MetadataRecord::try_from(value)?;
        self.update(|document| {
            document.insert(name.as_str().to_string(), record);
            true
        })
        .await?;
        debug!(name = %name, "metadata record replaced");
        Ok(())
    }

    /// 删除文件的元数据，不存在时不做任何事。
    pub async fn delete_record(&self, name: &SafeName) -> Result<(), StorageError> {
        let removed = self
            .update(|document| document.remove(name.as_str()).is_some())
            .await?;
        if removed {
            debug!(name = %name, "metadata record removed");
        }
        Ok(())
    }

    /// 确保文件存在元数据条目（缺失时写入空对象）。
    pub async fn ensure_record(&self, name: &SafeName) -> Result<(), StorageError> {
        self.update(|document| {
            if document.contains_key(name.as_str()) {
                return false;
            }
            document.insert(name.as_str().to_string(), MetadataRecord::default());
            true
        })
        .await?;
        Ok(())
    }

    /// 返回整个文档的一致快照。
    pub async fn snapshot(&self) -> Result<MetadataDocument, StorageError> {
        let _guard = self.lock.read().await;
        self.load().await
    }

    /// Runs `mutate` under the write lock and persists the document when it
    /// reports a change. Returns whether anything changed.
    async fn update<F>(&self, mutate: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut MetadataDocument) -> bool,
    {
        let _guard = self.lock.write().await;
        let mut document = self.load().await?;
        let changed = mutate(&mut document);
        if changed {
            self.persist(&document).await?;
        }
        Ok(changed)
    }

    async fn load(&self) -> Result<MetadataDocument, StorageError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(MetadataDocument::new()),
            Err(err) => return Err(err.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(MetadataDocument::new());
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!("corrupt metadata document {}: {err}", self.path.display()),
            ))
        })
    }

    async fn persist(&self, document: &MetadataDocument) -> Result<(), StorageError> {
        let contents = serde_json::to_vec_pretty(document)
            .map_err(|err| StorageError::Io(io::Error::other(err)))?;
        write_atomic(&self.path, &contents).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    use crate::sanitize::sanitize_name;

    fn name(raw: &str) -> SafeName {
        sanitize_name(raw).expect("valid name")
    }

    async fn make_store() -> (tempfile::TempDir, Arc<MetadataStore>) {
        let temp = tempdir().expect("tempdir");
        let store = MetadataStore::open(temp.path().join(METADATA_FILE_NAME))
            .await
            .expect("open store");
        (temp, Arc::new(store))
    }

    #[tokio::test]
    async fn open_creates_empty_document() {
        let (_temp, store) = make_store().await;
        let raw = std::fs::read_to_string(store.path()).expect("read document");
        assert_eq!(serde_json::from_str::<Value>(&raw).expect("json"), json!({}));
    }

    #[tokio::test]
    async fn missing_record_defaults_to_empty_object() {
        let (_temp, store) = make_store().await;
        let record = store.get_record(&name("nothing.txt")).await.expect("get");
        assert_eq!(record, MetadataRecord::default());
        assert_eq!(record.into_value(), json!({}));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_temp, store) = make_store().await;
        let file = name("report.pdf");
        let value = json!({"tag": "final", "pages": 3, "reviewers": ["ana", "rui"]});
        store.set_record(&file, value.clone()).await.expect("set");
        let record = store.get_record(&file).await.expect("get");
        assert_eq!(record.into_value(), value);

        store.set_record(&file, json!({})).await.expect("set empty");
        let record = store.get_record(&file).await.expect("get");
        assert_eq!(record.into_value(), json!({}));
    }

    #[tokio::test]
    async fn non_object_is_rejected_and_document_unchanged() {
        let (_temp, store) = make_store().await;
        let file = name("report.pdf");
        store
            .set_record(&file, json!({"tag": "draft"}))
            .await
            .expect("set");
        let before = std::fs::read(store.path()).expect("read");

        for bad in [json!([1, 2, 3]), json!("text"), json!(42), Value::Null] {
            let result = store.set_record(&file, bad).await;
            assert!(matches!(result, Err(StorageError::InvalidMetadata)));
        }

        assert_eq!(std::fs::read(store.path()).expect("read"), before);
    }

    #[tokio::test]
    async fn ensure_keeps_existing_record() {
        let (_temp, store) = make_store().await;
        let file = name("a.txt");
        store.set_record(&file, json!({"k": 1})).await.expect("set");
        store.ensure_record(&file).await.expect("ensure");
        let record = store.get_record(&file).await.expect("get");
        assert_eq!(record.into_value(), json!({"k": 1}));

        let other = name("b.txt");
        store.ensure_record(&other).await.expect("ensure");
        assert!(store.snapshot().await.expect("snapshot").contains_key("b.txt"));
    }

    #[tokio::test]
    async fn delete_record_is_noop_when_absent() {
        let (_temp, store) = make_store().await;
        let file = name("a.txt");
        store.delete_record(&file).await.expect("delete absent");
        store.set_record(&file, json!({"k": 1})).await.expect("set");
        store.delete_record(&file).await.expect("delete");
        assert!(store.snapshot().await.expect("snapshot").is_empty());
    }

    #[tokio::test]
    async fn concurrent_writes_to_different_names_all_persist() {
        let (_temp, store) = make_store().await;
        let mut handles = Vec::new();
        for index in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let file = name(&format!("file-{index}.txt"));
                store
                    .set_record(&file, json!({"index": index}))
                    .await
                    .expect("set");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        let document = store.snapshot().await.expect("snapshot");
        assert_eq!(document.len(), 32);
        for index in 0..32 {
            let record = document
                .get(&format!("file-{index}.txt"))
                .expect("record present");
            assert_eq!(record.clone().into_value(), json!({"index": index}));
        }

        let reopened = MetadataStore::open(store.path().to_path_buf())
            .await
            .expect("reopen");
        assert_eq!(reopened.snapshot().await.expect("snapshot").len(), 32);
    }

    #[tokio::test]
    async fn corrupt_document_is_reported_not_overwritten() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(METADATA_FILE_NAME);
        std::fs::write(&path, b"{not json").expect("seed");

        let result = MetadataStore::open(path.clone()).await;
        assert!(matches!(result, Err(StorageError::Io(ref err)) if err.kind() == ErrorKind::InvalidData));
        assert_eq!(std::fs::read(&path).expect("read"), b"{not json");
    }
}
