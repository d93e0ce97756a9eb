use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Persisted form of the offset file: partition (as string) -> next offset to read.
/// A `BTreeMap` keeps keys sorted so the file is byte-for-byte deterministic.
pub type OffsetRecord = BTreeMap<String, u64>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("offset file {path} io error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("offset file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable partition -> offset mapping backed by a single JSON file.
///
/// Every read and every read-modify-write goes through one async mutex, so an
/// update for one partition never interleaves with another's. Writes land in a
/// sibling temp file which is then renamed over the offset file, so a reader never
/// observes a half-written mapping.
#[derive(Debug)]
pub struct OffsetStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty mapping if the file does not exist yet.
    pub async fn ensure_exists(&self) -> Result<()> {
        let _guard = self.lock.lock().await;

        match tokio::fs::try_exists(&self.path).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(path = %self.path.display(), "Creating offset file");
                self.write_record(&OffsetRecord::new()).await
            }
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Stored offset for `partition`, or 0 when the partition or the file is absent.
    pub async fn get(&self, partition: u32) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let record = self.read_record().await?;
        Ok(record.get(&partition.to_string()).copied().unwrap_or(0))
    }

    /// Replace the offset for `partition`, rewriting the whole mapping.
    pub async fn set(&self, partition: u32, offset: u64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut record = self.read_record().await?;
        record.insert(partition.to_string(), offset);
        self.write_record(&record).await
    }

    /// Full mapping, used for the startup summary.
    pub async fn snapshot(&self) -> Result<OffsetRecord> {
        let _guard = self.lock.lock().await;
        self.read_record().await
    }

    async fn read_record(&self) -> Result<OffsetRecord> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(OffsetRecord::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(OffsetRecord::new());
        }

        serde_json::from_slice(&contents).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_record(&self, record: &OffsetRecord) -> Result<()> {
        let contents = serde_json::to_vec(record).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, &contents)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| self.io_error(source))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "offset.db".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
