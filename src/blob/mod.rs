//! Key-addressed storage for downloaded image bytes.
//!
//! The store is deliberately dumb: filenames in, bytes out. Filename
//! derivation lives in [`crate::models::image_filename`] so that the write
//! path and every lookup path agree on the key.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

/// Boundary to the blob storage that holds raw image bytes.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Write a blob, replacing any existing one under the same filename.
    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<()>;

    /// Read a blob. A missing blob is an error; callers that treat absence
    /// as normal match on the I/O error kind.
    async fn read(&self, filename: &str) -> Result<Vec<u8>>;

    /// Delete a blob. Deleting a missing blob is a no-op.
    async fn delete(&self, filename: &str) -> Result<()>;

    /// Every filename currently present.
    async fn list(&self) -> Result<HashSet<String>>;
}

/// Blob store over a flat directory on the local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a blob store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(self.path_for(filename), bytes).await?;
        Ok(())
    }

    async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(filename)).await?)
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(filename)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    use tempfile::tempdir;

    #[tokio::test]
    async fn write_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();

        store.write("1_a.png", b"bytes").await.unwrap();
        let bytes = store.read("1_a.png").await.unwrap();
        assert_eq!(bytes, b"bytes");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();

        store.write("1_a.png", b"bytes").await.unwrap();
        tokio_test::assert_ok!(store.delete("1_a.png").await);
        tokio_test::assert_ok!(store.delete("1_a.png").await);
        tokio_test::assert_ok!(store.delete("never-existed.png").await);
    }

    #[tokio::test]
    async fn list_reports_present_blobs() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();

        store.write("1_a.png", b"a").await.unwrap();
        store.write("2_b.png", b"b").await.unwrap();
        store.delete("1_a.png").await.unwrap();

        let names = store.list().await.unwrap();
        assert_eq!(names.len(), 1);
        assert!(names.contains("2_b.png"));
    }

    #[tokio::test]
    async fn read_of_missing_blob_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        assert!(store.read("absent.png").await.is_err());
    }
}
