//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Read buffer size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Object store rooted at a local directory.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create the root directory if needed and open the backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path inside the root.
    ///
    /// Canonicalisation touches the filesystem, so it runs on the blocking pool.
    async fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(format!("resolve task: {e}"))))?
    }

    /// Remove now-empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// Reject keys that could land outside `root`, including through symlinks.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    let unsafe_component = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || key.contains("..") || unsafe_component {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }

    let root_canonical = root.canonicalize()?;
    let path = root.join(key);

    // Check the deepest ancestor (or the path itself) that already exists.
    let mut cursor = Some(path.as_path());
    while let Some(candidate) = cursor {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let canonical = candidate.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => cursor = candidate.parent(),
            Err(e) => return Err(StorageError::Io(e)),
        }
    }

    Ok(path)
}

fn not_found_as(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

/// Sibling path used while an object is being written.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp.{}", Uuid::new_v4()))
}

async fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key).await?;
        Ok(fs::try_exists(&path).await?)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.resolve(key).await?;
        let metadata = fs::metadata(&path).await.map_err(not_found_as(key))?;
        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(Into::into),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key).await?;
        let data = fs::read(&path).await.map_err(not_found_as(key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.resolve(key).await?;
        let mut file = fs::File::open(&path).await.map_err(not_found_as(key))?;

        let stream = async_stream::try_stream! {
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.resolve(key).await?;
        ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            temp_path,
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        fs::remove_file(&path).await.map_err(not_found_as(key))?;
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let base = self.resolve(prefix).await?;
        let mut keys = Vec::new();

        if !fs::try_exists(&base).await? {
            return Ok(keys);
        }

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks; those are skipped.
                let file_type = entry.file_type().await?;
                let path = entry.path();
                let is_temp = entry.file_name().to_string_lossy().starts_with('.');
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && !is_temp
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    keys.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("storage root is not a directory: {}", self.root.display()),
            )));
        }
        Ok(())
    }
}

/// Writes to a temp file and renames it into place on finish.
struct FilesystemUpload {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let Self {
            file,
            temp_path,
            final_path,
            bytes_written,
        } = *self;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &final_path).await?;
        Ok(bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let Self {
            file, temp_path, ..
        } = *self;
        drop(file);
        let _ = fs::remove_file(&temp_path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn backend() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, backend) = backend().await;

        let data = Bytes::from("hello world");
        backend.put("a/b/object", data.clone()).await.unwrap();

        assert!(backend.exists("a/b/object").await.unwrap());
        assert_eq!(backend.get("a/b/object").await.unwrap(), data);
        assert_eq!(backend.head("a/b/object").await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let (_dir, backend) = backend().await;
        assert!(!backend.exists("nope").await.unwrap());
        assert!(backend.get("nope").await.unwrap_err().is_not_found());
        assert!(backend.delete("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_streaming_upload_is_invisible_until_finish() {
        let (_dir, backend) = backend().await;

        let mut upload = backend.put_stream("files/big").await.unwrap();
        upload.write(Bytes::from_static(b"part one, ")).await.unwrap();
        upload.write(Bytes::from_static(b"part two")).await.unwrap();
        assert!(!backend.exists("files/big").await.unwrap());
        assert!(backend.list("files").await.unwrap().is_empty());

        assert_eq!(upload.finish().await.unwrap(), 18);
        let body: Vec<Bytes> = backend
            .get_stream("files/big")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(body.concat(), b"part one, part two");
    }

    #[tokio::test]
    async fn test_aborted_upload_leaves_nothing() {
        let (_dir, backend) = backend().await;

        let mut upload = backend.put_stream("files/gone").await.unwrap();
        upload.write(Bytes::from_static(b"data")).await.unwrap();
        upload.abort().await.unwrap();

        assert!(!backend.exists("files/gone").await.unwrap());
        assert!(backend.list("files").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete_prunes_directories() {
        let (_dir, backend) = backend().await;

        backend.put("chunks/ab/x/00000001", Bytes::from("1")).await.unwrap();
        backend.put("chunks/ab/x/00000000", Bytes::from("0")).await.unwrap();
        backend.put("chunks/cd/y/00000000", Bytes::from("2")).await.unwrap();

        let keys = backend.list("chunks/ab").await.unwrap();
        assert_eq!(keys, vec!["chunks/ab/x/00000000", "chunks/ab/x/00000001"]);

        for key in keys {
            backend.delete(&key).await.unwrap();
        }
        assert!(!backend.root().join("chunks/ab").exists());
        assert!(backend.root().join("chunks/cd/y").exists());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend) = backend().await;

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(backend.exists("").await.is_err());
        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_escape_rejected() {
        use std::os::unix::fs::symlink;

        let (_dir, backend) = backend().await;
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        symlink(outside.path(), backend.root().join("escape")).unwrap();

        let read = backend.get("escape/secret.txt").await;
        assert!(matches!(read, Err(StorageError::InvalidKey(_))));

        let write = backend
            .put("escape/nested/file.txt", Bytes::from("data"))
            .await;
        assert!(matches!(write, Err(StorageError::InvalidKey(_))));
        assert!(!outside.path().join("nested").exists());
    }
}
