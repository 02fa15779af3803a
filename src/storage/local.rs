//! Local disk storage backend: one file per key in a flat directory.
//!
//! Binary file layout (big-endian), version 2:
//!
//! ```text
//! u32 version (=2)
//! u32 key-len,   key bytes (UTF-8)
//! u32 ctype-len, content-type bytes (UTF-8)
//! i64 expiry-millis (-1 = never)
//! i64 last-modified-millis
//! u8  modifiable (0/1)
//! [u32 auth-key-len, auth-key bytes]   -- only when modifiable == 1
//! u32 enc-len, encoding bytes (comma-joined, UTF-8)
//! u32 content-len, content bytes
//! ```
//!
//! Version 1 files omit the `enc-len`/encoding block entirely; readers must
//! treat their content as `encoding = ["gzip"]`. Unreadable or truncated
//! files are reported as corrupt and deleted by the caller (the coordinator
//! treats an EOF/parse failure the same as "backend-level corruption",
//! spec.md §3 Lifecycle).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::content::Content;
use crate::expiry::Expiry;

use super::{BackendResult, ContentStream, KeyStream, StorageBackend};

pub const VERSION_1: u32 = 1;
pub const VERSION_2: u32 = 2;
pub const CURRENT_VERSION: u32 = VERSION_2;

pub struct LocalStorage {
    id: String,
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self { id: id.into(), root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn ensure_root(&self) -> BackendResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

/// Encodes a record into the version-2 binary layout.
fn encode(content: &Content) -> Vec<u8> {
    let key_bytes = content.key.as_bytes();
    let ctype_bytes = content.content_type.as_bytes();
    let encoding_joined = content.encoding.join(",");
    let encoding_bytes = encoding_joined.as_bytes();
    let body = content.content.as_deref().unwrap_or(&[]);

    let mut out = Vec::with_capacity(
        4 + 4 + key_bytes.len() + 4 + ctype_bytes.len() + 8 + 8 + 1 + 4 + encoding_bytes.len() + 4 + body.len(),
    );

    out.extend_from_slice(&CURRENT_VERSION.to_be_bytes());
    out.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(key_bytes);
    out.extend_from_slice(&(ctype_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(ctype_bytes);
    out.extend_from_slice(&content.expiry.to_millis().to_be_bytes());
    out.extend_from_slice(&content.last_modified.timestamp_millis().to_be_bytes());
    out.push(content.modifiable as u8);
    if content.modifiable {
        let auth_bytes = content.auth_key.as_deref().unwrap_or("").as_bytes();
        out.extend_from_slice(&(auth_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(auth_bytes);
    }
    out.extend_from_slice(&(encoding_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(encoding_bytes);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);

    out
}

struct Header {
    key: String,
    content_type: String,
    expiry: Expiry,
    last_modified: chrono::DateTime<chrono::Utc>,
    modifiable: bool,
    auth_key: Option<String>,
    encoding: Vec<String>,
    content_len: u32,
}

/// Reads and parses the fixed-size/length-prefixed header, leaving the file
/// cursor positioned at the start of the content block. Used by both
/// `load` (which then reads the content) and `list` (which seeks past it).
async fn read_header(file: &mut fs::File) -> anyhow::Result<Header> {
    let version = read_u32(file).await?;
    if version != VERSION_1 && version != VERSION_2 {
        anyhow::bail!("unsupported bytebin file version {version}");
    }

    let key = read_string(file).await?;
    let content_type = read_string(file).await?;
    let expiry = Expiry::from_millis(read_i64(file).await?);
    let last_modified_millis = read_i64(file).await?;
    let last_modified =
        chrono::DateTime::from_timestamp_millis(last_modified_millis).unwrap_or_else(chrono::Utc::now);

    let modifiable = read_u8(file).await? != 0;
    let auth_key = if modifiable {
        Some(read_string(file).await?)
    } else {
        None
    };

    let encoding = if version == VERSION_1 {
        vec!["gzip".to_string()]
    } else {
        let joined = read_string(file).await?;
        if joined.is_empty() {
            Vec::new()
        } else {
            joined.split(',').map(|s| s.to_string()).collect()
        }
    };

    let content_len = read_u32(file).await?;

    Ok(Header {
        key,
        content_type,
        expiry,
        last_modified,
        modifiable,
        auth_key,
        encoding,
        content_len,
    })
}

async fn read_u8(file: &mut fs::File) -> anyhow::Result<u8> {
    let mut buf = [0u8; 1];
    file.read_exact(&mut buf).await?;
    Ok(buf[0])
}

async fn read_u32(file: &mut fs::File) -> anyhow::Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

async fn read_i64(file: &mut fs::File) -> anyhow::Result<i64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf).await?;
    Ok(i64::from_be_bytes(buf))
}

async fn read_string(file: &mut fs::File) -> anyhow::Result<String> {
    let len = read_u32(file).await? as usize;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(String::from_utf8(buf)?)
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn backend_id(&self) -> &str {
        &self.id
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Content>> {
        let path = self.path_for(key);
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let header = match read_header(&mut file).await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(key, error = ?e, "corrupt bytebin file, deleting");
                let _ = fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        let mut body = vec![0u8; header.content_len as usize];
        if let Err(e) = file.read_exact(&mut body).await {
            tracing::warn!(key, error = ?e, "truncated bytebin file, deleting");
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(Content {
            key: header.key,
            content_type: header.content_type,
            encoding: header.encoding,
            expiry: header.expiry,
            last_modified: header.last_modified,
            modifiable: header.modifiable,
            auth_key: header.auth_key,
            backend_id: self.id.clone(),
            content_length: header.content_len as u64,
            content: Some(body),
            ..Content::new(key.to_string(), String::new(), vec![], Expiry::Never, false, None, vec![])
        }))
    }

    async fn save(&self, content: &Content) -> BackendResult<()> {
        self.ensure_root().await?;
        let path = self.path_for(&content.key);
        let tmp_path = path.with_extension("tmp");
        let bytes = encode(content);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> BackendResult<ContentStream> {
        self.ensure_root().await?;
        let mut entries = fs::read_dir(&self.root).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("tmp") {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(name.to_string());
            }
        }

        let root = self.root.clone();
        let id = self.id.clone();
        let stream = stream::iter(keys).then(move |key| {
            let root = root.clone();
            let id = id.clone();
            async move { load_metadata_only(&root, &id, &key).await }
        });

        Ok(Box::pin(stream))
    }

    async fn list_keys(&self) -> BackendResult<KeyStream> {
        self.ensure_root().await?;
        let mut entries = fs::read_dir(&self.root).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("tmp") {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(Ok(name.to_string()));
            }
        }
        Ok(Box::pin(stream::iter(keys)))
    }
}

/// Reads only the header (a `skipContent` read), seeking past the content
/// block instead of reading it, used by `list()`.
async fn load_metadata_only(root: &Path, backend_id: &str, key: &str) -> BackendResult<Content> {
    let path = root.join(key);
    let mut file = fs::File::open(&path).await?;
    let header = read_header(&mut file).await?;
    file.seek(SeekFrom::Current(header.content_len as i64)).await?;

    Ok(Content {
        key: header.key,
        content_type: header.content_type,
        encoding: header.encoding,
        expiry: header.expiry,
        last_modified: header.last_modified,
        modifiable: header.modifiable,
        auth_key: header.auth_key,
        backend_id: backend_id.to_string(),
        content_length: header.content_len as u64,
        content: None,
        ..Content::new(key.to_string(), String::new(), vec![], Expiry::Never, false, None, vec![])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::Expiry;

    fn sample(key: &str) -> Content {
        Content::new(
            key.into(),
            "text/plain".into(),
            vec!["gzip".into()],
            Expiry::Never,
            true,
            Some("a".repeat(32)),
            b"hello world".to_vec(),
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalStorage::new("local", dir.path());
        let content = sample("abc1234");
        backend.save(&content).await.unwrap();

        let loaded = backend.load("abc1234").await.unwrap().unwrap();
        assert_eq!(loaded.content, Some(b"hello world".to_vec()));
        assert_eq!(loaded.content_type, "text/plain");
        assert_eq!(loaded.encoding, vec!["gzip".to_string()]);
        assert!(loaded.modifiable);
        assert_eq!(loaded.auth_key, Some("a".repeat(32)));
    }

    #[tokio::test]
    async fn load_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalStorage::new("local", dir.path());
        assert!(backend.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_then_load_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalStorage::new("local", dir.path());
        let content = sample("abc1234");
        backend.save(&content).await.unwrap();
        backend.delete("abc1234").await.unwrap();
        assert!(backend.load("abc1234").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_file_is_treated_as_missing_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalStorage::new("local", dir.path());
        let path = dir.path().join("broken");
        fs::write(&path, b"\x00\x00\x00\x02not enough bytes").await.unwrap();

        assert!(backend.load("broken").await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn list_streams_metadata_without_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalStorage::new("local", dir.path());
        backend.save(&sample("key0001")).await.unwrap();
        backend.save(&sample("key0002")).await.unwrap();

        let items: Vec<_> = {
            use futures::StreamExt;
            backend.list().await.unwrap().collect().await
        };
        assert_eq!(items.len(), 2);
        for item in items {
            let content = item.unwrap();
            assert!(content.content.is_none());
            assert_eq!(content.content_length, 11);
        }
    }

    #[test]
    fn version_1_files_imply_gzip_encoding() {
        // Hand-construct a version-1 header (no encoding block) and confirm
        // the parser infers encoding=["gzip"].
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&VERSION_1.to_be_bytes());
        let key = b"abc1234";
        bytes.extend_from_slice(&(key.len() as u32).to_be_bytes());
        bytes.extend_from_slice(key);
        let ctype = b"text/plain";
        bytes.extend_from_slice(&(ctype.len() as u32).to_be_bytes());
        bytes.extend_from_slice(ctype);
        bytes.extend_from_slice(&(-1i64).to_be_bytes());
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.push(0u8);
        let body = b"hi";
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(body);

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("abc1234");
            fs::write(&path, &bytes).await.unwrap();
            let backend = LocalStorage::new("local", dir.path());
            let loaded = backend.load("abc1234").await.unwrap().unwrap();
            assert_eq!(loaded.encoding, vec!["gzip".to_string()]);
            assert_eq!(loaded.content, Some(b"hi".to_vec()));
        });
    }
}
