//! Directory-backed key-value store using tokio::fs.
//!
//! One file per key. Key bytes outside `[A-Za-z0-9_-]` are percent-encoded so
//! any key maps to a single portable file name, e.g. `drawing:42` is stored
//! as `drawing%3A42.json`.

use async_trait::async_trait;
use sketch_core::kv::{KeyValueStore, Result, StoreError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const EXTENSION: &str = "json";

pub struct DirKv {
    base_path: PathBuf,
}

impl DirKv {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key must not be empty".into()));
        }
        Ok(self
            .base_path
            .join(format!("{}.{}", encode_key(key), EXTENSION)))
    }

    /// Atomic write using temp file + rename.
    async fn atomic_write(path: &Path, value: &str) -> std::io::Result<()> {
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&temp_path, value).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for DirKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.full_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.full_path(key)?;
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| io_error(&self.base_path, e))?;
        Self::atomic_write(&path, value)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.full_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut dir = match fs::read_dir(&self.base_path).await {
            Ok(dir) => dir,
            // Nothing written yet
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(io_error(&self.base_path, e));
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error(&self.base_path, e))?
        {
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|n| n.strip_suffix(EXTENSION))
                .and_then(|n| n.strip_suffix('.'))
            else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io(format!("{}: {}", path.display(), e))
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Inverse of [`encode_key`]. `None` for names this store did not write.
fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = name.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_encoding() {
        assert_eq!(encode_key("drawing:42"), "drawing%3A42");
        assert_eq!(encode_key("drawing-index"), "drawing-index");
        assert_eq!(encode_key("a/../b"), "a%2F%2E%2E%2Fb");
        assert_eq!(decode_key("drawing%3A42").as_deref(), Some("drawing:42"));
        assert_eq!(decode_key("a%2F%2E%2E%2Fb").as_deref(), Some("a/../b"));
        assert_eq!(decode_key("bad%4"), None);
        assert_eq!(decode_key("x.y"), None);
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let temp = TempDir::new().unwrap();
        let kv = DirKv::new(temp.path().join("store"));

        assert_eq!(kv.get("drawing:1").await.unwrap(), None);
        kv.set("drawing:1", "{\"a\":1}").await.unwrap();
        assert_eq!(
            kv.get("drawing:1").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert!(temp.path().join("store/drawing%3A1.json").exists());

        kv.set("drawing:1", "{}").await.unwrap();
        assert_eq!(kv.get("drawing:1").await.unwrap().as_deref(), Some("{}"));

        kv.remove("drawing:1").await.unwrap();
        assert_eq!(kv.get("drawing:1").await.unwrap(), None);
        // Removing again is fine
        kv.remove("drawing:1").await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_errors_name_the_directory() {
        let temp = TempDir::new().unwrap();
        let not_a_dir = temp.path().join("store");
        std::fs::write(&not_a_dir, "").unwrap();

        let err = DirKv::new(not_a_dir.clone()).keys("").await.unwrap_err();
        match err {
            StoreError::Io(message) => {
                assert!(message.starts_with(&not_a_dir.display().to_string()))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_keys_filters_by_prefix_and_skips_foreign_files() {
        let temp = TempDir::new().unwrap();
        let kv = DirKv::new(temp.path().to_path_buf());
        assert!(kv.keys("").await.unwrap().is_empty());

        kv.set("drawing:b", "1").await.unwrap();
        kv.set("drawing:a", "2").await.unwrap();
        kv.set("drawing-index", "[]").await.unwrap();
        std::fs::write(temp.path().join("notes.txt"), "x").unwrap();
        std::fs::write(temp.path().join("drawing%3Ac.abc123.tmp"), "x").unwrap();

        assert_eq!(
            kv.keys("drawing:").await.unwrap(),
            vec!["drawing:a", "drawing:b"]
        );
        assert_eq!(kv.keys("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let temp = TempDir::new().unwrap();
        let kv = DirKv::new(temp.path().to_path_buf());
        assert!(matches!(
            kv.set("", "x").await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
