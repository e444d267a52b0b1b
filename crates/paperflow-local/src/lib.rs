use paperflow_core::{Error, ObjectStore, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub mod embed;
pub mod encode;
pub mod normalize;
pub mod orchestrate;
pub mod reconstruct;
pub mod table;
pub mod transform;

/// Filesystem-backed object store. Keys are `/`-separated paths relative to
/// the root; `list` walks the tree and always returns keys sorted
/// lexicographically (the partitioning contract depends on stable listings).
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let mut p = self.root.clone();
        for part in key.split('/').filter(|s| !s.is_empty()) {
            p.push(part);
        }
        p
    }

    fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(rd) = fs::read_dir(dir) else {
            return;
        };
        for e in rd.flatten() {
            let p = e.path();
            if p.is_dir() {
                Self::collect_keys(root, &p, out);
            } else if let Ok(rel) = p.strip_prefix(root) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            Self::collect_keys(&root, &root, &mut keys);
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| Error::Store(format!("list join failed: {e}")))?
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.key_path(key);
        tokio::task::spawn_blocking(move || {
            fs::read(&path).map_err(|e| Error::Store(format!("{}: {e}", path.display())))
        })
        .await
        .map_err(|e| Error::Store(format!("get join failed: {e}")))?
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.key_path(key);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::Store(format!("{}: {e}", parent.display())))?;
            }
            fs::write(&path, bytes).map_err(|e| Error::Store(format!("{}: {e}", path.display())))
        })
        .await
        .map_err(|e| Error::Store(format!("put join failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_round_trips_and_lists_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf());

        store.put("works/b.json.gz", b"b").await.unwrap();
        store.put("works/a.json.gz", b"a").await.unwrap();
        store.put("markers/x.done", b"").await.unwrap();

        let keys = store.list("works/").await.unwrap();
        assert_eq!(keys, vec!["works/a.json.gz", "works/b.json.gz"]);

        assert_eq!(store.get("works/a.json.gz").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn listing_missing_prefix_is_empty_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf());
        assert!(store.list("absent/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_of_missing_key_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf());
        assert!(store.get("nope").await.is_err());
    }

    #[tokio::test]
    async fn put_overwrites_by_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf());
        store.put("data/x.parquet", b"one").await.unwrap();
        store.put("data/x.parquet", b"two").await.unwrap();
        assert_eq!(store.get("data/x.parquet").await.unwrap(), b"two");
        assert_eq!(store.list("data/").await.unwrap().len(), 1);
    }
}
