//! File-backed cache storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<hex(store name)>/store.json      manifest: name + creation time
//! <root>/<hex(store name)>/<sha256(key)>.entry
//! ```
//!
//! An entry file is a 4-byte big-endian metadata length, the JSON metadata,
//! then the raw body. Entries are written to a temp file and renamed into
//! place, so readers see either the old entry or the new one.

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{CachedResponse, Response, ResponseKind};
use crate::traits::{CacheStorage, CacheStore};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

const MANIFEST: &str = "store.json";
const ENTRY_EXT: &str = "entry";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    name: String,
    created_unix_nanos: u128,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    kind: ResponseKind,
    vary: Vec<(String, Option<String>)>,
}

/// Cache storage persisted under a root directory.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn open_root(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name.as_bytes()))
    }

    async fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
        match fs::read(dir.join(MANIFEST)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_store(&self, name: &str, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;
        if Self::read_manifest(dir).await?.is_some() {
            return Ok(());
        }
        let created_unix_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let manifest = Manifest {
            name: name.to_string(),
            created_unix_nanos,
        };
        write_atomic(&dir.join(MANIFEST), &serde_json::to_vec(&manifest)?).await
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let dir = self.store_dir(name);
        self.create_store(name, &dir)
            .await
            .map_err(|e| Error::StoreOpen {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(DiskStore {
            name: name.to_string(),
            dir,
        }))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(Self::read_manifest(&self.store_dir(name)).await?.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut manifests = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::read_manifest(&entry.path()).await {
                Ok(Some(manifest)) => manifests.push(manifest),
                // Half-created or foreign directory
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable store manifest");
                }
            }
        }
        manifests.sort_by(|a, b| {
            a.created_unix_nanos
                .cmp(&b.created_unix_nanos)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(manifests.into_iter().map(|m| m.name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_dir_all(self.store_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::StoreDelete {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// One named store: a directory of entry files.
pub struct DiskStore {
    name: String,
    dir: PathBuf,
}

impl DiskStore {
    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.{ENTRY_EXT}", hex::encode(digest)))
    }

    async fn read_entry(path: &Path) -> Result<Option<(EntryMeta, Bytes)>> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_entry(Bytes::from(raw)).map(Some)
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            // Store deleted underneath us
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
        let key = request.cache_key();
        let Some((meta, body)) = Self::read_entry(&self.entry_path(&key)).await? else {
            return Ok(None);
        };
        if meta.key != key {
            return Err(Error::Corrupt(format!(
                "entry for '{key}' holds key '{}'",
                meta.key
            )));
        }
        let snapshot = CachedResponse {
            status: meta.status,
            headers: meta.headers,
            kind: meta.kind,
            body,
            vary: meta.vary,
        };
        Ok(snapshot.matches_vary(request).then_some(snapshot))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        let key = request.cache_key();
        let snapshot = CachedResponse::capture(request, response)?;
        let meta = EntryMeta {
            key: key.clone(),
            status: snapshot.status,
            headers: snapshot.headers,
            kind: snapshot.kind,
            vary: snapshot.vary,
        };
        let encoded = encode_entry(&meta, &snapshot.body)?;
        write_atomic(&self.entry_path(&key), &encoded).await
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        match fs::remove_file(self.entry_path(&request.cache_key())).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.entry_files().await? {
            if let Some((meta, _)) = Self::read_entry(&path).await? {
                keys.push(meta.key);
            }
        }
        Ok(keys)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entry_files().await?.len())
    }
}

fn encode_entry(meta: &EntryMeta, body: &[u8]) -> Result<Vec<u8>> {
    let meta = serde_json::to_vec(meta)?;
    let meta_len = u32::try_from(meta.len())
        .map_err(|_| Error::Corrupt("entry metadata exceeds 4 GiB".into()))?;
    let mut out = Vec::with_capacity(4 + meta.len() + body.len());
    out.extend_from_slice(&meta_len.to_be_bytes());
    out.extend_from_slice(&meta);
    out.extend_from_slice(body);
    Ok(out)
}

fn decode_entry(raw: Bytes) -> Result<(EntryMeta, Bytes)> {
    let len_bytes: [u8; 4] = raw
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Corrupt("entry shorter than its header".into()))?;
    let meta_end = 4 + u32::from_be_bytes(len_bytes) as usize;
    if raw.len() < meta_end {
        return Err(Error::Corrupt("entry metadata truncated".into()));
    }
    let meta: EntryMeta = serde_json::from_slice(&raw[4..meta_end])?;
    Ok((meta, raw.slice(meta_end..)))
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp-{}-{seq}", std::process::id()));
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
