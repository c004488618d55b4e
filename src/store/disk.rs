// Durable storage backend.
//
// Layout:
//
// {root}/{hex(generation name)}/
//   generation.json          # {"name": "..."}
//   entries/{fingerprint}.entry
//
// An entry file is one line of JSON metadata followed by the raw body.
// Every file is written to a temp name and renamed into place, so a reader
// never sees a half-written entry and concurrent writers resolve to
// last-write-wins.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::CacheStorage;
use crate::error::{CacheError, CacheResult};
use crate::model::{CachedResponse, RequestKey, ResponseKind};

const GENERATION_FILE: &str = "generation.json";
const ENTRIES_DIR: &str = "entries";
const ENTRY_EXT: &str = "entry";

#[derive(Debug, Serialize, Deserialize)]
struct GenerationMeta {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: RequestKey,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    kind: ResponseKind,
}

pub struct DiskStorage {
    root: PathBuf,
    temp_seq: AtomicU64,
}

fn io_failure(what: &str, path: &Path, e: std::io::Error) -> CacheError {
    CacheError::store(format!("failed to {} {}: {}", what, path.display(), e))
}

impl DiskStorage {
    /// Use `root` as the store directory, creating it if needed.
    pub async fn open_root(root: &Path) -> CacheResult<Self> {
        fs::create_dir_all(root)
            .await
            .map_err(|e| io_failure("create", root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            temp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, generation: &str) -> PathBuf {
        self.root.join(hex::encode(generation.as_bytes()))
    }

    fn entry_path(&self, generation: &str, key: &RequestKey) -> PathBuf {
        self.generation_dir(generation)
            .join(ENTRIES_DIR)
            .join(format!("{}.{}", key.fingerprint(), ENTRY_EXT))
    }

    async fn write_atomic(&self, path: &Path, content: &[u8]) -> CacheResult<()> {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("tmp{}-{}", std::process::id(), seq));

        if let Err(e) = fs::write(&temp_path, content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_failure("write temp file", &temp_path, e));
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_failure("rename temp file to", path, e));
        }
        Ok(())
    }

    async fn read_entry(path: &Path) -> CacheResult<Option<CachedResponse>> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_failure("read", path, e)),
        };
        let (header, body) = decode_entry(raw)
            .ok_or_else(|| CacheError::store(format!("corrupt cache entry {}", path.display())))?;
        Ok(Some(CachedResponse {
            url: header.url,
            status: header.status,
            headers: header.headers,
            body,
            kind: header.kind,
        }))
    }

    async fn is_open(&self, generation: &str) -> bool {
        fs::metadata(self.generation_dir(generation).join(GENERATION_FILE))
            .await
            .is_ok()
    }
}

fn encode_entry(key: &RequestKey, response: &CachedResponse) -> CacheResult<Vec<u8>> {
    let header = EntryHeader {
        key: key.clone(),
        url: response.url.clone(),
        status: response.status,
        headers: response.headers.clone(),
        kind: response.kind,
    };
    // Compact JSON escapes newlines inside strings, so the first '\n' ends the header.
    let mut out = serde_json::to_vec(&header)
        .map_err(|e| CacheError::store(format!("failed to serialize entry {}: {}", key, e)))?;
    out.push(b'\n');
    out.extend_from_slice(&response.body);
    Ok(out)
}

fn decode_entry(raw: Vec<u8>) -> Option<(EntryHeader, Bytes)> {
    let split = raw.iter().position(|b| *b == b'\n')?;
    let header: EntryHeader = serde_json::from_slice(&raw[..split]).ok()?;
    let body = Bytes::from(raw).slice(split + 1..);
    Some((header, body))
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, generation: &str) -> CacheResult<()> {
        if self.is_open(generation).await {
            return Ok(());
        }
        let dir = self.generation_dir(generation);
        let entries = dir.join(ENTRIES_DIR);
        fs::create_dir_all(&entries)
            .await
            .map_err(|e| io_failure("create", &entries, e))?;

        let meta = serde_json::to_vec(&GenerationMeta {
            name: generation.to_string(),
        })
        .map_err(|e| CacheError::store(format!("failed to serialize generation meta: {}", e)))?;
        self.write_atomic(&dir.join(GENERATION_FILE), &meta).await?;
        debug!("opened generation {} at {}", generation, dir.display());
        Ok(())
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        response: &CachedResponse,
    ) -> CacheResult<()> {
        if !self.is_open(generation).await {
            return Err(CacheError::store(format!(
                "generation {} is not open",
                generation
            )));
        }
        let content = encode_entry(key, response)?;
        self.write_atomic(&self.entry_path(generation, key), &content)
            .await
    }

    async fn get(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> CacheResult<Option<CachedResponse>> {
        Self::read_entry(&self.entry_path(generation, key)).await
    }

    async fn keys(&self, generation: &str) -> CacheResult<Vec<RequestKey>> {
        let dir = self.generation_dir(generation).join(ENTRIES_DIR);
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_failure("list", &dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_failure("list", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_failure("read", &path, e)),
            };
            match decode_entry(raw) {
                Some((header, _)) => keys.push(header.key),
                None => warn!("skipping corrupt cache entry {}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn generation_names(&self) -> CacheResult<BTreeSet<String>> {
        let mut read_dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| io_failure("list", &self.root, e))?;

        let mut names = BTreeSet::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_failure("list", &self.root, e))?
        {
            let meta_path = entry.path().join(GENERATION_FILE);
            let raw = match fs::read(&meta_path).await {
                Ok(raw) => raw,
                // Not a generation, or one being deleted right now.
                Err(_) => continue,
            };
            match serde_json::from_slice::<GenerationMeta>(&raw) {
                Ok(meta) => {
                    names.insert(meta.name);
                }
                Err(e) => warn!("unreadable generation meta {}: {}", meta_path.display(), e),
            }
        }
        Ok(names)
    }

    async fn delete(&self, generation: &str) -> CacheResult<bool> {
        let dir = self.generation_dir(generation);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_failure("delete", &dir, e)),
        }
    }
}
