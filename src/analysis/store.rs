//! On-disk chunk store.
//!
//! Layout under the store root:
//!
//! ```text
//! chunk_000000.txt          raw chunk text, one file per sequence number
//! chunk_000001.txt
//! chunks_metadata.json      ChunkManifest
//! results/chunk_000000.json one ChunkResult per completed chunk
//! ```
//!
//! Zero padding keeps lexicographic file order equal to sequence order.
//! Results are written through a temp file and renamed into place, so a crash
//! leaves either a complete result or none. Each worker only ever writes its
//! own sequence-numbered file, which is why no locking is needed.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::StoreError;
use super::types::{Chunk, ChunkResult};

pub const MANIFEST_FILE: &str = "chunks_metadata.json";
pub const RESULTS_DIR: &str = "results";
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

const CHUNK_PREFIX: &str = "chunk_";

/// File name of a chunk's raw text.
pub fn chunk_file_name(sequence_number: usize) -> String {
    format!("{}{:06}.txt", CHUNK_PREFIX, sequence_number)
}

/// File name of a chunk's persisted result.
pub fn result_file_name(sequence_number: usize) -> String {
    format!("{}{:06}.json", CHUNK_PREFIX, sequence_number)
}

/// Parse the sequence number out of `chunk_NNNNNN.<ext>`.
fn parse_sequence_number(file_name: &str, ext: &str) -> Option<usize> {
    let digits = file_name
        .strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(ext)?
        .strip_suffix('.')?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Hex SHA-256 of a string.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parameters that determine how a corpus was split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitParams {
    pub max_tokens_per_chunk: usize,
    /// Identity of the token counter used
    pub counter: String,
}

/// What the chunks were split from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub case_id: String,
    pub dump_path: PathBuf,
    pub content_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub sequence_number: usize,
    pub file_name: String,
    pub token_count: usize,
    pub content_sha256: String,
}

/// Metadata describing a persisted split.
///
/// A persisted split is reused only if its format version, split parameters,
/// source and chunk count all match the split about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub format_version: u32,
    /// RFC 3339 creation time
    pub created_at: String,
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub split: SplitParams,
    pub source: SourceInfo,
    pub chunks: Vec<ChunkEntry>,
}

impl ChunkManifest {
    pub fn new(chunks: &[Chunk], split: SplitParams, source: SourceInfo) -> Self {
        let entries = chunks
            .iter()
            .map(|c| ChunkEntry {
                sequence_number: c.sequence_number,
                file_name: chunk_file_name(c.sequence_number),
                token_count: c.token_count,
                content_sha256: sha256_hex(&c.content),
            })
            .collect();

        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            total_chunks: chunks.len(),
            total_tokens: chunks.iter().map(|c| c.token_count).sum(),
            split,
            source,
            chunks: entries,
        }
    }

    /// Whether a persisted manifest describes the same split as `self`.
    ///
    /// The creation time is ignored.
    pub fn is_compatible_with(&self, other: &ChunkManifest) -> bool {
        self.format_version == other.format_version
            && self.split == other.split
            && self.source == other.source
            && self.total_chunks == other.total_chunks
            && self.chunks == other.chunks
    }
}

/// Result of [`ChunkStore::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// A compatible split was already on disk; its results are kept.
    Reused,
    /// A fresh split was written; stale chunks and results were removed.
    Written,
}

/// A persisted result that could not be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedResult {
    pub path: PathBuf,
    pub reason: String,
}

/// Results loaded from a store, plus the files that were passed over.
#[derive(Debug, Default)]
pub struct LoadedResults {
    pub results: BTreeMap<usize, ChunkResult>,
    pub skipped: Vec<SkippedResult>,
}

fn read_result(path: &Path, sequence_number: usize) -> Result<ChunkResult, String> {
    let contents = fs::read_to_string(path).map_err(|e| format!("unreadable: {}", e))?;
    let result: ChunkResult =
        serde_json::from_str(&contents).map_err(|e| format!("corrupt: {}", e))?;
    if result.sequence_number != sequence_number {
        return Err(format!(
            "filed under chunk {} but records chunk {}",
            sequence_number, result.sequence_number
        ));
    }
    if !result.is_well_formed() {
        return Err("scores out of range".to_string());
    }
    Ok(result)
}

/// Flat-file store for one analysis pass.
#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
    sealed: AtomicBool,
}

impl ChunkStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            sealed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn chunk_path(&self, sequence_number: usize) -> PathBuf {
        self.root.join(chunk_file_name(sequence_number))
    }

    pub fn result_path(&self, sequence_number: usize) -> PathBuf {
        self.results_dir().join(result_file_name(sequence_number))
    }

    /// Refuse further chunk writes; results may still be written.
    pub fn begin_analysis(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn ensure_unsealed(&self) -> Result<(), StoreError> {
        if self.is_sealed() {
            return Err(StoreError::Sealed(self.root.clone()));
        }
        Ok(())
    }

    /// Write one chunk's raw text, flushed and synced before returning.
    pub fn write_chunk(&self, sequence_number: usize, content: &str) -> Result<(), StoreError> {
        self.ensure_unsealed()?;
        let path = self.chunk_path(sequence_number);

        let file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(content.as_bytes())
            .map_err(|e| StoreError::io(&path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::io(&path, e.into_error()))?;
        file.sync_all().map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    pub fn read_chunk(&self, sequence_number: usize) -> Result<String, StoreError> {
        let path = self.chunk_path(sequence_number);
        fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))
    }

    /// Persist a chunk result atomically.
    pub fn write_result(&self, result: &ChunkResult) -> Result<(), StoreError> {
        let dir = self.results_dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = self.result_path(result.sequence_number);
        let json = serde_json::to_string_pretty(result).map_err(|e| StoreError::Encode {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, json.as_bytes())
    }

    /// Load every readable result on disk, keyed by sequence number.
    ///
    /// Unreadable, unparsable or inconsistent files are skipped with a
    /// warning; the corresponding chunks are simply analyzed again.
    pub fn load_existing_results(&self) -> Result<BTreeMap<usize, ChunkResult>, StoreError> {
        Ok(self.load_results()?.results)
    }

    /// Like [`load_existing_results`](Self::load_existing_results), but also
    /// reports which files were skipped and why.
    pub fn load_results(&self) -> Result<LoadedResults, StoreError> {
        let dir = self.results_dir();
        let mut loaded = LoadedResults::default();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(loaded),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(sequence_number) = parse_sequence_number(&file_name, "json") else {
                continue;
            };

            let path = entry.path();
            match read_result(&path, sequence_number) {
                Ok(result) => {
                    loaded.results.insert(sequence_number, result);
                }
                Err(reason) => {
                    warn!(path = ?path, reason = %reason, "Skipping chunk result");
                    loaded.skipped.push(SkippedResult { path, reason });
                }
            }
        }

        loaded.skipped.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            root = ?self.root,
            count = loaded.results.len(),
            skipped = loaded.skipped.len(),
            "Loaded existing chunk results"
        );
        Ok(loaded)
    }

    /// Read the persisted manifest, if present.
    pub fn load_manifest(&self) -> Result<Option<ChunkManifest>, StoreError> {
        let path = self.manifest_path();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    fn write_manifest(&self, manifest: &ChunkManifest) -> Result<(), StoreError> {
        self.ensure_unsealed()?;
        let path = self.manifest_path();
        let json = serde_json::to_string_pretty(manifest).map_err(|e| StoreError::Encode {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, json.as_bytes())
    }

    /// Make the store hold exactly `chunks`.
    ///
    /// A compatible persisted split whose chunk files are intact is reused
    /// together with its results. Anything else is cleared and rewritten.
    pub fn prepare(
        &self,
        chunks: &[Chunk],
        manifest: &ChunkManifest,
    ) -> Result<PrepareOutcome, StoreError> {
        self.ensure_unsealed()?;

        match self.load_manifest() {
            Ok(Some(existing)) if existing.is_compatible_with(manifest) => {
                if self.chunk_files_intact(&existing) {
                    info!(
                        root = ?self.root,
                        chunks = existing.total_chunks,
                        "Reusing persisted chunk split"
                    );
                    return Ok(PrepareOutcome::Reused);
                }
                warn!(root = ?self.root, "Persisted chunk files do not match manifest; resplitting");
            }
            Ok(Some(_)) => {
                info!(root = ?self.root, "Split configuration or input changed; resplitting");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable chunk manifest; resplitting");
            }
        }

        self.clear()?;
        for chunk in chunks {
            self.write_chunk(chunk.sequence_number, &chunk.content)?;
        }
        self.write_manifest(manifest)?;

        info!(root = ?self.root, chunks = chunks.len(), "Wrote chunk split");
        Ok(PrepareOutcome::Written)
    }

    fn chunk_files_intact(&self, manifest: &ChunkManifest) -> bool {
        manifest.chunks.iter().all(|entry| {
            match fs::read_to_string(self.root.join(&entry.file_name)) {
                Ok(content) => sha256_hex(&content) == entry.content_sha256,
                Err(_) => false,
            }
        })
    }

    /// Remove chunk files, results and the manifest.
    fn clear(&self) -> Result<(), StoreError> {
        self.ensure_unsealed()?;

        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if parse_sequence_number(&name, "txt").is_some() {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            }
        }

        let results = self.results_dir();
        if results.exists() {
            fs::remove_dir_all(&results).map_err(|e| StoreError::io(&results, e))?;
        }

        let manifest = self.manifest_path();
        if manifest.exists() {
            fs::remove_file(&manifest).map_err(|e| StoreError::io(&manifest, e))?;
        }
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file, sync it and rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
    file.write_all(bytes)
        .map_err(|e| StoreError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StoreError::io(path, e)
    })
}
