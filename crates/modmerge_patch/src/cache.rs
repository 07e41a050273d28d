//! Persistent cache of parsed definitions.
//!
//! # Layout
//!
//! ```text
//! {storage}/IndexCache/{game}/
//!   cache-version.txt                  # cache schema version
//!   game-version.txt                   # game versions the cache was built against
//!   {stem}.cache                       # MessagePack definitions, optionally zstd
//!   {stem}.cache.sig                   # JSON signature, see below
//! ```
//!
//! `{stem}` is derived from the mod path with [`cache_file_stem`]. The signature
//! records:
//!
//! ```json
//! {
//!   "version": 1,
//!   "fingerprint": 1234567890,
//!   "sourceFingerprint": 987654321,
//!   "compressed": true
//! }
//! ```
//!
//! `fingerprint` is computed over the cached definitions and checked on every read,
//! so a truncated or tampered blob is treated as a miss. Any read failure is logged
//! and reported as a miss; only write failures are returned as errors.

use crate::error::{Error, Result};
use crate::utils::{cache_file_stem, compute_definitions_fingerprint, write_atomic_async};
use camino::{Utf8Path, Utf8PathBuf};
use modmerge_definitions::Definition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Version of the on-disk cache format.
pub const CACHE_VERSION: u32 = 1;

/// Directory under the storage root holding every game's cache.
pub const INDEX_CACHE_DIR: &str = "IndexCache";

const CACHE_VERSION_FILE: &str = "cache-version.txt";
const GAME_VERSION_FILE: &str = "game-version.txt";
const CACHE_EXTENSION: &str = "cache";
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheSignature {
    version: u32,
    fingerprint: u64,
    #[serde(default)]
    source_fingerprint: Option<u64>,
    compressed: bool,
}

/// Reads and writes the parsed-definition cache of one storage root.
#[derive(Debug, Clone)]
pub struct GameIndexer {
    compress: bool,
}

impl Default for GameIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl GameIndexer {
    /// Create an indexer writing compressed entries.
    pub fn new() -> Self {
        Self { compress: true }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    fn game_dir(storage: &Utf8Path, game: &str) -> Utf8PathBuf {
        storage.join(INDEX_CACHE_DIR).join(game)
    }

    fn entry_path(storage: &Utf8Path, game: &str, path: &str) -> Utf8PathBuf {
        Self::game_dir(storage, game).join(format!("{}.{}", cache_file_stem(path), CACHE_EXTENSION))
    }

    fn signature_path(entry: &Utf8Path) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.sig", entry))
    }

    async fn read_signature(entry: &Utf8Path) -> Option<CacheSignature> {
        let sig_path = Self::signature_path(entry);
        let text = match tokio::fs::read_to_string(sig_path.as_std_path()).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read cache signature {}: {}", sig_path, e);
                return None;
            }
        };

        match serde_json::from_str::<CacheSignature>(&text) {
            Ok(sig) if sig.version == CACHE_VERSION => Some(sig),
            Ok(sig) => {
                tracing::debug!(
                    "Cache entry {} has version {}, expected {}",
                    entry,
                    sig.version,
                    CACHE_VERSION
                );
                None
            }
            Err(e) => {
                tracing::warn!("Corrupt cache signature {}: {}", sig_path, e);
                None
            }
        }
    }

    /// `true` if a current-version entry exists for `path`.
    pub async fn folder_cached(&self, storage: &Utf8Path, game: &str, path: &str) -> bool {
        let entry = Self::entry_path(storage, game, path);
        let exists = tokio::fs::try_exists(entry.as_std_path()).await.unwrap_or(false);
        exists && Self::read_signature(&entry).await.is_some()
    }

    /// `true` if the game's cache was written with schema `version`.
    pub async fn cached_definitions_same(&self, storage: &Utf8Path, game: &str, version: u32) -> bool {
        let path = Self::game_dir(storage, game).join(CACHE_VERSION_FILE);
        match tokio::fs::read_to_string(path.as_std_path()).await {
            Ok(text) => text.trim().parse::<u32>().ok() == Some(version),
            Err(_) => false,
        }
    }

    /// `true` if the game's cache was built against the same set of game versions.
    ///
    /// Order and duplicates are ignored.
    pub async fn game_versions_same(&self, storage: &Utf8Path, game: &str, versions: &[String]) -> bool {
        let path = Self::game_dir(storage, game).join(GAME_VERSION_FILE);
        let Ok(text) = tokio::fs::read_to_string(path.as_std_path()).await else {
            return false;
        };

        let cached: BTreeSet<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let current: BTreeSet<&str> = versions.iter().map(|v| v.trim()).collect();
        cached == current
    }

    /// Source fingerprint recorded when `path` was cached.
    pub async fn cached_source_fingerprint(
        &self,
        storage: &Utf8Path,
        game: &str,
        path: &str,
    ) -> Option<u64> {
        let entry = Self::entry_path(storage, game, path);
        Self::read_signature(&entry).await?.source_fingerprint
    }

    /// Load the cached definitions of `path`.
    ///
    /// Returns `None` on a miss and on any read, decode or fingerprint failure.
    pub async fn get_definitions(
        &self,
        storage: &Utf8Path,
        game: &str,
        path: &str,
    ) -> Option<Vec<Definition>> {
        let entry = Self::entry_path(storage, game, path);
        let signature = Self::read_signature(&entry).await?;

        let bytes = match tokio::fs::read(entry.as_std_path()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to read cache entry {}: {}", entry, e);
                return None;
            }
        };

        let decoded = tokio::task::spawn_blocking(move || decode_entry(&bytes, &signature)).await;
        match decoded {
            Ok(Ok(definitions)) => {
                tracing::debug!("Cache hit for {} ({} definitions)", path, definitions.len());
                Some(definitions)
            }
            Ok(Err(e)) => {
                tracing::warn!("Discarding cache entry {}: {}", entry, e);
                None
            }
            Err(e) => {
                tracing::warn!("Cache decode task failed for {}: {}", entry, e);
                None
            }
        }
    }

    /// Cache the definitions parsed from `path`.
    ///
    /// Every definition must come from `path`'s mod. Returns `Ok(false)` for an
    /// empty set, which is not written.
    pub async fn save_definitions(
        &self,
        storage: &Utf8Path,
        game: &str,
        path: &str,
        definitions: &[Definition],
        source_fingerprint: Option<u64>,
    ) -> Result<bool> {
        let paths: BTreeSet<&str> = definitions.iter().map(|d| d.mod_path.as_str()).collect();
        if paths.len() > 1 {
            let paths: Vec<String> = paths.into_iter().map(str::to_string).collect();
            tracing::error!("Refusing to cache definitions from {} mod paths", paths.len());
            return Err(Error::MixedModPaths { paths });
        }
        if definitions.is_empty() {
            return Ok(false);
        }

        let signature = CacheSignature {
            version: CACHE_VERSION,
            fingerprint: compute_definitions_fingerprint(definitions),
            source_fingerprint,
            compressed: self.compress,
        };

        let mut blob = rmp_serde::to_vec_named(definitions)?;
        if self.compress {
            blob = tokio::task::spawn_blocking(move || zstd::encode_all(blob.as_slice(), ZSTD_LEVEL))
                .await
                .map_err(|e| Error::Compression(e.to_string()))?
                .map_err(|e| Error::Compression(e.to_string()))?;
        }

        let entry = Self::entry_path(storage, game, path);
        write_atomic_async(&entry, &blob).await?;
        let sig = serde_json::to_vec_pretty(&signature)?;
        write_atomic_async(&Self::signature_path(&entry), &sig).await?;

        tracing::debug!(
            "Cached {} definitions for {} ({} bytes)",
            definitions.len(),
            path,
            blob.len()
        );
        Ok(true)
    }

    /// Record the cache schema version and game versions for `game`.
    pub async fn write_version(
        &self,
        storage: &Utf8Path,
        game: &str,
        versions: &[String],
        cache_version: u32,
    ) -> Result<()> {
        let dir = Self::game_dir(storage, game);
        write_atomic_async(&dir.join(CACHE_VERSION_FILE), cache_version.to_string().as_bytes())
            .await?;

        let versions: BTreeSet<&str> = versions.iter().map(|v| v.trim()).collect();
        let text = versions.into_iter().collect::<Vec<_>>().join("\n");
        write_atomic_async(&dir.join(GAME_VERSION_FILE), text.as_bytes()).await?;
        Ok(())
    }

    /// Remove the whole cache of `game`. Returns `false` if removal failed.
    pub async fn clear_definition(&self, storage: &Utf8Path, game: &str) -> bool {
        let dir = Self::game_dir(storage, game);
        match tokio::fs::remove_dir_all(dir.as_std_path()).await {
            Ok(()) => {
                tracing::info!("Cleared definition cache for {}", game);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("Failed to clear cache {}: {}", dir, e);
                false
            }
        }
    }

    /// Remove the entry of one mod path. Returns `false` if removal failed.
    pub async fn clear_path(&self, storage: &Utf8Path, game: &str, path: &str) -> bool {
        let entry = Self::entry_path(storage, game, path);
        let mut ok = true;
        for file in [Self::signature_path(&entry), entry] {
            match tokio::fs::remove_file(file.as_std_path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to remove {}: {}", file, e);
                    ok = false;
                }
            }
        }
        ok
    }
}

fn decode_entry(bytes: &[u8], signature: &CacheSignature) -> Result<Vec<Definition>> {
    let definitions: Vec<Definition> = if signature.compressed {
        let raw = zstd::decode_all(bytes).map_err(|e| Error::Compression(e.to_string()))?;
        rmp_serde::from_slice(&raw)?
    } else {
        rmp_serde::from_slice(bytes)?
    };

    let fingerprint = compute_definitions_fingerprint(&definitions);
    if fingerprint != signature.fingerprint {
        return Err(Error::Other(format!(
            "fingerprint mismatch: expected {:016x}, found {:016x}",
            signature.fingerprint, fingerprint
        )));
    }
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GAME: &str = "Stellaris";
    const MOD_PATH: &str = "/mods/my_mod";

    fn storage() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn definitions() -> Vec<Definition> {
        ["building_a", "building_b"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Definition::builder("common/buildings", *id, "common/buildings/b.txt")
                    .mod_name("My Mod")
                    .mod_path(MOD_PATH)
                    .order(i)
                    .code(format!("{} = {{ cost = {} }}", id, i))
                    .build()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_compressed_and_flat() {
        for compress in [true, false] {
            let (_guard, root) = storage();
            let indexer = GameIndexer::new().with_compression(compress);

            assert!(!indexer.folder_cached(&root, GAME, MOD_PATH).await);
            assert!(indexer
                .save_definitions(&root, GAME, MOD_PATH, &definitions(), Some(42))
                .await
                .unwrap());
            assert!(indexer.folder_cached(&root, GAME, MOD_PATH).await);

            let loaded = indexer.get_definitions(&root, GAME, MOD_PATH).await.unwrap();
            assert_eq!(loaded, definitions());
            assert_eq!(
                indexer.cached_source_fingerprint(&root, GAME, MOD_PATH).await,
                Some(42)
            );
        }
    }

    #[tokio::test]
    async fn test_mixed_mod_paths_rejected() {
        let (_guard, root) = storage();
        let mut defs = definitions();
        defs[1].mod_path = "/mods/other".to_string();

        let result = GameIndexer::new()
            .save_definitions(&root, GAME, MOD_PATH, &defs, None)
            .await;
        assert!(matches!(result, Err(Error::MixedModPaths { .. })));
    }

    #[tokio::test]
    async fn test_empty_set_not_written() {
        let (_guard, root) = storage();
        let indexer = GameIndexer::new();
        assert!(!indexer.save_definitions(&root, GAME, MOD_PATH, &[], None).await.unwrap());
        assert!(!indexer.folder_cached(&root, GAME, MOD_PATH).await);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_a_miss() {
        let (_guard, root) = storage();
        let indexer = GameIndexer::new();
        indexer
            .save_definitions(&root, GAME, MOD_PATH, &definitions(), None)
            .await
            .unwrap();

        let entry = GameIndexer::entry_path(&root, GAME, MOD_PATH);
        std::fs::write(entry.as_std_path(), b"not a cache entry").unwrap();
        assert!(indexer.get_definitions(&root, GAME, MOD_PATH).await.is_none());
    }

    #[tokio::test]
    async fn test_versions() {
        let (_guard, root) = storage();
        let indexer = GameIndexer::new();
        let versions = vec!["3.10.4".to_string(), "3.10.0".to_string()];

        assert!(!indexer.cached_definitions_same(&root, GAME, CACHE_VERSION).await);
        indexer
            .write_version(&root, GAME, &versions, CACHE_VERSION)
            .await
            .unwrap();

        assert!(indexer.cached_definitions_same(&root, GAME, CACHE_VERSION).await);
        assert!(!indexer.cached_definitions_same(&root, GAME, CACHE_VERSION + 1).await);

        let reordered = vec!["3.10.0".to_string(), "3.10.4".to_string()];
        assert!(indexer.game_versions_same(&root, GAME, &reordered).await);
        assert!(!indexer.game_versions_same(&root, GAME, &["3.11.0".to_string()]).await);
    }

    #[tokio::test]
    async fn test_clear() {
        let (_guard, root) = storage();
        let indexer = GameIndexer::new();
        indexer
            .save_definitions(&root, GAME, MOD_PATH, &definitions(), None)
            .await
            .unwrap();

        assert!(indexer.clear_path(&root, GAME, MOD_PATH).await);
        assert!(!indexer.folder_cached(&root, GAME, MOD_PATH).await);

        indexer
            .save_definitions(&root, GAME, MOD_PATH, &definitions(), None)
            .await
            .unwrap();
        assert!(indexer.clear_definition(&root, GAME).await);
        assert!(!indexer.folder_cached(&root, GAME, MOD_PATH).await);
        assert!(indexer.clear_definition(&root, GAME).await);
    }
}
