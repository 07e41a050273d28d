//! Path normalization, fingerprints and atomic writes.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use modmerge_definitions::Definition;
use std::io::Write;
use xxhash_rust::xxh3::xxh3_64;

/// Normalize a mod-relative path to forward slashes.
pub fn normalize_rel_path(rel_path: &Utf8Path) -> String {
    rel_path
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
        .replace('\\', "/")
}

/// Compute an xxHash3 fingerprint from every file's relative path, size and
/// modification time under `dir`.
///
/// Entries are sorted first so the result does not depend on directory iteration
/// order. Any edit, addition or removal changes the fingerprint.
pub fn compute_source_fingerprint(dir: &Utf8Path) -> Result<u64> {
    if !dir.as_std_path().is_dir() {
        return Err(Error::InvalidModDir(dir.to_path_buf()));
    }

    let mut entries: Vec<(String, u64, u64)> = Vec::new();
    for entry in walkdir::WalkDir::new(dir.as_std_path()) {
        let entry = entry.map_err(|e| Error::Other(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            tracing::warn!("Skipping non-UTF-8 path: {}", entry.path().display());
            continue;
        };
        let rel = path.strip_prefix(dir).unwrap_or(path);

        let metadata = entry.metadata().map_err(|e| Error::Other(e.to_string()))?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        entries.push((normalize_rel_path(rel), metadata.len(), modified));
    }
    entries.sort();

    let mut hasher_input = Vec::new();
    for (path, len, modified) in &entries {
        hasher_input.extend_from_slice(path.as_bytes());
        hasher_input.push(0);
        hasher_input.extend_from_slice(&len.to_le_bytes());
        hasher_input.extend_from_slice(&modified.to_le_bytes());
    }

    Ok(xxh3_64(&hasher_input))
}

/// Deterministic fingerprint of a definition set's content.
///
/// Based on the sorted `definition_sha` of every definition, so the same set in
/// any order gives the same value. Returns `0` for an empty set.
pub fn compute_definitions_fingerprint<'a, I>(definitions: I) -> u64
where
    I: IntoIterator<Item = &'a Definition>,
{
    let mut shas: Vec<&str> = definitions
        .into_iter()
        .map(|d| d.definition_sha())
        .collect();
    if shas.is_empty() {
        return 0;
    }
    shas.sort_unstable();

    let mut buf = Vec::with_capacity(shas.len() * 65);
    for sha in shas {
        buf.extend_from_slice(sha.as_bytes());
        buf.push(b'\n');
    }
    xxh3_64(&buf)
}

/// Cache file stem for an arbitrary path key.
///
/// The last path segment keeps entries recognizable on disk. The xxHash3 suffix
/// keeps keys that sanitize to the same name apart. Separators are normalized
/// but case is kept, so paths differing only in case get distinct stems.
pub fn cache_file_stem(key: &str) -> String {
    let normalized = key.replace('\\', "/");
    let last = normalized
        .to_lowercase()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '.' })
        .collect::<String>();
    format!("{}-{:016x}", last, xxh3_64(normalized.as_bytes()))
}

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// Readers never observe a partially written file: either the previous content
/// or the complete new content is present.
pub fn write_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| Utf8PathBuf::from("."));
    std::fs::create_dir_all(parent.as_std_path())?;

    let mut temp = tempfile::NamedTempFile::new_in(parent.as_std_path())?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path.as_std_path()).map_err(|e| e.error)?;
    Ok(())
}

/// Async counterpart of [`write_atomic`].
pub async fn write_atomic_async(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent.as_std_path()).await?;
    }

    let file_name = path.file_name().unwrap_or("entry");
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    if let Err(e) = tokio::fs::write(temp_path.as_std_path(), bytes).await {
        let _ = tokio::fs::remove_file(temp_path.as_std_path()).await;
        return Err(e.into());
    }
    tokio::fs::rename(temp_path.as_std_path(), path.as_std_path()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    fn def(id: &str, code: &str) -> Definition {
        Definition::builder("events", id, "events/a.txt")
            .code(code)
            .build()
    }

    #[test]
    fn test_normalize_rel_path() {
        let path = Utf8PathBuf::from("common/buildings/foo.txt");
        assert_eq!(normalize_rel_path(&path), "common/buildings/foo.txt");
    }

    #[test]
    fn test_definitions_fingerprint_order_independent() {
        let a = def("a", "a = 1");
        let b = def("b", "b = 2");
        assert_eq!(
            compute_definitions_fingerprint([&a, &b]),
            compute_definitions_fingerprint([&b, &a])
        );
    }

    #[test]
    fn test_definitions_fingerprint_content_sensitive() {
        let a = def("a", "a = 1");
        let changed = def("a", "a = 2");
        assert_ne!(
            compute_definitions_fingerprint([&a]),
            compute_definitions_fingerprint([&changed])
        );
    }

    #[test]
    fn test_definitions_fingerprint_empty() {
        assert_eq!(compute_definitions_fingerprint(std::iter::empty()), 0);
    }

    #[test]
    fn test_source_fingerprint_detects_changes() {
        let (_guard, dir) = utf8_tempdir();
        std::fs::create_dir_all(dir.join("events")).unwrap();
        std::fs::write(dir.join("events/a.txt"), "a = 1").unwrap();

        let first = compute_source_fingerprint(&dir).unwrap();
        assert_eq!(first, compute_source_fingerprint(&dir).unwrap());

        std::fs::write(dir.join("events/b.txt"), "b = 1").unwrap();
        assert_ne!(first, compute_source_fingerprint(&dir).unwrap());
    }

    #[test]
    fn test_source_fingerprint_missing_dir() {
        let (_guard, dir) = utf8_tempdir();
        assert!(compute_source_fingerprint(&dir.join("missing")).is_err());
    }

    #[test]
    fn test_cache_file_stem() {
        let a = cache_file_stem("C:\\Mods\\My Mod");
        let b = cache_file_stem("C:/Mods/My Mod");
        assert_eq!(a, b);
        assert!(a.starts_with("my.mod-"));
        assert_ne!(cache_file_stem("/mods/a.b/c"), cache_file_stem("/mods/a/b.c"));
    }

    #[test]
    fn test_cache_file_stem_keeps_case_apart() {
        let upper = cache_file_stem("/mods/Better Ships");
        let lower = cache_file_stem("/mods/better ships");
        assert_ne!(upper, lower);
        assert!(upper.starts_with("better.ships-"));
        assert!(lower.starts_with("better.ships-"));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let (_guard, dir) = utf8_tempdir();
        let path = dir.join("nested/out.txt");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(path.as_std_path()).unwrap(), b"second");

        let leftovers = std::fs::read_dir(dir.join("nested").as_std_path())
            .unwrap()
            .count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_write_atomic_async() {
        let (_guard, dir) = utf8_tempdir();
        let path = dir.join("cache/entry.bin");

        write_atomic_async(&path, b"data").await.unwrap();
        assert_eq!(tokio::fs::read(path.as_std_path()).await.unwrap(), b"data");
    }
}
