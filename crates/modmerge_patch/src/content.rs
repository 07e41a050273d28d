//! Mod content provider abstraction.
//!
//! This module defines the [`ModContentProvider`] trait that decouples indexing
//! from any particular mod storage format. Implementations provide access to:
//!
//! - Mod metadata (display name, source path, declared dependencies)
//! - The list of mod-relative files
//! - Raw file bytes
//!
//! The crate ships [`FsModContent`] for reading unpacked mod folders and the game's
//! own install directory.

use crate::error::{Error, Result};
use crate::utils::{compute_source_fingerprint, normalize_rel_path};
use camino::{Utf8Path, Utf8PathBuf};
use modmerge_definitions::{ScriptTokenizer, ShallowTokenizer};

/// Name of the descriptor file at the root of every mod folder.
pub const DESCRIPTOR_FILE: &str = "descriptor.mod";

/// Abstracts how mod content is accessed during indexing.
///
/// # Implementing
///
/// Implementations must be [`Send`] so per-mod parsing can run on the rayon pool.
/// Methods that touch storage take `&mut self` to allow stateful readers (e.g.,
/// seeking within an archive).
///
/// Paths returned by [`list_files`](Self::list_files) are mod-relative and use `/`
/// separators. They are passed back unchanged to [`read_file`](Self::read_file).
pub trait ModContentProvider: Send {
    /// Display name used for provenance and ignore rules.
    fn mod_name(&self) -> &str;

    /// Source location of the mod. Also the definition cache key.
    fn mod_path(&self) -> &str;

    /// `true` for the base game's own content.
    fn is_from_game(&self) -> bool {
        false
    }

    /// Names of the mods this mod declares as dependencies.
    fn dependencies(&mut self) -> Result<Vec<String>>;

    /// Every content file of the mod, sorted.
    fn list_files(&mut self) -> Result<Vec<Utf8PathBuf>>;

    /// Read one file returned by [`list_files`](Self::list_files).
    fn read_file(&mut self, path: &Utf8Path) -> Result<Vec<u8>>;

    /// Fingerprint of the source content, if the provider can compute one cheaply.
    ///
    /// Used to decide whether cached definitions are still valid. Providers that
    /// return `None` are always re-parsed.
    fn source_fingerprint(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// Filesystem-backed mod content provider.
///
/// Reads an unpacked mod folder:
///
/// ```text
/// my_mod/
///   descriptor.mod               # name = "...", dependencies = { "..." }
///   common/
///     buildings/
///       my_buildings.txt
///   events/
///     my_events.txt
///   localisation/
///     english/
///       my_l_english.yml
/// ```
///
/// The descriptor and hidden entries (names starting with `.`) are never listed as
/// content. When no descriptor exists, the folder name is used as the mod name.
pub struct FsModContent {
    mod_dir: Utf8PathBuf,
    name: String,
    dependencies: Vec<String>,
    is_from_game: bool,
}

impl FsModContent {
    /// Open a mod folder and read its descriptor.
    pub fn open(mod_dir: Utf8PathBuf) -> Result<Self> {
        if !mod_dir.as_std_path().is_dir() {
            return Err(Error::InvalidModDir(mod_dir));
        }

        let fallback_name = mod_dir.file_name().unwrap_or(mod_dir.as_str()).to_string();
        let descriptor_path = mod_dir.join(DESCRIPTOR_FILE);
        let (name, dependencies) = if descriptor_path.as_std_path().is_file() {
            let text = std::fs::read_to_string(descriptor_path.as_std_path())?;
            let descriptor = Descriptor::parse(&text);
            (descriptor.name.unwrap_or(fallback_name), descriptor.dependencies)
        } else {
            tracing::debug!("No descriptor in {}, using folder name", mod_dir);
            (fallback_name, Vec::new())
        };

        Ok(Self {
            mod_dir,
            name,
            dependencies,
            is_from_game: false,
        })
    }

    /// Open the game's install directory as a content source.
    pub fn game(game_dir: Utf8PathBuf, name: impl Into<String>) -> Result<Self> {
        if !game_dir.as_std_path().is_dir() {
            return Err(Error::InvalidModDir(game_dir));
        }
        Ok(Self {
            mod_dir: game_dir,
            name: name.into(),
            dependencies: Vec::new(),
            is_from_game: true,
        })
    }

    pub fn mod_dir(&self) -> &Utf8Path {
        &self.mod_dir
    }
}

impl ModContentProvider for FsModContent {
    fn mod_name(&self) -> &str {
        &self.name
    }

    fn mod_path(&self) -> &str {
        self.mod_dir.as_str()
    }

    fn is_from_game(&self) -> bool {
        self.is_from_game
    }

    fn dependencies(&mut self) -> Result<Vec<String>> {
        Ok(self.dependencies.clone())
    }

    fn list_files(&mut self) -> Result<Vec<Utf8PathBuf>> {
        let mut files = Vec::new();
        let walker = walkdir::WalkDir::new(self.mod_dir.as_std_path())
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = entry.map_err(|e| Error::Other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                tracing::warn!("Skipping non-UTF-8 path: {}", entry.path().display());
                continue;
            };
            let rel = path.strip_prefix(&self.mod_dir).unwrap_or(path);
            if entry.depth() == 1 && rel.as_str().eq_ignore_ascii_case(DESCRIPTOR_FILE) {
                continue;
            }
            files.push(Utf8PathBuf::from(normalize_rel_path(rel)));
        }

        files.sort();
        Ok(files)
    }

    fn read_file(&mut self, path: &Utf8Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.mod_dir.join(path).as_std_path())?)
    }

    fn source_fingerprint(&mut self) -> Result<Option<u64>> {
        compute_source_fingerprint(&self.mod_dir).map(Some)
    }
}

/// The fields of `descriptor.mod` indexing cares about.
#[derive(Debug, Default, PartialEq, Eq)]
struct Descriptor {
    name: Option<String>,
    dependencies: Vec<String>,
}

impl Descriptor {
    fn parse(text: &str) -> Self {
        let elements = match ShallowTokenizer.tokenize(text) {
            Ok(elements) => elements,
            Err(e) => {
                tracing::warn!("Malformed descriptor: {}", e);
                return Self::default();
            }
        };

        let mut descriptor = Self::default();
        for element in elements {
            if element.key.eq_ignore_ascii_case("name") {
                descriptor.name = element.scalar().map(str::to_string);
            } else if element.key.eq_ignore_ascii_case("dependencies") {
                descriptor.dependencies = element
                    .children()
                    .iter()
                    .map(|dep| dep.key.trim_matches('"').to_string())
                    .filter(|dep| !dep.is_empty())
                    .collect();
            }
        }
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_mod_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempdir().unwrap();
        let mod_dir = Utf8PathBuf::from_path_buf(dir.path().join("my_mod")).unwrap();

        fs::create_dir_all(mod_dir.join("common/buildings")).unwrap();
        fs::create_dir_all(mod_dir.join("events")).unwrap();
        fs::create_dir_all(mod_dir.join(".git")).unwrap();
        fs::write(
            mod_dir.join(DESCRIPTOR_FILE),
            "name = \"My Mod\"\nversion = \"1.0\"\ndependencies = { \"Base Mod\" \"UI Overhaul\" }\n",
        )
        .unwrap();
        fs::write(mod_dir.join("common/buildings/b.txt"), "b = { }").unwrap();
        fs::write(mod_dir.join("events/a.txt"), "namespace = a").unwrap();
        fs::write(mod_dir.join(".git/HEAD"), "ref").unwrap();

        (dir, mod_dir)
    }

    #[test]
    fn test_fs_descriptor() {
        let (_guard, mod_dir) = create_test_mod_dir();
        let mut provider = FsModContent::open(mod_dir).unwrap();

        assert_eq!(provider.mod_name(), "My Mod");
        assert_eq!(provider.dependencies().unwrap(), ["Base Mod", "UI Overhaul"]);
        assert!(!provider.is_from_game());
    }

    #[test]
    fn test_fs_list_files_skips_descriptor_and_hidden() {
        let (_guard, mod_dir) = create_test_mod_dir();
        let mut provider = FsModContent::open(mod_dir).unwrap();

        let files = provider.list_files().unwrap();
        let files: Vec<&str> = files.iter().map(|f| f.as_str()).collect();
        assert_eq!(files, ["common/buildings/b.txt", "events/a.txt"]);
    }

    #[test]
    fn test_fs_read_file() {
        let (_guard, mod_dir) = create_test_mod_dir();
        let mut provider = FsModContent::open(mod_dir).unwrap();

        let bytes = provider.read_file(Utf8Path::new("events/a.txt")).unwrap();
        assert_eq!(bytes, b"namespace = a");
    }

    #[test]
    fn test_fs_missing_descriptor_uses_folder_name() {
        let dir = tempdir().unwrap();
        let mod_dir = Utf8PathBuf::from_path_buf(dir.path().join("plain_mod")).unwrap();
        fs::create_dir_all(&mod_dir).unwrap();

        let mut provider = FsModContent::open(mod_dir).unwrap();
        assert_eq!(provider.mod_name(), "plain_mod");
        assert!(provider.dependencies().unwrap().is_empty());
    }

    #[test]
    fn test_fs_missing_dir() {
        let result = FsModContent::open(Utf8PathBuf::from("/definitely/not/here"));
        assert!(matches!(result, Err(Error::InvalidModDir(_))));
    }

    #[test]
    fn test_fs_game_content() {
        let (_guard, mod_dir) = create_test_mod_dir();
        let provider = FsModContent::game(mod_dir, "Stellaris").unwrap();
        assert!(provider.is_from_game());
        assert_eq!(provider.mod_name(), "Stellaris");
    }

    #[test]
    fn test_descriptor_malformed() {
        assert_eq!(Descriptor::parse("name = { "), Descriptor::default());
    }
}
