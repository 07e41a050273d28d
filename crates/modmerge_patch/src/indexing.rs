//! Turning enabled mods into one combined definition index.
//!
//! Mods are parsed in parallel on the rayon pool. Each mod whose content provider
//! reports an unchanged source fingerprint is served from the in-memory
//! [`DefinitionCache`] instead of being parsed again.

use crate::content::ModContentProvider;
use crate::error::Result;
use modmerge_definitions::{Definition, DefinitionParser, IndexedDefinitions, ModFile, StoreKind};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// A mod taking part in indexing.
///
/// Position in the slice handed to [`parse_mods`] is the mod's load order. Later
/// mods override earlier ones.
pub struct EnabledMod {
    /// Unique identifier for the mod (used in logging).
    pub id: String,
    /// Content provider for the mod's files and metadata.
    pub content: Box<dyn ModContentProvider>,
}

impl EnabledMod {
    /// Wrap a provider, using its source path as the id.
    pub fn new(content: Box<dyn ModContentProvider>) -> Self {
        Self {
            id: content.mod_path().to_string(),
            content,
        }
    }
}

impl std::fmt::Debug for EnabledMod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnabledMod")
            .field("id", &self.id)
            .field("name", &self.content.mod_name())
            .field("is_from_game", &self.content.is_from_game())
            .finish()
    }
}

/// Definitions produced for one mod.
#[derive(Debug, Clone)]
pub struct ModDefinitions {
    pub mod_name: String,
    pub mod_path: String,
    pub order: usize,
    pub is_from_game: bool,
    pub source_fingerprint: Option<u64>,
    pub definitions: Arc<Vec<Definition>>,
    /// `true` if the definitions were served from a cache.
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
struct CachedMod {
    fingerprint: u64,
    definitions: Arc<Vec<Definition>>,
}

/// Owned, in-memory cache of parsed mods keyed by mod path.
///
/// Entries are only valid for the source fingerprint they were stored with.
#[derive(Debug, Clone, Default)]
pub struct DefinitionCache {
    entries: HashMap<String, CachedMod>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached definitions for `mod_path`, if stored with `fingerprint`.
    pub fn get(&self, mod_path: &str, fingerprint: u64) -> Option<Arc<Vec<Definition>>> {
        self.entries
            .get(mod_path)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| entry.definitions.clone())
    }

    pub fn insert(&mut self, mod_path: impl Into<String>, fingerprint: u64, definitions: Arc<Vec<Definition>>) {
        self.entries.insert(
            mod_path.into(),
            CachedMod {
                fingerprint,
                definitions,
            },
        );
    }

    /// Drop every entry.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    /// Drop the entry of one mod. Returns `true` if one existed.
    pub fn invalidate_path(&mut self, mod_path: &str) -> bool {
        self.entries.remove(mod_path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ask every provider for its source fingerprint, in order.
pub fn source_fingerprints(mods: &mut [EnabledMod]) -> Result<Vec<Option<u64>>> {
    mods.iter_mut()
        .map(|m| m.content.source_fingerprint())
        .collect()
}

/// Parse every file of one mod.
pub fn parse_mod(
    content: &mut dyn ModContentProvider,
    order: usize,
    parser: &DefinitionParser<'_>,
) -> Result<Vec<Definition>> {
    let dependencies = content.dependencies()?;
    let files = content.list_files()?;
    let mut definitions = Vec::new();

    for file in &files {
        let bytes = content.read_file(file)?;
        let mut mod_file = ModFile::new(content.mod_name(), content.mod_path(), file.as_str(), order)
            .with_dependencies(dependencies.clone());
        if content.is_from_game() {
            mod_file = mod_file.from_game();
        }
        definitions.extend(parser.parse_file(&mod_file, &bytes));
    }

    tracing::debug!(
        "Parsed {} files into {} definitions for {}",
        files.len(),
        definitions.len(),
        content.mod_name()
    );
    Ok(definitions)
}

fn with_order(definitions: &[Definition], order: usize) -> Vec<Definition> {
    definitions
        .iter()
        .cloned()
        .map(|mut d| {
            d.order = order;
            d
        })
        .collect()
}

/// Parse all mods, reusing `cache` entries whose fingerprint still matches.
///
/// `fingerprints` holds one entry per mod, as returned by [`source_fingerprints`].
/// Cached definitions are renumbered to the mod's current load order.
pub fn parse_mods(
    mods: &mut [EnabledMod],
    fingerprints: &[Option<u64>],
    parser: &DefinitionParser<'_>,
    cache: &DefinitionCache,
) -> Result<Vec<ModDefinitions>> {
    mods.par_iter_mut()
        .enumerate()
        .map(|(order, enabled)| -> Result<ModDefinitions> {
            let fingerprint = fingerprints.get(order).copied().flatten();
            let content = enabled.content.as_mut();
            let cached = fingerprint.and_then(|fp| cache.get(content.mod_path(), fp));

            let (definitions, from_cache) = match cached {
                Some(cached) if cached.first().map(|d| d.order) == Some(order) => (cached, true),
                Some(cached) => (Arc::new(with_order(&cached, order)), true),
                None => (Arc::new(parse_mod(content, order, parser)?), false),
            };

            Ok(ModDefinitions {
                mod_name: content.mod_name().to_string(),
                mod_path: content.mod_path().to_string(),
                order,
                is_from_game: content.is_from_game(),
                source_fingerprint: fingerprint,
                definitions,
                from_cache,
            })
        })
        .collect()
}

/// Store freshly parsed mods in `cache`.
pub fn remember(cache: &mut DefinitionCache, parsed: &[ModDefinitions]) {
    for mod_defs in parsed.iter().filter(|m| !m.from_cache) {
        if let Some(fingerprint) = mod_defs.source_fingerprint {
            cache.insert(mod_defs.mod_path.clone(), fingerprint, mod_defs.definitions.clone());
        }
    }
}

/// Combine per-mod definitions into one index. Game content goes first, then mods
/// in load order.
pub fn combine(mods: &[ModDefinitions], store: &StoreKind) -> Result<IndexedDefinitions> {
    let mut ordered: Vec<&ModDefinitions> = mods.iter().collect();
    ordered.sort_by_key(|m| (!m.is_from_game, m.order));

    let mut index = IndexedDefinitions::with_store_kind(store)?;
    index.init_map(
        ordered
            .into_iter()
            .flat_map(|m| m.definitions.iter().cloned()),
    )?;
    tracing::info!("Combined {} mods into {} definitions", mods.len(), index.len());
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::FsModContent;
    use camino::Utf8PathBuf;
    use modmerge_definitions::{ParserOptions, ShallowTokenizer};
    use std::fs;
    use tempfile::tempdir;

    fn write_mod(root: &Utf8PathBuf, name: &str, buildings: &str) -> Utf8PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("common/buildings")).unwrap();
        fs::write(dir.join("descriptor.mod"), format!("name = \"{}\"\n", name)).unwrap();
        fs::write(dir.join("common/buildings/b.txt"), buildings).unwrap();
        dir
    }

    fn enabled(dirs: &[Utf8PathBuf]) -> Vec<EnabledMod> {
        dirs.iter()
            .map(|d| EnabledMod::new(Box::new(FsModContent::open(d.clone()).unwrap())))
            .collect()
    }

    #[test]
    fn test_parse_mods_assigns_load_order() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let a = write_mod(&root, "A", "building_x = { cost = 1 }\nbuilding_y = { }");
        let b = write_mod(&root, "B", "building_x = { cost = 2 }");

        let options = ParserOptions::default();
        let parser = DefinitionParser::new(&ShallowTokenizer, &options);
        let mut mods = enabled(&[a, b]);
        let fingerprints = source_fingerprints(&mut mods).unwrap();
        let parsed = parse_mods(&mut mods, &fingerprints, &parser, &DefinitionCache::new()).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].mod_name, "A");
        assert_eq!(parsed[0].definitions.len(), 2);
        assert!(parsed[1].definitions.iter().all(|d| d.order == 1 && d.mod_name == "B"));

        let index = combine(&parsed, &StoreKind::Memory).unwrap();
        assert_eq!(index.get_by_type_and_id("common/buildings-building_x").len(), 2);
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let a = write_mod(&root, "A", "building_x = { cost = 1 }");

        let options = ParserOptions::default();
        let parser = DefinitionParser::new(&ShallowTokenizer, &options);
        let mut cache = DefinitionCache::new();

        let mut mods = enabled(&[a.clone()]);
        let fingerprints = source_fingerprints(&mut mods).unwrap();
        let first = parse_mods(&mut mods, &fingerprints, &parser, &cache).unwrap();
        assert!(!first[0].from_cache);
        remember(&mut cache, &first);
        assert_eq!(cache.len(), 1);

        let second = parse_mods(&mut mods, &fingerprints, &parser, &cache).unwrap();
        assert!(second[0].from_cache);
        assert_eq!(second[0].definitions, first[0].definitions);

        // Changing the file changes its size and therefore the fingerprint.
        fs::write(a.join("common/buildings/b.txt"), "building_x = { cost = 100 }").unwrap();
        let fingerprints = source_fingerprints(&mut mods).unwrap();
        let third = parse_mods(&mut mods, &fingerprints, &parser, &cache).unwrap();
        assert!(!third[0].from_cache);

        assert!(cache.invalidate_path(a.as_str()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cached_definitions_follow_new_order() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let a = write_mod(&root, "A", "building_x = { cost = 1 }");
        let b = write_mod(&root, "B", "building_x = { cost = 2 }");

        let options = ParserOptions::default();
        let parser = DefinitionParser::new(&ShallowTokenizer, &options);
        let mut cache = DefinitionCache::new();

        let mut mods = enabled(&[a.clone(), b.clone()]);
        let fingerprints = source_fingerprints(&mut mods).unwrap();
        let parsed = parse_mods(&mut mods, &fingerprints, &parser, &cache).unwrap();
        remember(&mut cache, &parsed);

        let mut reversed = enabled(&[b, a]);
        let fingerprints = source_fingerprints(&mut reversed).unwrap();
        let parsed = parse_mods(&mut reversed, &fingerprints, &parser, &cache).unwrap();
        assert!(parsed.iter().all(|m| m.from_cache));
        assert_eq!(parsed[0].mod_name, "B");
        assert!(parsed[0].definitions.iter().all(|d| d.order == 0));
        assert!(parsed[1].definitions.iter().all(|d| d.order == 1));
    }

    #[test]
    fn test_combine_puts_game_first() {
        let game = ModDefinitions {
            mod_name: "Stellaris".to_string(),
            mod_path: "/game".to_string(),
            order: 5,
            is_from_game: true,
            source_fingerprint: None,
            definitions: Arc::new(vec![Definition::builder("common/buildings", "x", "common/buildings/00.txt")
                .mod_name("Stellaris")
                .from_game(true)
                .code("x = { }")
                .build()]),
            from_cache: false,
        };
        let index = combine(&[game], &StoreKind::Memory).unwrap();
        assert!(index.has_game_definitions());
        assert_eq!(index.len(), 1);
    }
}
