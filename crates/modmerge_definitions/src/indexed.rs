//! Multi-key index over a definition set.
//!
//! [`IndexedDefinitions`] is built in one linear pass by
//! [`init_map`](IndexedDefinitions::init_map) and is read-only afterwards. Each key
//! map stores slot numbers into the backing [`DefinitionStore`], so lookups never
//! scan the whole set.
//!
//! | Lookup                       | Key                                  |
//! |------------------------------|--------------------------------------|
//! | `get_by_file`                | logical file, case-insensitive       |
//! | `get_by_disk_file`           | on-disk file, case-insensitive       |
//! | `get_by_type`                | type, case-insensitive               |
//! | `get_by_type_and_id`         | `"{type}-{id}"`                      |
//! | `get_by_parent_directory`    | parent directory, case-insensitive   |
//! | `get_by_value_type`          | [`ValueType`]                        |
//!
//! Rebuilding is done by creating a new instance and swapping it into a
//! [`SharedIndex`]; a live index is never mutated while readers hold it.

use crate::definition::{normalize_path, Definition};
use crate::error::Result;
use crate::hierarchical::{HierarchicalDefinitions, HierarchyBuilder};
use crate::store::{DefinitionStore, MemoryStore, StoreKind};
use crate::value_type::ValueType;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

type SlotMap<K> = HashMap<K, Vec<usize>>;

#[derive(Default)]
struct KeyMaps {
    by_file: SlotMap<String>,
    by_disk_file: SlotMap<String>,
    by_type: SlotMap<String>,
    by_type_and_id: SlotMap<String>,
    by_parent_directory: SlotMap<String>,
    by_value_type: SlotMap<ValueType>,
    /// Every file name a definition touches: logical, on-disk and overwritten.
    all_file_keys: BTreeSet<String>,
    has_game_definitions: bool,
}

impl KeyMaps {
    fn register(&mut self, slot: usize, definition: &Definition) {
        self.by_file
            .entry(definition.file_ci().to_string())
            .or_default()
            .push(slot);
        self.by_disk_file
            .entry(definition.disk_file_ci().to_string())
            .or_default()
            .push(slot);
        self.by_type
            .entry(definition.type_name().to_lowercase())
            .or_default()
            .push(slot);
        self.by_type_and_id
            .entry(definition.type_and_id().to_string())
            .or_default()
            .push(slot);
        self.by_parent_directory
            .entry(definition.parent_directory_ci().to_string())
            .or_default()
            .push(slot);
        self.by_value_type
            .entry(definition.value_type())
            .or_default()
            .push(slot);

        self.all_file_keys.insert(definition.file_ci().to_string());
        self.all_file_keys
            .insert(definition.disk_file_ci().to_string());
        for name in definition.overwritten_file_names() {
            self.all_file_keys.insert(name.to_lowercase());
        }

        if definition.is_from_game {
            self.has_game_definitions = true;
        }
    }
}

/// Multi-key, read-only index over a set of definitions.
pub struct IndexedDefinitions {
    store: Box<dyn DefinitionStore>,
    maps: KeyMaps,
    /// Lowercase tag -> slots. Built on demand by [`init_search`](Self::init_search).
    search: Option<BTreeMap<String, Vec<usize>>>,
}

impl Default for IndexedDefinitions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IndexedDefinitions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedDefinitions")
            .field("len", &self.store.len())
            .field("files", &self.maps.by_file.len())
            .field("type_and_ids", &self.maps.by_type_and_id.len())
            .finish()
    }
}

impl IndexedDefinitions {
    /// Create an empty, memory-backed index.
    pub fn new() -> Self {
        Self::with_store(Box::new(MemoryStore::default()))
    }

    /// Create an empty index on the given store.
    pub fn with_store(store: Box<dyn DefinitionStore>) -> Self {
        Self {
            store,
            maps: KeyMaps::default(),
            search: None,
        }
    }

    /// Create an empty index on the store selected by `kind`.
    pub fn with_store_kind(kind: &StoreKind) -> Result<Self> {
        Ok(Self::with_store(kind.create()?))
    }

    /// Build a memory-backed index in one call.
    pub fn in_memory(definitions: impl IntoIterator<Item = Definition>) -> Self {
        let mut store = MemoryStore::default();
        let mut maps = KeyMaps::default();
        for definition in definitions {
            maps.register(store.len(), &definition);
            store.push(definition);
        }
        Self {
            store: Box::new(store),
            maps,
            search: None,
        }
    }

    /// Rebuild every key map from `definitions`, discarding previous content.
    ///
    /// If the store fails part-way the index is left empty and the error returned.
    pub fn init_map(&mut self, definitions: impl IntoIterator<Item = Definition>) -> Result<()> {
        self.store.clear()?;
        self.maps = KeyMaps::default();
        self.search = None;

        for definition in definitions {
            self.maps.register(self.store.len(), &definition);
            if let Err(e) = self.store.insert(definition) {
                self.maps = KeyMaps::default();
                self.store.clear()?;
                return Err(e);
            }
        }

        tracing::debug!(
            "Indexed {} definitions: {} files, {} types, {} type+id keys",
            self.store.len(),
            self.maps.by_file.len(),
            self.maps.by_type.len(),
            self.maps.by_type_and_id.len()
        );
        Ok(())
    }

    fn resolve(&self, slots: Option<&Vec<usize>>) -> Vec<Arc<Definition>> {
        slots
            .map(|slots| slots.iter().filter_map(|&s| self.store.get(s)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// All definitions in insertion order.
    pub fn get_all(&self) -> Vec<Arc<Definition>> {
        (0..self.store.len())
            .filter_map(|slot| self.store.get(slot))
            .collect()
    }

    pub fn get_by_file(&self, file: &str) -> Vec<Arc<Definition>> {
        self.resolve(self.maps.by_file.get(&file.replace('\\', "/").to_lowercase()))
    }

    pub fn get_by_disk_file(&self, file: &str) -> Vec<Arc<Definition>> {
        self.resolve(
            self.maps
                .by_disk_file
                .get(&file.replace('\\', "/").to_lowercase()),
        )
    }

    /// Look up by type. Separators and case in `type_name` do not matter.
    pub fn get_by_type(&self, type_name: &str) -> Vec<Arc<Definition>> {
        let key = normalize_path(type_name.trim())
            .trim_end_matches('/')
            .to_lowercase();
        self.resolve(self.maps.by_type.get(&key))
    }

    /// Look up by the composite `"{type}-{id}"` key.
    pub fn get_by_type_and_id(&self, type_and_id: &str) -> Vec<Arc<Definition>> {
        self.resolve(self.maps.by_type_and_id.get(type_and_id))
    }

    /// Look up by type and id separately.
    pub fn get_by_type_id(&self, type_name: &str, id: &str) -> Vec<Arc<Definition>> {
        self.get_by_type_and_id(&format!("{}-{}", type_name, id))
    }

    pub fn get_by_parent_directory(&self, directory: &str) -> Vec<Arc<Definition>> {
        self.resolve(
            self.maps
                .by_parent_directory
                .get(&directory.replace('\\', "/").to_lowercase()),
        )
    }

    pub fn get_by_value_type(&self, value_type: ValueType) -> Vec<Arc<Definition>> {
        self.resolve(self.maps.by_value_type.get(&value_type))
    }

    /// `true` if any definition touches `file` as its logical file, its disk file or
    /// one of the files it overwrites.
    pub fn exists_by_file(&self, file: &str) -> bool {
        self.maps
            .all_file_keys
            .contains(&file.replace('\\', "/").to_lowercase())
    }

    fn sorted_keys<K: Clone + Ord>(map: &SlotMap<K>) -> Vec<K> {
        let mut keys: Vec<K> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Sorted case-insensitive logical file keys.
    pub fn get_all_file_keys(&self) -> Vec<String> {
        Self::sorted_keys(&self.maps.by_file)
    }

    pub fn get_all_type_keys(&self) -> Vec<String> {
        Self::sorted_keys(&self.maps.by_type)
    }

    pub fn get_all_type_and_id_keys(&self) -> Vec<String> {
        Self::sorted_keys(&self.maps.by_type_and_id)
    }

    /// Sorted case-insensitive parent directory keys.
    pub fn get_all_directory_keys(&self) -> Vec<String> {
        Self::sorted_keys(&self.maps.by_parent_directory)
    }

    pub fn has_game_definitions(&self) -> bool {
        self.maps.has_game_definitions
    }

    /// Build the tag search table. Game definitions are not searchable.
    pub fn init_search(&mut self) {
        let mut search: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for slot in 0..self.store.len() {
            let Some(definition) = self.store.get(slot) else {
                continue;
            };
            if definition.is_from_game {
                continue;
            }
            for tag in &definition.tags {
                let tag = tag.trim().to_lowercase();
                if !tag.is_empty() {
                    search.entry(tag).or_default().push(slot);
                }
            }
        }
        self.search = Some(search);
    }

    /// Definitions with a tag starting with `term` (case-insensitive).
    ///
    /// Returns nothing until [`init_search`](Self::init_search) has run.
    pub fn search_definitions(&self, term: &str) -> Vec<Arc<Definition>> {
        let Some(search) = &self.search else {
            return Vec::new();
        };
        let term = term.trim().to_lowercase();

        let mut slots: BTreeSet<usize> = BTreeSet::new();
        for (_, tag_slots) in search
            .range(term.clone()..)
            .take_while(|(tag, _)| tag.starts_with(&term))
        {
            slots.extend(tag_slots.iter().copied());
        }
        slots
            .into_iter()
            .filter_map(|slot| self.store.get(slot))
            .collect()
    }

    /// Display tree of every definition in the index.
    pub fn hierarchical_definitions(&self) -> Vec<HierarchicalDefinitions> {
        HierarchyBuilder::new(self).build()
    }
}

/// Copy-and-swap holder for the current index.
///
/// Readers take an `Arc` snapshot and keep using it while a rebuild publishes a
/// new instance with [`replace`](Self::replace).
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Arc<IndexedDefinitions>>,
}

impl SharedIndex {
    pub fn new(index: IndexedDefinitions) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// Snapshot of the current index.
    pub fn load(&self) -> Arc<IndexedDefinitions> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publish a rebuilt index and return the previous one.
    pub fn replace(&self, index: IndexedDefinitions) -> Arc<IndexedDefinitions> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, Arc::new(index))
    }
}
