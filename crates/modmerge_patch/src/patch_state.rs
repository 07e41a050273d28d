//! Persisted result of conflict detection and merging.
//!
//! A [`PatchState`] is written to
//! `{storage_root}/patches/{game}/{collection}/state.json` after every run and
//! reloaded at the start of the next one, where it feeds
//! [`assemble_patch_state`](crate::conflicts::assemble_patch_state). Runs never
//! edit a loaded state in place: each run produces a fresh value and replaces the
//! file atomically.

use crate::error::Result;
use crate::utils::write_atomic;
use camino::{Utf8Path, Utf8PathBuf};
use modmerge_definitions::{Address, Definition, IndexedDefinitions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Current `state.json` schema version.
pub const PATCH_STATE_VERSION: u32 = 1;

/// Directory under the storage root holding per-game patch states.
pub const PATCHES_DIR: &str = "patches";

pub const STATE_FILE: &str = "state.json";

/// How conflicts are analysed and whether patch files are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchStateMode {
    /// Patching disabled for the collection.
    None,
    /// Declared dependencies override their dependents silently.
    #[default]
    Default,
    /// Every difference is a conflict, dependencies included.
    Advanced,
    /// Analyse only, never write patch files.
    ReadOnly,
    DefaultWithoutLocalization,
    AdvancedWithoutLocalization,
    ReadOnlyWithoutLocalization,
}

impl PatchStateMode {
    pub const ALL: [PatchStateMode; 7] = [
        PatchStateMode::None,
        PatchStateMode::Default,
        PatchStateMode::Advanced,
        PatchStateMode::ReadOnly,
        PatchStateMode::DefaultWithoutLocalization,
        PatchStateMode::AdvancedWithoutLocalization,
        PatchStateMode::ReadOnlyWithoutLocalization,
    ];

    pub fn is_advanced(self) -> bool {
        matches!(
            self,
            PatchStateMode::Advanced | PatchStateMode::AdvancedWithoutLocalization
        )
    }

    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            PatchStateMode::ReadOnly | PatchStateMode::ReadOnlyWithoutLocalization
        )
    }

    /// `false` when localisation files are left out of conflict analysis.
    pub fn includes_localization(self) -> bool {
        match self {
            PatchStateMode::None
            | PatchStateMode::Default
            | PatchStateMode::Advanced
            | PatchStateMode::ReadOnly => true,
            PatchStateMode::DefaultWithoutLocalization
            | PatchStateMode::AdvancedWithoutLocalization
            | PatchStateMode::ReadOnlyWithoutLocalization => false,
        }
    }

    /// The same mode with localisation excluded.
    pub fn without_localization(self) -> Self {
        match self {
            PatchStateMode::Default => PatchStateMode::DefaultWithoutLocalization,
            PatchStateMode::Advanced => PatchStateMode::AdvancedWithoutLocalization,
            PatchStateMode::ReadOnly => PatchStateMode::ReadOnlyWithoutLocalization,
            other => other,
        }
    }

    /// `true` when merged patch files may be written.
    pub fn writes_patches(self) -> bool {
        self != PatchStateMode::None && !self.is_read_only()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatchStateMode::None => "none",
            PatchStateMode::Default => "default",
            PatchStateMode::Advanced => "advanced",
            PatchStateMode::ReadOnly => "read-only",
            PatchStateMode::DefaultWithoutLocalization => "default-without-localization",
            PatchStateMode::AdvancedWithoutLocalization => "advanced-without-localization",
            PatchStateMode::ReadOnlyWithoutLocalization => "read-only-without-localization",
        }
    }
}

impl fmt::Display for PatchStateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchStateMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PatchStateMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown patch mode '{}'", s))
    }
}

/// Snapshot of a collection's conflicts and their resolution.
///
/// Every bucket except `conflict_history` holds definitions grouped by address;
/// an address appears in at most one of `conflicts`, `resolved_conflicts` and
/// `ignored_conflicts`. `conflict_history` only ever grows.
///
/// # JSON format
///
/// ```json
/// {
///   "version": 1,
///   "mode": "default",
///   "loadOrder": ["Mod A", "Mod B"],
///   "hasGameDefinitions": false,
///   "ignoreConflictPaths": "",
///   "conflicts": [],
///   "resolvedConflicts": [],
///   "ignoredConflicts": [],
///   "orphanConflicts": [],
///   "overwrittenConflicts": [],
///   "customConflicts": [],
///   "conflictHistory": []
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchState {
    pub version: u32,
    pub mode: PatchStateMode,
    /// Enabled mod names, in load order, at the time of the run.
    pub load_order: Vec<String>,
    pub has_game_definitions: bool,
    /// Ignore rule text the run was evaluated with.
    pub ignore_conflict_paths: String,
    pub conflicts: Vec<Definition>,
    pub resolved_conflicts: Vec<Definition>,
    pub ignored_conflicts: Vec<Definition>,
    /// Previously resolved or ignored conflicts whose mods are no longer enabled.
    pub orphan_conflicts: Vec<Definition>,
    /// Definitions made unreachable because a later mod replaced their whole file.
    pub overwritten_conflicts: Vec<Definition>,
    /// User-authored definitions.
    pub custom_conflicts: Vec<Definition>,
    /// Every merged definition ever produced, oldest first.
    pub conflict_history: Vec<Definition>,
}

impl Default for PatchState {
    fn default() -> Self {
        Self::new(PatchStateMode::default())
    }
}

impl PatchState {
    pub fn new(mode: PatchStateMode) -> Self {
        Self {
            version: PATCH_STATE_VERSION,
            mode,
            load_order: Vec::new(),
            has_game_definitions: false,
            ignore_conflict_paths: String::new(),
            conflicts: Vec::new(),
            resolved_conflicts: Vec::new(),
            ignored_conflicts: Vec::new(),
            orphan_conflicts: Vec::new(),
            overwritten_conflicts: Vec::new(),
            custom_conflicts: Vec::new(),
            conflict_history: Vec::new(),
        }
    }

    /// Location of `state.json` for a game and collection.
    pub fn state_path(storage_root: &Utf8Path, game: &str, collection: &str) -> Utf8PathBuf {
        storage_root
            .join(PATCHES_DIR)
            .join(game)
            .join(collection)
            .join(STATE_FILE)
    }

    /// Load a patch state from a file.
    ///
    /// Returns `Ok(None)` if the file doesn't exist and `Err` if it exists but
    /// cannot be parsed.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path.as_std_path())?;
        let state: Self = serde_json::from_str(&contents)?;
        if state.version != PATCH_STATE_VERSION {
            tracing::warn!(
                "Patch state {} has version {}, expected {}",
                path,
                state.version,
                PATCH_STATE_VERSION
            );
        }
        Ok(Some(state))
    }

    /// Save the state through a temporary file, creating parent directories.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        write_atomic(path, contents.as_bytes())?;
        tracing::debug!("Saved patch state to {}", path);
        Ok(())
    }

    /// History indexed for lookup by `type_and_id`, file and directory.
    pub fn indexed_conflict_history(&self) -> IndexedDefinitions {
        IndexedDefinitions::in_memory(self.conflict_history.iter().cloned())
    }

    pub fn conflict_addresses(&self) -> BTreeSet<Address> {
        addresses(&self.conflicts)
    }

    pub fn resolved_addresses(&self) -> BTreeSet<Address> {
        addresses(&self.resolved_conflicts)
    }

    pub fn ignored_addresses(&self) -> BTreeSet<Address> {
        addresses(&self.ignored_conflicts)
    }

    pub fn orphan_addresses(&self) -> BTreeSet<Address> {
        addresses(&self.orphan_conflicts)
    }

    /// Definitions of the open conflict at `address`.
    pub fn conflict_at(&self, address: &Address) -> Vec<Definition> {
        self.conflicts
            .iter()
            .filter(|d| &d.address() == address)
            .cloned()
            .collect()
    }

    /// Sort every bucket except history into a stable order.
    pub fn sort_buckets(&mut self) {
        for bucket in [
            &mut self.conflicts,
            &mut self.resolved_conflicts,
            &mut self.ignored_conflicts,
            &mut self.orphan_conflicts,
            &mut self.overwritten_conflicts,
            &mut self.custom_conflicts,
        ] {
            sort_definitions(bucket);
        }
    }
}

fn addresses(definitions: &[Definition]) -> BTreeSet<Address> {
    definitions.iter().map(Definition::address).collect()
}

/// Order by address, then load order, then mod and content.
pub(crate) fn sort_definitions(definitions: &mut [Definition]) {
    definitions.sort_by(|a, b| {
        a.address()
            .cmp(&b.address())
            .then_with(|| a.order.cmp(&b.order))
            .then_with(|| a.mod_name.cmp(&b.mod_name))
            .then_with(|| a.file().cmp(b.file()))
            .then_with(|| a.definition_sha().cmp(b.definition_sha()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn def(mod_name: &str, order: usize, id: &str) -> Definition {
        Definition::builder("common/buildings", id, "common/buildings/a.txt")
            .mod_name(mod_name)
            .order(order)
            .code(format!("{} = {{ cost = {} }}", id, order))
            .build()
    }

    #[test]
    fn test_mode_helpers() {
        assert!(PatchStateMode::Advanced.is_advanced());
        assert!(PatchStateMode::AdvancedWithoutLocalization.is_advanced());
        assert!(!PatchStateMode::Default.is_advanced());
        assert!(PatchStateMode::ReadOnlyWithoutLocalization.is_read_only());
        assert!(!PatchStateMode::DefaultWithoutLocalization.includes_localization());
        assert!(PatchStateMode::ReadOnly.includes_localization());
        assert_eq!(
            PatchStateMode::Default.without_localization(),
            PatchStateMode::DefaultWithoutLocalization
        );
        assert_eq!(PatchStateMode::None.without_localization(), PatchStateMode::None);
        assert!(!PatchStateMode::ReadOnly.writes_patches());
        assert!(!PatchStateMode::None.writes_patches());
        assert!(PatchStateMode::AdvancedWithoutLocalization.writes_patches());
    }

    #[test]
    fn test_mode_from_str() {
        for mode in PatchStateMode::ALL {
            assert_eq!(mode.as_str().parse::<PatchStateMode>().unwrap(), mode);
        }
        assert_eq!("READ-ONLY".parse::<PatchStateMode>().unwrap(), PatchStateMode::ReadOnly);
        assert!("sometimes".parse::<PatchStateMode>().is_err());
    }

    #[test]
    fn test_state_path() {
        let path = PatchState::state_path(Utf8Path::new("/storage"), "Stellaris", "My Collection");
        assert_eq!(path, "/storage/patches/Stellaris/My Collection/state.json");
    }

    #[test]
    fn test_save_and_load() {
        let temp = NamedTempFile::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap();

        let mut state = PatchState::new(PatchStateMode::Advanced);
        state.load_order = vec!["Mod A".to_string(), "Mod B".to_string()];
        state.conflicts = vec![def("Mod A", 0, "x"), def("Mod B", 1, "x")];
        state.conflict_history = vec![def("Patch", 2, "x")];

        state.save(path).unwrap();
        let loaded = PatchState::load(path).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_nonexistent() {
        let temp = NamedTempFile::new().unwrap();
        let std_path = temp.path().with_extension("nonexistent");
        let path = Utf8Path::from_path(&std_path).unwrap();

        assert!(PatchState::load(path).unwrap().is_none());
    }

    #[test]
    fn test_load_invalid_json() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"{ invalid json }").unwrap();
        temp.flush().unwrap();

        let path = Utf8Path::from_path(temp.path()).unwrap();
        assert!(PatchState::load(path).is_err());
    }

    #[test]
    fn test_serialization_format() {
        let json = serde_json::to_string(&PatchState::new(PatchStateMode::ReadOnly)).unwrap();
        assert!(json.contains("\"mode\":\"readOnly\""));
        assert!(json.contains("\"conflictHistory\""));
        assert!(json.contains("\"ignoreConflictPaths\""));
    }

    #[test]
    fn test_indexed_conflict_history() {
        let mut state = PatchState::default();
        state.conflict_history = vec![def("Patch", 0, "x"), def("Patch", 1, "x"), def("Patch", 2, "y")];

        let history = state.indexed_conflict_history();
        assert_eq!(history.get_by_type_and_id("common/buildings-x").len(), 2);
        assert_eq!(history.get_by_type_and_id("common/buildings-y").len(), 1);
    }

    #[test]
    fn test_sort_buckets() {
        let mut state = PatchState::default();
        state.conflicts = vec![def("Mod B", 1, "y"), def("Mod B", 1, "x"), def("Mod A", 0, "x")];
        state.sort_buckets();

        let order: Vec<(&str, &str)> = state
            .conflicts
            .iter()
            .map(|d| (d.id(), d.mod_name.as_str()))
            .collect();
        assert_eq!(order, [("x", "Mod A"), ("x", "Mod B"), ("y", "Mod B")]);
        assert_eq!(state.conflict_addresses().len(), 2);
    }
}
