//! Main patch builder implementation.
//!
//! The [`PatchBuilder`] orchestrates the full pipeline for one game and mod
//! collection: indexing, conflict detection, patch state assembly and merging.
//!
//! # Build Algorithm
//!
//! 1. Ask every [`EnabledMod`] for its source fingerprint.
//! 2. If a [`GameIndexer`] is configured, drop its cache when the cache schema or
//!    game versions changed, then warm the in-memory [`DefinitionCache`] from disk
//!    for every mod whose fingerprint still matches.
//! 3. Parse the remaining mods in parallel and store them in both caches.
//! 4. Combine everything into one [`IndexedDefinitions`], game content first.
//! 5. Run the [`ConflictDetector`] and assemble the next [`PatchState`] from the
//!    one saved by the previous run.
//! 6. In a mode that writes patches, delete the merged file of every address that
//!    was resolved by the previous run and no longer is.
//! 7. When building (not just analysing) in a mode that writes patches, merge every
//!    open conflict that can be merged and write the files under
//!    `{output_root}/{collection}/`.
//! 8. Persist the new state and emit a completion progress event.

use crate::cache::{GameIndexer, CACHE_VERSION};
use crate::conflicts::{assemble_patch_state, ConflictDetection, ConflictDetector};
use crate::error::{Error, Result};
use crate::ignore_rules::IgnoreRules;
use crate::indexing::{combine, parse_mods, remember, source_fingerprints, DefinitionCache, EnabledMod};
use crate::merger::{clean_file_name, merged_definition, primary_definition, write_merged_file, MergerRegistry};
use crate::patch_state::{PatchState, PatchStateMode};
use camino::Utf8PathBuf;
use modmerge_definitions::{
    Address, Definition, DefinitionParser, IndexedDefinitions, ParserOptions, ScriptTokenizer, ShallowTokenizer,
    StoreKind,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Prefix of the generated patch mod's name.
pub const PATCH_MOD_PREFIX: &str = "modmerge_";

/// Progress information emitted while building.
///
/// `percent` never decreases over one run.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchProgress {
    /// Current stage of the build process.
    pub stage: PatchStage,
    /// Mod being indexed or address being merged, when applicable.
    pub current_file: Option<String>,
    pub percent: f64,
}

/// Stages of the build pipeline.
///
/// Emitted in order: `Indexing` -> `Combining` -> `DetectingConflicts` -> `Merging` -> `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchStage {
    /// Reading and parsing mod content.
    Indexing,
    /// Building the combined index.
    Combining,
    DetectingConflicts,
    /// Writing merged files (skipped when nothing is merged).
    Merging,
    Complete,
}

/// Summary returned after a run completes.
#[derive(Debug)]
pub struct PatchBuildResult {
    /// Directory merged files are written to.
    pub patch_root: Utf8PathBuf,
    /// Where the new state was saved.
    pub state_path: Utf8PathBuf,
    pub state: PatchState,
    pub detection: ConflictDetection,
    /// Merged files written during this run.
    pub files_written: Vec<Utf8PathBuf>,
    /// Merged files deleted because their address is no longer resolved.
    pub files_removed: Vec<Utf8PathBuf>,
    /// Mods parsed or loaded, including the game.
    pub mods_indexed: usize,
    /// Mods served from a cache instead of being parsed.
    pub mods_from_cache: usize,
    /// Definitions in the combined index.
    pub definition_count: usize,
    /// Wall-clock time for the entire run.
    pub build_time: Duration,
}

type ProgressCallback = Arc<dyn Fn(PatchProgress) + Send + Sync>;

/// Forwards progress to the callback, dropping values that would go backwards.
#[derive(Clone, Default)]
struct ProgressSink {
    callback: Option<ProgressCallback>,
    last: Arc<Mutex<f64>>,
}

impl ProgressSink {
    fn emit(&self, stage: PatchStage, current_file: Option<String>, percent: f64) {
        let Some(callback) = &self.callback else {
            return;
        };
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if percent < *last {
            return;
        }
        *last = percent;
        drop(last);

        callback(PatchProgress {
            stage,
            current_file,
            percent,
        });
    }

    fn reset(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = 0.0;
        }
    }
}

struct IndexRun {
    index: IndexedDefinitions,
    /// Non-game mod names in load order.
    mod_order: Vec<String>,
    mods_indexed: usize,
    mods_from_cache: usize,
}

/// Orchestrates indexing, conflict detection and merging.
///
/// Create a builder with [`new`](Self::new), configure it with
/// [`set_enabled_mods`](Self::set_enabled_mods) and the `with_*` methods, then
/// call [`analyze`](Self::analyze) or [`build`](Self::build).
///
/// The builder keeps its in-memory [`DefinitionCache`] between runs, so the same
/// instance can be reconfigured and run again cheaply.
pub struct PatchBuilder {
    game: String,
    collection: String,
    storage_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
    game_versions: Vec<String>,
    enabled_mods: Vec<EnabledMod>,
    mode: PatchStateMode,
    ignore_rules: IgnoreRules,
    parser_options: ParserOptions,
    store_kind: StoreKind,
    tokenizer: Arc<dyn ScriptTokenizer>,
    mergers: MergerRegistry,
    indexer: Option<GameIndexer>,
    definition_cache: DefinitionCache,
    progress: ProgressSink,
}

impl PatchBuilder {
    /// Create a new patch builder.
    ///
    /// # Arguments
    ///
    /// * `game` - Game name, used to pick a merger and to separate caches and state.
    /// * `collection` - Name of the mod collection being patched.
    /// * `storage_root` - Directory holding the definition cache and patch states.
    /// * `output_root` - Directory merged files are written under.
    pub fn new(
        game: impl Into<String>,
        collection: impl Into<String>,
        storage_root: Utf8PathBuf,
        output_root: Utf8PathBuf,
    ) -> Self {
        Self {
            game: game.into(),
            collection: collection.into(),
            storage_root,
            output_root,
            game_versions: Vec::new(),
            enabled_mods: Vec::new(),
            mode: PatchStateMode::default(),
            ignore_rules: IgnoreRules::default(),
            parser_options: ParserOptions::default(),
            store_kind: StoreKind::default(),
            tokenizer: Arc::new(ShallowTokenizer),
            mergers: MergerRegistry::default(),
            indexer: None,
            definition_cache: DefinitionCache::new(),
            progress: ProgressSink::default(),
        }
    }

    /// Register a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(PatchProgress) + Send + Sync + 'static,
    {
        self.progress.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_mode(mut self, mode: PatchStateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_ignore_rules(mut self, rules: IgnoreRules) -> Self {
        self.ignore_rules = rules;
        self
    }

    pub fn with_parser_options(mut self, options: ParserOptions) -> Self {
        self.parser_options = options;
        self
    }

    pub fn with_store_kind(mut self, store_kind: StoreKind) -> Self {
        self.store_kind = store_kind;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn ScriptTokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_mergers(mut self, mergers: MergerRegistry) -> Self {
        self.mergers = mergers;
        self
    }

    /// Persist parsed definitions with `indexer` under the storage root.
    pub fn with_game_indexer(mut self, indexer: GameIndexer) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Game versions the persistent cache is tied to.
    pub fn with_game_versions(mut self, versions: Vec<String>) -> Self {
        self.game_versions = versions;
        self
    }

    /// Set the ordered list of mods. Later mods win.
    pub fn set_enabled_mods(&mut self, mods: Vec<EnabledMod>) {
        self.enabled_mods = mods;
    }

    pub fn mode(&self) -> PatchStateMode {
        self.mode
    }

    /// Name given to the patch mod for this collection.
    pub fn patch_name(&self) -> String {
        format!("{}{}", PATCH_MOD_PREFIX, clean_file_name(&self.collection))
    }

    /// Directory merged files are written to.
    pub fn patch_root(&self) -> Utf8PathBuf {
        self.output_root.join(clean_file_name(&self.collection))
    }

    pub fn state_path(&self) -> Utf8PathBuf {
        PatchState::state_path(&self.storage_root, &self.game, &self.collection)
    }

    /// Drop every cached definition of this game, in memory and on disk.
    pub async fn invalidate_cache(&mut self) -> bool {
        self.definition_cache.invalidate();
        match &self.indexer {
            Some(indexer) => indexer.clear_definition(&self.storage_root, &self.game).await,
            None => true,
        }
    }

    /// Index the enabled mods and return the combined index.
    pub async fn index(&mut self) -> Result<IndexedDefinitions> {
        self.progress.reset();
        let run = self.index_mods().await?;
        self.progress.emit(PatchStage::Complete, None, 100.0);
        Ok(run.index)
    }

    /// Detect conflicts and persist the new patch state without merging.
    pub async fn analyze(&mut self) -> Result<PatchBuildResult> {
        self.run(false).await
    }

    /// Detect conflicts, merge every mergeable open conflict when the mode writes
    /// patches, and persist the new patch state.
    pub async fn build(&mut self) -> Result<PatchBuildResult> {
        self.run(true).await
    }

    async fn run(&mut self, merge: bool) -> Result<PatchBuildResult> {
        let start_time = std::time::Instant::now();
        self.progress.reset();

        tracing::info!("Building patch for {} / {}", self.game, self.collection);
        tracing::info!("Mode: {}", self.mode);
        tracing::info!("Enabled mods: {}", self.enabled_mods.len());

        let run = self.index_mods().await?;

        self.progress.emit(PatchStage::DetectingConflicts, None, 50.0);
        let sink = self.progress.clone();
        let detection = ConflictDetector::new(self.mode)
            .with_progress(move |p| {
                sink.emit(PatchStage::DetectingConflicts, None, 50.0 + p * 0.4);
            })
            .find_conflicts(&run.index, &run.mod_order);

        let state_path = self.state_path();
        let prior = PatchState::load(&state_path)?;
        let mut state = assemble_patch_state(
            prior.as_ref(),
            &detection,
            &run.mod_order,
            &self.ignore_rules,
        );

        let mut files_removed = Vec::new();
        if let (Some(prior), true) = (&prior, self.mode.writes_patches()) {
            files_removed = self.remove_stale_merges(prior, &state)?;
        }

        let mut files_written = Vec::new();
        if merge && self.mode.writes_patches() {
            files_written = self.merge_open_conflicts(&mut state)?;
        } else if merge {
            tracing::info!("Mode {} does not write patches, skipping merge", self.mode);
        }

        state.save(&state_path)?;
        self.progress.emit(PatchStage::Complete, None, 100.0);

        let result = PatchBuildResult {
            patch_root: self.patch_root(),
            state_path,
            state,
            detection,
            files_written,
            files_removed,
            mods_indexed: run.mods_indexed,
            mods_from_cache: run.mods_from_cache,
            definition_count: run.index.len(),
            build_time: start_time.elapsed(),
        };
        tracing::info!(
            "Patch run complete in {:?}: {} files written, {} open conflicts",
            result.build_time,
            result.files_written.len(),
            result.state.conflict_addresses().len()
        );
        Ok(result)
    }

    async fn index_mods(&mut self) -> Result<IndexRun> {
        self.progress.emit(PatchStage::Indexing, None, 0.0);
        let fingerprints = source_fingerprints(&mut self.enabled_mods)?;

        if let Some(indexer) = self.indexer.clone() {
            self.refresh_persistent_cache(&indexer, &fingerprints).await?;
        }

        let parser = DefinitionParser::new(self.tokenizer.as_ref(), &self.parser_options);
        let parsed = parse_mods(
            &mut self.enabled_mods,
            &fingerprints,
            &parser,
            &self.definition_cache,
        )?;
        let mods_from_cache = parsed.iter().filter(|m| m.from_cache).count();
        tracing::info!(
            "Indexed {} mods ({} from cache)",
            parsed.len(),
            mods_from_cache
        );

        if let Some(indexer) = &self.indexer {
            for mod_defs in parsed.iter().filter(|m| !m.from_cache) {
                self.progress.emit(
                    PatchStage::Indexing,
                    Some(mod_defs.mod_name.clone()),
                    35.0,
                );
                indexer
                    .save_definitions(
                        &self.storage_root,
                        &self.game,
                        &mod_defs.mod_path,
                        &mod_defs.definitions,
                        mod_defs.source_fingerprint,
                    )
                    .await?;
            }
        }
        remember(&mut self.definition_cache, &parsed);

        self.progress.emit(PatchStage::Combining, None, 40.0);
        let index = combine(&parsed, &self.store_kind)?;
        let mod_order = parsed
            .iter()
            .filter(|m| !m.is_from_game)
            .map(|m| m.mod_name.clone())
            .collect();

        Ok(IndexRun {
            index,
            mod_order,
            mods_indexed: parsed.len(),
            mods_from_cache,
        })
    }

    /// Reset the persistent cache if it is stale and load every still-valid entry
    /// into the in-memory cache.
    async fn refresh_persistent_cache(
        &mut self,
        indexer: &GameIndexer,
        fingerprints: &[Option<u64>],
    ) -> Result<()> {
        let storage = &self.storage_root;
        let schema_same = indexer
            .cached_definitions_same(storage, &self.game, CACHE_VERSION)
            .await;
        let versions_same = indexer
            .game_versions_same(storage, &self.game, &self.game_versions)
            .await;
        if !schema_same || !versions_same {
            tracing::info!("Definition cache for {} is stale, clearing", self.game);
            indexer.clear_definition(storage, &self.game).await;
            self.definition_cache.invalidate();
            indexer
                .write_version(storage, &self.game, &self.game_versions, CACHE_VERSION)
                .await?;
        }

        for (enabled, fingerprint) in self.enabled_mods.iter().zip(fingerprints) {
            let Some(fingerprint) = *fingerprint else {
                continue;
            };
            let path = enabled.content.mod_path();
            if self.definition_cache.get(path, fingerprint).is_some() {
                continue;
            }
            if indexer.cached_source_fingerprint(storage, &self.game, path).await != Some(fingerprint) {
                continue;
            }
            if let Some(definitions) = indexer.get_definitions(storage, &self.game, path).await {
                self.definition_cache
                    .insert(path, fingerprint, Arc::new(definitions));
            }
        }
        Ok(())
    }

    /// Delete the merged files of addresses resolved in `prior` but not in `state`.
    ///
    /// Covers addresses that were orphaned, reopened or stopped conflicting. An
    /// address merged again later in the same run is simply rewritten.
    fn remove_stale_merges(&self, prior: &PatchState, state: &PatchState) -> Result<Vec<Utf8PathBuf>> {
        let Ok(merger) = self.mergers.for_game(&self.game) else {
            return Ok(Vec::new());
        };
        let still_resolved = state.resolved_addresses();
        let patch_root = self.patch_root();
        let mut removed = Vec::new();

        for address in prior.resolved_addresses() {
            if still_resolved.contains(&address) {
                continue;
            }
            let group: Vec<Definition> = prior
                .resolved_conflicts
                .iter()
                .filter(|d| d.address() == address)
                .cloned()
                .collect();
            let rel_path = match merger.file_name(&group) {
                Ok(rel_path) => rel_path,
                Err(e) => {
                    tracing::warn!("Cannot locate merged file of {}: {}", address, e);
                    continue;
                }
            };

            let path = patch_root.join(rel_path);
            match std::fs::remove_file(path.as_std_path()) {
                Ok(()) => {
                    tracing::debug!("Removed stale merged file {}", path);
                    removed.push(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !removed.is_empty() {
            tracing::info!("Removed {} stale merged files", removed.len());
        }
        Ok(removed)
    }

    fn merge_open_conflicts(&self, state: &mut PatchState) -> Result<Vec<Utf8PathBuf>> {
        let addresses: Vec<Address> = state.conflict_addresses().into_iter().collect();
        let total = addresses.len().max(1) as f64;
        let mut written = Vec::new();

        for (i, address) in addresses.iter().enumerate() {
            let group = state.conflict_at(address);
            if let Some(blocked) = group.iter().find(|d| !d.value_type().is_mergeable()) {
                tracing::debug!(
                    "Leaving {} open: {:?} cannot be merged",
                    address,
                    blocked.value_type()
                );
                continue;
            }

            self.progress.emit(
                PatchStage::Merging,
                Some(address.to_string()),
                90.0 + 10.0 * (i as f64 / total),
            );
            written.push(self.apply_merge(state, address)?);
        }

        tracing::info!("Merged {} of {} open conflicts", written.len(), addresses.len());
        Ok(written)
    }

    /// Merge the open conflict at `address`, write the file, move the address to
    /// `resolved_conflicts` and record the merged definition in history.
    ///
    /// Returns the path of the file written.
    pub fn apply_merge(&self, state: &mut PatchState, address: &Address) -> Result<Utf8PathBuf> {
        let group = state.conflict_at(address);
        if group.is_empty() {
            return Err(Error::ConflictNotFound(address.to_string()));
        }

        let merger = self.mergers.for_game(&self.game)?;
        let merged = merger.merge(&group)?;
        let path = write_merged_file(&self.patch_root(), &merged)?;

        let primary = primary_definition(&group)?;
        let history = merged_definition(primary, &merged, &self.patch_name(), state.load_order.len());

        state.conflicts.retain(|d| &d.address() != address);
        state.resolved_conflicts.extend(group);
        let history_address = history.address();
        state.conflict_history.retain(|d| d.address() != history_address);
        state.conflict_history.push(history);
        state.sort_buckets();

        tracing::debug!("Resolved {} into {}", address, merged.path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modmerge_definitions::AddressKind;
    use tempfile::tempdir;

    fn builder(root: &tempfile::TempDir) -> PatchBuilder {
        let root = Utf8PathBuf::from_path_buf(root.path().to_path_buf()).unwrap();
        PatchBuilder::new("Stellaris", "My Collection", root.join("storage"), root.join("out"))
    }

    #[test]
    fn test_patch_names() {
        let dir = tempdir().unwrap();
        let builder = builder(&dir);
        assert_eq!(builder.patch_name(), "modmerge_My Collection");
        assert!(builder.patch_root().ends_with("out/My Collection"));
        assert!(builder
            .state_path()
            .as_str()
            .replace('\\', "/")
            .ends_with("patches/Stellaris/My Collection/state.json"));
    }

    #[test]
    fn test_apply_merge_missing_conflict() {
        let dir = tempdir().unwrap();
        let builder = builder(&dir);
        let mut state = PatchState::default();
        let address = Address {
            kind: AddressKind::TypeAndId,
            key: "common/buildings-nope".to_string(),
        };

        let result = builder.apply_merge(&mut state, &address);
        assert!(matches!(result, Err(Error::ConflictNotFound(_))));
    }

    #[test]
    fn test_apply_merge_unsupported_game() {
        let dir = tempdir().unwrap();
        let builder = builder(&dir).with_mergers(MergerRegistry::empty());
        let mut state = PatchState::default();
        state.conflicts.push(
            Definition::builder("common/buildings", "x", "common/buildings/a.txt")
                .mod_name("A")
                .code("x = { }")
                .build(),
        );
        let address = state.conflicts[0].address();

        let result = builder.apply_merge(&mut state, &address);
        assert!(matches!(result, Err(Error::UnsupportedGame(_))));
        assert_eq!(state.conflicts.len(), 1);
    }

    #[test]
    fn test_progress_sink_never_goes_back() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = seen.clone();
        let sink = ProgressSink {
            callback: Some(Arc::new(move |p: PatchProgress| out.lock().unwrap().push(p.percent))),
            last: Arc::default(),
        };

        sink.emit(PatchStage::Indexing, None, 10.0);
        sink.emit(PatchStage::Indexing, None, 5.0);
        sink.emit(PatchStage::Combining, None, 40.0);
        assert_eq!(*seen.lock().unwrap(), [10.0, 40.0]);

        sink.reset();
        sink.emit(PatchStage::Indexing, None, 0.0);
        assert_eq!(seen.lock().unwrap().last(), Some(&0.0));
    }
}
