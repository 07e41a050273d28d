//! Conflict detection and patch state assembly.
//!
//! # Detection
//!
//! [`ConflictDetector::find_conflicts`] visits every address of a combined index:
//! each case-insensitive file key (for whole-file kinds) and each `type_and_id`
//! key (for script units). At one address:
//!
//! 1. `Invalid` definitions are reported separately; `allow_duplicate` ones are
//!    skipped.
//! 2. Unless the mode is advanced, a definition whose mod is declared as a
//!    dependency by another contributor is treated as intentionally overridden.
//! 3. The remaining definitions are grouped by `definition_sha`. With more than one
//!    distinct hash the address is a conflict, represented by the last definition
//!    (in load order) of every hash group.
//!
//! Separately, a definition whose whole file is replaced by a later mod that does
//! not define it again is reported as overwritten.
//!
//! # Assembly
//!
//! [`assemble_patch_state`] is a pure function turning a detection result and the
//! previous [`PatchState`] into the next one.

use crate::ignore_rules::IgnoreRules;
use crate::merger::LOCALISATION_DIR;
use crate::patch_state::{sort_definitions, PatchState, PatchStateMode};
use modmerge_definitions::{Address, AddressKind, Definition, IndexedDefinitions};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Definitions in conflict at one address, in load order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictGroup {
    pub address: Address,
    pub definitions: Vec<Definition>,
}

impl ConflictGroup {
    pub fn definition_shas(&self) -> BTreeSet<&str> {
        self.definitions.iter().map(|d| d.definition_sha()).collect()
    }

    /// Names of the non-game mods involved.
    pub fn mods(&self) -> BTreeSet<&str> {
        self.definitions
            .iter()
            .filter(|d| !d.is_from_game)
            .map(|d| d.mod_name.as_str())
            .collect()
    }
}

/// Output of [`ConflictDetector::find_conflicts`].
#[derive(Debug, Clone, Default)]
pub struct ConflictDetection {
    pub mode: PatchStateMode,
    /// Sorted by address.
    pub conflicts: Vec<ConflictGroup>,
    /// Definitions that failed to parse.
    pub invalid: Vec<Definition>,
    /// Definitions lost to a later whole-file replacement.
    pub overwritten: Vec<Definition>,
    pub has_game_definitions: bool,
}

impl ConflictDetection {
    pub fn get(&self, address: &Address) -> Option<&ConflictGroup> {
        self.conflicts
            .binary_search_by(|group| group.address.cmp(address))
            .ok()
            .map(|idx| &self.conflicts[idx])
    }
}

type AnalyzeProgress = Arc<dyn Fn(f64) + Send + Sync>;

/// Finds conflicting definitions in a combined index.
pub struct ConflictDetector {
    mode: PatchStateMode,
    progress_callback: Option<AnalyzeProgress>,
}

impl ConflictDetector {
    pub fn new(mode: PatchStateMode) -> Self {
        Self {
            mode,
            progress_callback: None,
        }
    }

    /// Register a callback receiving the analysed percentage (0–100).
    ///
    /// Values never decrease and the last one is always `100.0`.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Detect conflicts. `mod_order` lists enabled mod names in load order; mods not
    /// in it (the base game) load first.
    pub fn find_conflicts(
        &self,
        index: &IndexedDefinitions,
        mod_order: &[String],
    ) -> ConflictDetection {
        let rank = |definition: &Definition| {
            mod_order
                .iter()
                .position(|name| name == &definition.mod_name)
                .map(|p| p + 1)
                .unwrap_or(0)
        };

        let file_keys = index.get_all_file_keys();
        let type_and_id_keys = index.get_all_type_and_id_keys();
        let total = (file_keys.len() * 2 + type_and_id_keys.len()).max(1);
        let mut progress = ProgressTracker::new(total, self.progress_callback.clone());

        let mut detection = ConflictDetection {
            mode: self.mode,
            has_game_definitions: index.has_game_definitions(),
            ..Default::default()
        };

        let addresses = file_keys
            .iter()
            .map(|key| (AddressKind::File, index.get_by_file(key)))
            .chain(
                type_and_id_keys
                    .iter()
                    .map(|key| (AddressKind::TypeAndId, index.get_by_type_and_id(key))),
            );
        for (kind, found) in addresses {
            let mut definitions: Vec<Arc<Definition>> = found
                .into_iter()
                .filter(|d| d.value_type().address_kind() == kind)
                .collect();
            definitions.sort_by_key(|d| (rank(d), d.order));

            if let Some(group) = self.evaluate_address(&definitions, &mut detection.invalid) {
                detection.conflicts.push(group);
            }
            progress.advance();
        }

        for key in &file_keys {
            detection
                .overwritten
                .extend(overwritten_in_file(&index.get_by_file(key), &rank));
            progress.advance();
        }

        detection.conflicts.sort_by(|a, b| a.address.cmp(&b.address));
        sort_definitions(&mut detection.invalid);
        sort_definitions(&mut detection.overwritten);
        progress.finish();

        tracing::info!(
            "Found {} conflicts, {} invalid and {} overwritten definitions",
            detection.conflicts.len(),
            detection.invalid.len(),
            detection.overwritten.len()
        );
        detection
    }

    fn evaluate_address(
        &self,
        definitions: &[Arc<Definition>],
        invalid: &mut Vec<Definition>,
    ) -> Option<ConflictGroup> {
        let first = definitions.first()?;
        if !self.mode.includes_localization() && is_localisation_path(first.parent_directory_ci()) {
            return None;
        }

        let mut valid: Vec<&Definition> = Vec::new();
        for definition in definitions {
            if !definition.value_type().participates_in_conflicts() {
                invalid.push(Definition::clone(definition));
            } else if !definition.allow_duplicate {
                valid.push(definition);
            }
        }

        if valid.len() < 2 {
            return None;
        }
        let first_sha = valid[0].definition_sha();
        if valid.iter().all(|d| d.definition_sha() == first_sha) {
            return None;
        }

        if !self.mode.is_advanced() {
            let all = valid.clone();
            valid.retain(|candidate| !is_overridden_by_dependent(candidate, &all));
        }

        // Last definition in load order per distinct hash.
        let mut last_by_sha: BTreeMap<&str, usize> = BTreeMap::new();
        for (idx, definition) in valid.iter().enumerate() {
            last_by_sha.insert(definition.definition_sha(), idx);
        }
        if last_by_sha.len() < 2 {
            return None;
        }

        let mut representatives: Vec<usize> = last_by_sha.into_values().collect();
        representatives.sort_unstable();
        let group: Vec<Definition> = representatives
            .into_iter()
            .map(|idx| Definition::clone(valid[idx]))
            .collect();

        tracing::debug!(
            "Conflict at {} between {} definitions",
            first.address(),
            group.len()
        );
        Some(ConflictGroup {
            address: first.address(),
            definitions: group,
        })
    }
}

fn is_localisation_path(parent_directory_ci: &str) -> bool {
    parent_directory_ci
        .strip_prefix(LOCALISATION_DIR)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// `true` if another (non custom patch) contributor declares `candidate`'s mod as a
/// dependency.
fn is_overridden_by_dependent(candidate: &Definition, all: &[&Definition]) -> bool {
    all.iter().any(|other| {
        !other.is_custom_patch
            && other.mod_name != candidate.mod_name
            && other.dependencies.iter().any(|dep| dep == &candidate.mod_name)
    })
}

/// Script units of earlier mods lost because the last mod shipping this file does
/// not define them.
fn overwritten_in_file<F>(definitions: &[Arc<Definition>], rank: &F) -> Vec<Definition>
where
    F: Fn(&Definition) -> usize,
{
    let Some(last) = definitions.iter().max_by_key(|d| (rank(d), d.order)) else {
        return Vec::new();
    };
    let winner = last.mod_name.as_str();
    let winner_rank = rank(last);

    let kept: HashSet<&str> = definitions
        .iter()
        .filter(|d| d.mod_name == winner)
        .map(|d| d.type_and_id())
        .collect();

    definitions
        .iter()
        .filter(|d| {
            d.mod_name != winner
                && !d.is_from_game
                && rank(d) < winner_rank
                && d.value_type().address_kind() == AddressKind::TypeAndId
                && d.value_type().participates_in_conflicts()
                && !kept.contains(d.type_and_id())
        })
        .map(|d| Definition::clone(d))
        .collect()
}

/// Percentage reporter that only ever moves forward.
struct ProgressTracker {
    total: usize,
    processed: usize,
    last: f64,
    callback: Option<AnalyzeProgress>,
}

impl ProgressTracker {
    fn new(total: usize, callback: Option<AnalyzeProgress>) -> Self {
        let tracker = Self {
            total,
            processed: 0,
            last: 0.0,
            callback,
        };
        tracker.emit(0.0);
        tracker
    }

    fn emit(&self, percent: f64) {
        if let Some(callback) = &self.callback {
            callback(percent);
        }
    }

    fn advance(&mut self) {
        self.processed += 1;
        let percent = ((self.processed as f64 / self.total as f64) * 1000.0).floor() / 10.0;
        let percent = percent.min(99.9);
        if percent > self.last {
            self.last = percent;
            self.emit(percent);
        }
    }

    fn finish(&mut self) {
        self.last = 100.0;
        self.emit(100.0);
    }
}

/// Build the next [`PatchState`] from a detection result.
///
/// 1. Addresses previously resolved or ignored whose contributing mods are all
///    disabled become orphans and leave every other bucket, unless the detection
///    still reports a conflict there.
/// 2. Current conflicts matched by `ignore_rules` are ignored.
/// 3. Previously resolved conflicts with the same set of `definition_sha` stay
///    resolved; changed ones are open again.
/// 4. Everything else is an open conflict.
/// 5. History and custom conflicts carry over unchanged.
pub fn assemble_patch_state(
    prior: Option<&PatchState>,
    detection: &ConflictDetection,
    enabled_mods: &[String],
    ignore_rules: &IgnoreRules,
) -> PatchState {
    let enabled: HashSet<&str> = enabled_mods.iter().map(String::as_str).collect();
    let mut state = PatchState::new(detection.mode);
    state.load_order = enabled_mods.to_vec();
    state.has_game_definitions = detection.has_game_definitions;
    state.ignore_conflict_paths = ignore_rules.source().to_string();
    state.overwritten_conflicts = detection.overwritten.clone();

    let mut prior_resolved: BTreeMap<Address, Vec<&Definition>> = BTreeMap::new();
    let mut orphans: BTreeMap<Address, Vec<Definition>> = BTreeMap::new();

    if let Some(prior) = prior {
        state.conflict_history = prior.conflict_history.clone();
        state.custom_conflicts = prior.custom_conflicts.clone();

        for definition in &prior.resolved_conflicts {
            prior_resolved
                .entry(definition.address())
                .or_default()
                .push(definition);
        }

        let mut candidates: BTreeMap<Address, Vec<&Definition>> = BTreeMap::new();
        for definition in prior
            .resolved_conflicts
            .iter()
            .chain(&prior.ignored_conflicts)
            .chain(&prior.orphan_conflicts)
        {
            candidates
                .entry(definition.address())
                .or_default()
                .push(definition);
        }
        for (address, definitions) in candidates {
            // A live conflict at the address is classified below instead.
            if detection.get(&address).is_some() {
                continue;
            }
            let contributors: BTreeSet<&str> = definitions
                .iter()
                .filter(|d| !d.is_from_game)
                .map(|d| d.mod_name.as_str())
                .collect();
            if !contributors.is_empty() && contributors.iter().all(|m| !enabled.contains(m)) {
                orphans.insert(address, definitions.into_iter().cloned().collect());
            }
        }
    }

    for group in &detection.conflicts {
        if ignore_rules.is_ignored(&group.definitions) {
            state.ignored_conflicts.extend(group.definitions.iter().cloned());
            continue;
        }

        let unchanged = prior_resolved.get(&group.address).is_some_and(|resolved| {
            let resolved_shas: BTreeSet<&str> =
                resolved.iter().map(|d| d.definition_sha()).collect();
            resolved_shas == group.definition_shas()
        });
        if unchanged {
            state.resolved_conflicts.extend(group.definitions.iter().cloned());
        } else {
            state.conflicts.extend(group.definitions.iter().cloned());
        }
    }

    for definitions in orphans.into_values() {
        let mut seen = HashSet::new();
        for definition in definitions {
            if seen.insert((definition.mod_name.clone(), definition.definition_sha().to_string())) {
                state.orphan_conflicts.push(definition);
            }
        }
    }

    state.sort_buckets();
    tracing::info!(
        "Patch state: {} open, {} resolved, {} ignored, {} orphaned",
        state.conflict_addresses().len(),
        state.resolved_addresses().len(),
        state.ignored_addresses().len(),
        state.orphan_addresses().len()
    );
    state
}
