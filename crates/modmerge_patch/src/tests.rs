use crate::{
    EnabledMod, FsModContent, GameIndexer, IgnoreRules, PatchBuilder, PatchStage, PatchState,
    PatchStateMode,
};
use camino::Utf8PathBuf;
use modmerge_definitions::{Address, AddressKind};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    fn write_mod(&self, name: &str, descriptor_extra: &str, files: &[(&str, &str)]) -> Utf8PathBuf {
        let dir = self.root.join("mods").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("descriptor.mod"),
            format!("name = \"{}\"\n{}", name, descriptor_extra),
        )
        .unwrap();
        for (path, content) in files {
            let path = dir.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn builder(&self) -> PatchBuilder {
        PatchBuilder::new(
            "Stellaris",
            "Collection",
            self.root.join("storage"),
            self.root.join("output"),
        )
    }
}

fn enabled(dirs: &[&Utf8PathBuf]) -> Vec<EnabledMod> {
    dirs.iter()
        .map(|d| EnabledMod::new(Box::new(FsModContent::open((*d).clone()).unwrap())))
        .collect()
}

fn foo_address() -> Address {
    Address {
        kind: AddressKind::TypeAndId,
        key: "common/buildings-building.foo".to_string(),
    }
}

fn merged_foo_path(ws: &Workspace) -> Utf8PathBuf {
    ws.root
        .join("output/Collection/common/buildings/zzz_building.foo.txt")
}

fn two_building_mods(ws: &Workspace) -> (Utf8PathBuf, Utf8PathBuf) {
    let m1 = ws.write_mod(
        "M1",
        "",
        &[("common/buildings/m1_buildings.txt", "building.foo = { cost = 1 }\n")],
    );
    let m2 = ws.write_mod(
        "M2",
        "",
        &[("common/buildings/m2_buildings.txt", "building.foo = { cost = 2 }\n")],
    );
    (m1, m2)
}

#[tokio::test]
async fn test_conflicting_building_is_merged_and_resolved() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);

    let mut builder = ws.builder();
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let result = builder.build().await.unwrap();

    assert_eq!(result.detection.conflicts.len(), 1);
    assert_eq!(result.detection.conflicts[0].address, foo_address());

    let expected = ws
        .root
        .join("output/Collection/common/buildings/zzz_building.foo.txt");
    assert_eq!(result.files_written, [expected.clone()]);
    let merged = fs::read_to_string(&expected).unwrap();
    let first = merged.find("cost = 1").unwrap();
    let second = merged.find("cost = 2").unwrap();
    assert!(first < second);
    assert!(merged.ends_with('\n'));

    assert!(result.state.conflicts.is_empty());
    assert_eq!(
        result.state.resolved_addresses().into_iter().collect::<Vec<_>>(),
        [foo_address()]
    );
    assert_eq!(result.state.conflict_history.len(), 1);
    assert_eq!(result.state.conflict_history[0].mod_name, "modmerge_Collection");

    let saved = PatchState::load(&result.state_path).unwrap().unwrap();
    assert_eq!(saved, result.state);
}

#[tokio::test]
async fn test_rerun_keeps_resolution() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);

    let mut builder = ws.builder();
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let first = builder.build().await.unwrap();

    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let second = builder.build().await.unwrap();

    assert!(second.files_written.is_empty());
    assert_eq!(second.state, first.state);
}

#[tokio::test]
async fn test_analysis_is_idempotent() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);
    let rules = IgnoreRules::parse("--showSelfConflicts").unwrap();

    let mut builder = ws.builder().with_ignore_rules(rules);
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let first = builder.analyze().await.unwrap();
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let second = builder.analyze().await.unwrap();

    assert!(first.files_written.is_empty());
    assert_eq!(first.state.conflict_addresses().len(), 1);
    assert_eq!(first.state, second.state);
}

#[tokio::test]
async fn test_disabling_mods_orphans_resolution() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);
    let m3 = ws.write_mod("M3", "", &[("events/m3.txt", "namespace = m3\n")]);

    let mut builder = ws.builder();
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    builder.build().await.unwrap();

    builder.set_enabled_mods(enabled(&[&m3]));
    let result = builder.analyze().await.unwrap();

    assert!(result.state.resolved_conflicts.is_empty());
    assert_eq!(
        result.state.orphan_addresses().into_iter().collect::<Vec<_>>(),
        [foo_address()]
    );
    assert_eq!(result.state.conflict_history.len(), 1);
    assert!(!merged_foo_path(&ws).exists());
    assert_eq!(result.files_removed, [merged_foo_path(&ws)]);
}

#[tokio::test]
async fn test_disabling_contributor_removes_merged_file() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);

    let mut builder = ws.builder();
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let first = builder.build().await.unwrap();
    assert_eq!(first.files_written, [merged_foo_path(&ws)]);
    assert!(merged_foo_path(&ws).exists());

    builder.set_enabled_mods(enabled(&[&m1]));
    let second = builder.analyze().await.unwrap();

    assert!(second.state.resolved_conflicts.is_empty());
    assert!(!merged_foo_path(&ws).exists());
    assert_eq!(second.files_removed, [merged_foo_path(&ws)]);

    builder.set_enabled_mods(enabled(&[&m1]));
    let third = builder.build().await.unwrap();
    assert!(third.files_removed.is_empty());
    assert!(third.files_written.is_empty());
}

#[tokio::test]
async fn test_new_conflict_at_resolved_address_stays_open() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);
    let m3 = ws.write_mod(
        "M3",
        "",
        &[("common/buildings/m3_buildings.txt", "building.foo = { cost = 3 }\n")],
    );
    let m4 = ws.write_mod(
        "M4",
        "",
        &[("common/buildings/m4_buildings.txt", "building.foo = { cost = 4 }\n")],
    );

    let mut builder = ws.builder();
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    builder.build().await.unwrap();

    builder.set_enabled_mods(enabled(&[&m3, &m4]));
    let analyzed = builder.analyze().await.unwrap();

    assert_eq!(
        analyzed.state.conflict_addresses().into_iter().collect::<Vec<_>>(),
        [foo_address()]
    );
    assert!(analyzed.state.orphan_conflicts.is_empty());
    assert!(analyzed.state.resolved_conflicts.is_empty());
    assert!(!merged_foo_path(&ws).exists());

    builder.set_enabled_mods(enabled(&[&m3, &m4]));
    let built = builder.build().await.unwrap();

    assert_eq!(built.files_written, [merged_foo_path(&ws)]);
    assert!(built.state.conflicts.is_empty());
    assert!(built.state.orphan_conflicts.is_empty());
    assert_eq!(built.state.conflict_history.len(), 1);
    let merged = fs::read_to_string(merged_foo_path(&ws)).unwrap();
    assert!(merged.contains("cost = 3"));
    assert!(merged.contains("cost = 4"));
    assert!(!merged.contains("cost = 1"));
}

#[tokio::test]
async fn test_formatting_only_differences_are_not_conflicts() {
    let ws = Workspace::new();
    let m1 = ws.write_mod(
        "M1",
        "",
        &[("common/buildings/a.txt", "building.foo = {\n\tcost = 1 # cheap\n}\n")],
    );
    let m2 = ws.write_mod(
        "M2",
        "",
        &[("common/buildings/b.txt", "building.foo={cost=1}\n")],
    );

    let mut builder = ws.builder();
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let result = builder.build().await.unwrap();

    assert!(result.detection.conflicts.is_empty());
    assert!(result.files_written.is_empty());
}

#[tokio::test]
async fn test_declared_dependency_overrides_in_default_mode() {
    let ws = Workspace::new();
    let (m1, _) = two_building_mods(&ws);
    let patch = ws.write_mod(
        "M1 Patch",
        "dependencies = { \"M1\" }\n",
        &[("common/buildings/patch.txt", "building.foo = { cost = 5 }\n")],
    );

    let mut builder = ws.builder();
    builder.set_enabled_mods(enabled(&[&m1, &patch]));
    let result = builder.analyze().await.unwrap();
    assert!(result.detection.conflicts.is_empty());

    let mut builder = ws.builder().with_mode(PatchStateMode::Advanced);
    builder.set_enabled_mods(enabled(&[&m1, &patch]));
    let result = builder.analyze().await.unwrap();
    assert_eq!(result.detection.conflicts.len(), 1);
}

#[tokio::test]
async fn test_read_only_mode_writes_nothing() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);

    let mut builder = ws.builder().with_mode(PatchStateMode::ReadOnly);
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let result = builder.build().await.unwrap();

    assert!(result.files_written.is_empty());
    assert_eq!(result.state.conflict_addresses().len(), 1);
    assert!(!result.patch_root.as_std_path().exists());
}

#[tokio::test]
async fn test_persistent_cache_serves_second_builder() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);

    let mut builder = ws.builder().with_game_indexer(GameIndexer::new());
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    let first = builder.analyze().await.unwrap();
    assert_eq!(first.mods_from_cache, 0);

    let mut fresh = ws.builder().with_game_indexer(GameIndexer::new());
    fresh.set_enabled_mods(enabled(&[&m1, &m2]));
    let second = fresh.analyze().await.unwrap();
    assert_eq!(second.mods_from_cache, 2);
    assert_eq!(second.state, first.state);

    assert!(fresh.invalidate_cache().await);
    fresh.set_enabled_mods(enabled(&[&m1, &m2]));
    let third = fresh.analyze().await.unwrap();
    assert_eq!(third.mods_from_cache, 0);
}

#[tokio::test]
async fn test_progress_reaches_complete() {
    let ws = Workspace::new();
    let (m1, m2) = two_building_mods(&ws);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let mut builder = ws
        .builder()
        .with_progress(move |p| sink.lock().unwrap().push((p.stage, p.percent)));
    builder.set_enabled_mods(enabled(&[&m1, &m2]));
    builder.build().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first().map(|(s, _)| *s), Some(PatchStage::Indexing));
    assert_eq!(seen.last(), Some(&(PatchStage::Complete, 100.0)));
    assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(seen.iter().any(|(s, _)| *s == PatchStage::Merging));
}
