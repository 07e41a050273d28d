mod clear_cache;
mod conflicts;
mod config;
mod index;
mod merge;

pub use clear_cache::{clear_cache, ClearCacheArgs};
pub use conflicts::{show_conflicts, ConflictsArgs};
pub use config::{reset_config, set_output_dir, set_storage_dir, show_config};
pub use index::{index_mods, IndexArgs};
pub use merge::{merge_mods, MergeArgs};

use crate::errors::CliError;
use crate::utils::config::AppConfig;
use camino::Utf8PathBuf;
use modmerge_patch::{
    EnabledMod, FsModContent, GameIndexer, IgnoreRules, PatchBuilder, PatchStateMode,
};
use std::path::PathBuf;

/// Collection used when none is given.
pub const DEFAULT_COLLECTION: &str = "default";

/// Options shared by every command that indexes a mod list.
#[derive(Debug, Clone)]
pub struct SessionArgs {
    pub game: String,
    pub collection: String,
    /// Mod folders, in load order.
    pub mods: Vec<String>,
    pub game_dir: Option<String>,
    pub mode: PatchStateMode,
    pub ignore_file: Option<String>,
}

/// Build a [`PatchBuilder`] for the session from the app config.
pub fn open_builder(cfg: &AppConfig, args: &SessionArgs) -> Result<PatchBuilder, CliError> {
    if args.mods.is_empty() {
        return Err(CliError::NoMods);
    }

    let mut enabled = Vec::with_capacity(args.mods.len() + 1);
    if let Some(game_dir) = &args.game_dir {
        let dir = Utf8PathBuf::from(game_dir);
        if !dir.as_std_path().is_dir() {
            return Err(CliError::game_dir_not_found(PathBuf::from(game_dir)));
        }
        enabled.push(EnabledMod::new(Box::new(FsModContent::game(
            dir,
            args.game.clone(),
        )?)));
    }

    for mod_dir in &args.mods {
        let dir = Utf8PathBuf::from(mod_dir);
        if !dir.as_std_path().is_dir() {
            return Err(CliError::mod_dir_not_found(PathBuf::from(mod_dir)));
        }
        enabled.push(EnabledMod::new(Box::new(FsModContent::open(dir)?)));
    }

    let ignore_rules = match &args.ignore_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| CliError::ignore_file_unreadable(PathBuf::from(path), e))?;
            IgnoreRules::parse(&text)?
        }
        None => IgnoreRules::default(),
    };

    let storage_dir = cfg.storage_dir();
    tracing::debug!("Using storage directory {}", storage_dir);

    let mut builder = PatchBuilder::new(
        args.game.clone(),
        args.collection.clone(),
        storage_dir,
        cfg.output_dir(),
    )
    .with_mode(args.mode)
    .with_ignore_rules(ignore_rules)
    .with_parser_options(cfg.parser_options())
    .with_store_kind(cfg.store_kind())
    .with_mergers(cfg.merger_registry())
    .with_game_indexer(GameIndexer::new().with_compression(cfg.compress_cache))
    .with_progress(|progress| {
        tracing::debug!(
            "{:?} {:.1}% {}",
            progress.stage,
            progress.percent,
            progress.current_file.as_deref().unwrap_or("")
        );
    });
    builder.set_enabled_mods(enabled);

    Ok(builder)
}
