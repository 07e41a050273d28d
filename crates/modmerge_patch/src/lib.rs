//! Conflict detection and patch building for script-moddable strategy games.
//!
//! This crate turns a load-ordered list of mods into a patch. It supports:
//!
//! - **Parallel indexing**: Mods are parsed on the rayon pool into definitions
//! - **Definition caching**: In memory per builder, and on disk per game
//! - **Conflict detection**: Formatting-only differences never conflict
//! - **Ignore rules**: Mod, path and wildcard rules hide known conflicts
//! - **Merging**: Conflicting definitions are combined into FIOS/LIOS-named files
//! - **Persistent state**: Resolutions survive re-runs and mod list changes
//!
//! # Example
//!
//! ```no_run
//! use modmerge_patch::{EnabledMod, FsModContent, GameIndexer, PatchBuilder};
//! use camino::Utf8PathBuf;
//!
//! # async fn run() -> modmerge_patch::Result<()> {
//! let mut builder = PatchBuilder::new(
//!     "Stellaris",
//!     "My Collection",
//!     Utf8PathBuf::from("/home/me/.local/share/modmerge"),
//!     Utf8PathBuf::from("/home/me/Documents/Paradox Interactive/Stellaris/mod"),
//! )
//! .with_game_indexer(GameIndexer::new())
//! .with_progress(|progress| {
//!     println!("Stage: {:?}, {:.1}%", progress.stage, progress.percent);
//! });
//!
//! builder.set_enabled_mods(vec![
//!     EnabledMod::new(Box::new(FsModContent::open(Utf8PathBuf::from("/mods/first"))?)),
//!     EnabledMod::new(Box::new(FsModContent::open(Utf8PathBuf::from("/mods/second"))?)),
//! ]);
//!
//! let result = builder.build().await?;
//! println!(
//!     "Wrote {} files, {} conflicts left open",
//!     result.files_written.len(),
//!     result.state.conflict_addresses().len()
//! );
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod conflicts;
pub mod content;
pub mod error;
pub mod ignore_rules;
pub mod indexing;
pub mod merger;
pub mod patch_state;
pub mod utils;

// Re-export main types
pub use builder::{PatchBuildResult, PatchBuilder, PatchProgress, PatchStage, PATCH_MOD_PREFIX};
pub use cache::{GameIndexer, CACHE_VERSION, INDEX_CACHE_DIR};
pub use conflicts::{assemble_patch_state, ConflictDetection, ConflictDetector, ConflictGroup};
pub use content::{FsModContent, ModContentProvider};
pub use error::{Error, Result};
pub use ignore_rules::{IgnoreReason, IgnoreRules};
pub use indexing::{DefinitionCache, EnabledMod, ModDefinitions};
pub use merger::{DefinitionMerger, MergedFile, MergerRegistry, PathListMerger, TextEncoding};
pub use patch_state::{PatchState, PatchStateMode};

#[cfg(test)]
mod tests;
