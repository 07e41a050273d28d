use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Mod directory not found: {path}")]
    #[diagnostic(
        code(mods::not_found),
        help("Pass the folder containing the mod's descriptor.mod and content directories")
    )]
    ModDirNotFound { path: PathBuf },

    #[error("Game directory not found: {path}")]
    #[diagnostic(
        code(game::not_found),
        help("Pass the game's install folder, the one containing 'common' and 'events'")
    )]
    GameDirNotFound { path: PathBuf },

    #[error("Failed to read ignore rules from {path}")]
    #[diagnostic(
        code(ignore::read_failed),
        help("Check the file exists and is readable text")
    )]
    IgnoreFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No mods given")]
    #[diagnostic(
        code(mods::empty),
        help("Pass at least one mod folder with --mods")
    )]
    NoMods,

    #[error("Configuration could not be saved")]
    #[diagnostic(
        code(config::save_failed),
        help("Check that the folder next to the executable is writable")
    )]
    ConfigSaveFailed {
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(patch::failed))]
    Patch(#[from] modmerge_patch::Error),

    #[error("Failed to create directory {path}")]
    #[diagnostic(
        code(io::create_dir_failed),
        help("Check that the parent folder exists and is writable")
    )]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn mod_dir_not_found(path: PathBuf) -> Self {
        Self::ModDirNotFound { path }
    }

    pub fn game_dir_not_found(path: PathBuf) -> Self {
        Self::GameDirNotFound { path }
    }

    pub fn ignore_file_unreadable(path: PathBuf, source: std::io::Error) -> Self {
        Self::IgnoreFileUnreadable { path, source }
    }

    pub fn create_dir_failed(path: PathBuf, source: std::io::Error) -> Self {
        Self::CreateDirFailed { path, source }
    }

    pub fn config_save_failed(source: std::io::Error) -> Self {
        Self::ConfigSaveFailed { source }
    }
}
