//! Application configuration management utilities.

use camino::Utf8PathBuf;
use modmerge_definitions::{ParserOptions, StoreKind};
use modmerge_patch::{MergerRegistry, PathListMerger};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::Path;

/// Which definition store the combined index is built on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreSetting {
    #[default]
    Memory,
    Disk,
}

/// FIOS directories of a game without a built-in merger.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameConfig {
    pub name: String,
    #[serde(default)]
    pub fios_paths: Vec<String>,
}

/// Application-wide configuration stored in config.toml.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the definition cache and patch states.
    pub storage_dir: Option<Utf8PathBuf>,
    /// Folder patch mods are written to.
    pub output_dir: Option<Utf8PathBuf>,
    pub compress_cache: bool,
    pub store_kind: StoreSetting,
    /// Replaces the built-in list when set.
    pub whole_file_directories: Option<Vec<String>>,
    /// Replaces the built-in list when set.
    pub text_extensions: Option<Vec<String>>,
    pub games: Vec<GameConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            output_dir: None,
            compress_cache: true,
            store_kind: StoreSetting::default(),
            whole_file_directories: None,
            text_extensions: None,
            games: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Configured storage directory, or the platform data directory.
    pub fn storage_dir(&self) -> Utf8PathBuf {
        self.storage_dir
            .clone()
            .or_else(default_data_dir)
            .unwrap_or_else(|| Utf8PathBuf::from("modmerge-data"))
    }

    /// Configured output directory, or `output` under the storage directory.
    pub fn output_dir(&self) -> Utf8PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.storage_dir().join("output"))
    }

    pub fn store_kind(&self) -> StoreKind {
        match self.store_kind {
            StoreSetting::Memory => StoreKind::Memory,
            StoreSetting::Disk => StoreKind::Disk {
                directory: Some(self.storage_dir().join("stores")),
            },
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        let mut options = ParserOptions::default();
        if let Some(dirs) = &self.whole_file_directories {
            options.whole_file_directories = dirs.clone();
        }
        if let Some(exts) = &self.text_extensions {
            options.text_extensions = exts
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect();
        }
        options
    }

    /// Built-in mergers plus one per configured game. Configured games win.
    pub fn merger_registry(&self) -> MergerRegistry {
        let mut registry = MergerRegistry::default();
        for game in &self.games {
            registry.register(Box::new(PathListMerger::new(
                game.name.clone(),
                game.fios_paths.clone(),
            )));
        }
        registry
    }
}

/// Platform data directory for modmerge, e.g. `~/.local/share/modmerge`.
pub fn default_data_dir() -> Option<Utf8PathBuf> {
    let dirs = directories_next::ProjectDirs::from("", "", "modmerge")?;
    Utf8PathBuf::from_path_buf(dirs.data_local_dir().to_path_buf()).ok()
}

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// Returns a config file path located next to the executable.
pub fn config_path(file_name: &str) -> Option<Utf8PathBuf> {
    install_dir().map(|dir| dir.join(file_name))
}

/// Returns the default configuration file path (config.toml).
pub fn default_config_path() -> Option<Utf8PathBuf> {
    config_path("config.toml")
}

fn parse_config(content: &str) -> Option<AppConfig> {
    match toml::from_str(content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::warn!("Ignoring malformed config.toml: {}", e);
            None
        }
    }
}

/// Loads the application configuration from config.toml.
/// Returns default configuration if file doesn't exist or cannot be parsed.
pub fn load_config() -> AppConfig {
    if let Some(path) = default_config_path() {
        if Path::new(path.as_str()).exists() {
            if let Ok(content) = fs::read_to_string(path.as_str()) {
                if let Some(cfg) = parse_config(&content) {
                    return cfg;
                }
            }
        }
    }
    AppConfig::default()
}

/// Saves the application configuration to config.toml.
pub fn save_config(cfg: &AppConfig) -> io::Result<()> {
    if let Some(path) = default_config_path() {
        let content = toml::to_string_pretty(cfg).map_err(io::Error::other)?;
        fs::write(path.as_str(), content)
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine config path",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modmerge_patch::DefinitionMerger;

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg = parse_config("store_kind = \"disk\"\n").unwrap();
        assert_eq!(cfg.store_kind, StoreSetting::Disk);
        assert!(cfg.compress_cache);
        assert!(cfg.games.is_empty());
    }

    #[test]
    fn test_parser_overrides() {
        let cfg = parse_config("text_extensions = [\".TXT\", \"yml\"]\n").unwrap();
        let options = cfg.parser_options();
        assert_eq!(options.text_extensions, ["txt", "yml"]);
        assert_eq!(
            options.whole_file_directories,
            ParserOptions::default().whole_file_directories
        );
    }

    #[test]
    fn test_configured_game_merger() {
        let cfg = parse_config(
            "[[games]]\nname = \"EuropaUniversalisIV\"\nfios_paths = [\"events\"]\n",
        )
        .unwrap();
        let registry = cfg.merger_registry();
        let merger = registry.for_game("EuropaUniversalisIV").unwrap();
        assert_eq!(merger.fios_paths(), ["events"]);
        assert!(registry.for_game("Stellaris").is_ok());
    }

    #[test]
    fn test_round_trip() {
        let cfg = AppConfig {
            storage_dir: Some(Utf8PathBuf::from("/data")),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back = parse_config(&text).unwrap();
        assert_eq!(back.storage_dir, cfg.storage_dir);
        assert_eq!(back.output_dir(), Utf8PathBuf::from("/data/output"));
    }

    #[test]
    fn test_malformed_config_is_ignored() {
        assert!(parse_config("store_kind = [").is_none());
    }
}
