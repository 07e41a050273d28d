//! Per-game merge strategies.
//!
//! A merge group is every definition at one address that takes part in a
//! conflict. Merging produces a single [`MergedFile`] whose name makes the game
//! load it at the right point of its alphabetical file order:
//!
//! | Parent directory                 | Output path                       |
//! |----------------------------------|-----------------------------------|
//! | under `localisation`             | `{parent}/replace/{name}`         |
//! | listed in the game's FIOS paths  | `{parent}/!!!_{name}`             |
//! | anything else                    | `{parent}/zzz_{name}`             |
//!
//! In FIOS directories the game keeps the first definition it reads, so the merged
//! file has to sort first. Everywhere else the last one read wins (LIOS).

use crate::error::{Error, Result};
use crate::utils::write_atomic;
use camino::{Utf8Path, Utf8PathBuf};
use modmerge_definitions::{AddressKind, Definition};
use std::collections::BTreeSet;

/// Prefix sorting a file before every other file in its directory.
pub const FIOS_PREFIX: &str = "!!!_";
/// Prefix sorting a file after every other file in its directory.
pub const LIOS_PREFIX: &str = "zzz_";
pub const LOCALISATION_DIR: &str = "localisation";
pub const LOCALISATION_REPLACE_DIR: &str = "replace";

pub const STELLARIS: &str = "Stellaris";
pub const HEARTS_OF_IRON_4: &str = "HeartsofIronIV";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Text encoding of a merged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// UTF-8 with a byte order mark, required for localisation files.
    Utf8Bom,
}

impl TextEncoding {
    pub fn encode(self, content: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => content.as_bytes().to_vec(),
            TextEncoding::Utf8Bom => {
                let mut bytes = Vec::with_capacity(UTF8_BOM.len() + content.len());
                bytes.extend_from_slice(UTF8_BOM);
                bytes.extend_from_slice(content.as_bytes());
                bytes
            }
        }
    }
}

/// Output of merging one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedFile {
    /// Path relative to the patch root, `/`-separated.
    pub path: String,
    pub encoding: TextEncoding,
    pub content: String,
}

fn is_localisation(parent_directory_ci: &str) -> bool {
    parent_directory_ci == LOCALISATION_DIR
        || parent_directory_ci.starts_with(&format!("{}/", LOCALISATION_DIR))
}

/// Remove characters that are not allowed in file names on any supported platform.
pub fn clean_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect()
}

/// Check the group's preconditions and return the definition that names it.
///
/// Namespaces and variables may accompany any type. All other definitions must
/// share one `type`. The first non-declaration is the primary definition; a group
/// of declarations only is named after its first member.
pub fn primary_definition(definitions: &[Definition]) -> Result<&Definition> {
    let Some(first) = definitions.first() else {
        tracing::error!("Merge requested for an empty definition group");
        return Err(Error::EmptyDefinitionGroup);
    };

    let types: BTreeSet<&str> = definitions
        .iter()
        .filter(|d| !d.value_type().is_declaration())
        .map(|d| d.type_name())
        .collect();
    if types.len() > 1 {
        let types: Vec<String> = types.into_iter().map(str::to_string).collect();
        tracing::error!("Refusing to merge mixed definition types: {:?}", types);
        return Err(Error::MixedDefinitionTypes { types });
    }

    Ok(definitions
        .iter()
        .find(|d| !d.value_type().is_declaration())
        .unwrap_or(first))
}

/// A game-specific merge strategy.
///
/// Implementors only describe the game; naming, encoding and concatenation are
/// provided. Every provided method validates the group with
/// [`primary_definition`] first.
pub trait DefinitionMerger: Send + Sync {
    /// `true` if this merger handles `game`.
    fn can_process(&self, game: &str) -> bool;

    /// Directories where the game keeps the first definition it reads.
    fn fios_paths(&self) -> &[String];

    /// Patch-relative output path for the group.
    fn file_name(&self, definitions: &[Definition]) -> Result<String> {
        let primary = primary_definition(definitions)?;

        let file = primary.file();
        let file_name = file.rsplit('/').next().unwrap_or(file);
        let name = match primary.value_type().address_kind() {
            AddressKind::TypeAndId => match file_name.rsplit_once('.') {
                Some((_, ext)) => format!("{}.{}", clean_file_name(primary.id()), ext),
                None => clean_file_name(primary.id()),
            },
            AddressKind::File => clean_file_name(file_name),
        };

        let parent = primary.parent_directory();
        let parent_ci = primary.parent_directory_ci();
        let join = |dir: &str, name: &str| {
            if dir.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", dir, name)
            }
        };

        if is_localisation(parent_ci) {
            let already_replace = parent_ci
                .split('/')
                .any(|segment| segment == LOCALISATION_REPLACE_DIR);
            return Ok(if already_replace {
                join(parent, &name)
            } else {
                join(&join(parent, LOCALISATION_REPLACE_DIR), &name)
            });
        }

        let is_fios = !parent_ci.is_empty()
            && self.fios_paths().iter().any(|path| {
                let path = path.replace('\\', "/").trim_matches('/').to_lowercase();
                path == parent_ci || path.ends_with(&format!("/{}", parent_ci))
            });
        let prefix = if is_fios { FIOS_PREFIX } else { LIOS_PREFIX };
        Ok(join(parent, &format!("{}{}", prefix, name)))
    }

    /// Encoding the game expects for the group's output.
    fn encoding(&self, definitions: &[Definition]) -> Result<TextEncoding> {
        let primary = primary_definition(definitions)?;
        Ok(if is_localisation(primary.parent_directory_ci()) {
            TextEncoding::Utf8Bom
        } else {
            TextEncoding::Utf8
        })
    }

    /// Concatenate the group: namespaces, then variables, then everything else,
    /// each tier in load order. Every block is followed by a newline.
    fn merge_content(&self, definitions: &[Definition]) -> Result<String> {
        primary_definition(definitions)?;

        let mut ordered: Vec<&Definition> = definitions.iter().collect();
        ordered.sort_by_key(|d| (d.value_type().merge_tier(), d.order));

        let mut content = String::new();
        for definition in ordered {
            content.push_str(definition.code());
            content.push('\n');
        }
        Ok(content)
    }

    /// Merge the group into one file.
    fn merge(&self, definitions: &[Definition]) -> Result<MergedFile> {
        let primary = primary_definition(definitions)?;
        if let Some(blocked) = definitions.iter().find(|d| !d.value_type().is_mergeable()) {
            return Err(Error::NotMergeable {
                address: primary.address().to_string(),
                value_type: format!("{:?}", blocked.value_type()),
            });
        }

        Ok(MergedFile {
            path: self.file_name(definitions)?,
            encoding: self.encoding(definitions)?,
            content: self.merge_content(definitions)?,
        })
    }
}

/// Data-driven merger: a game name and its FIOS directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathListMerger {
    game: String,
    fios_paths: Vec<String>,
}

impl PathListMerger {
    pub fn new(game: impl Into<String>, fios_paths: Vec<String>) -> Self {
        Self {
            game: game.into(),
            fios_paths,
        }
    }

    pub fn stellaris() -> Self {
        Self::new(
            STELLARIS,
            [
                "events",
                "interface",
                "gfx",
                "common/anomalies",
                "common/component_templates",
                "common/diplomacy_economy",
                "common/event_chains",
                "common/galactic_focuses",
                "common/opinion_modifiers",
                "common/special_projects",
                "common/static_modifiers",
                "common/strategic_resources",
                "common/terraform",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }

    pub fn hearts_of_iron4() -> Self {
        Self::new(
            HEARTS_OF_IRON_4,
            ["events", "interface", "gfx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    pub fn game(&self) -> &str {
        &self.game
    }
}

impl DefinitionMerger for PathListMerger {
    fn can_process(&self, game: &str) -> bool {
        self.game.eq_ignore_ascii_case(game)
    }

    fn fios_paths(&self) -> &[String] {
        &self.fios_paths
    }
}

/// Chooses the merger for a game.
pub struct MergerRegistry {
    mergers: Vec<Box<dyn DefinitionMerger>>,
}

impl Default for MergerRegistry {
    /// Registry with the built-in games.
    fn default() -> Self {
        Self {
            mergers: vec![
                Box::new(PathListMerger::stellaris()),
                Box::new(PathListMerger::hearts_of_iron4()),
            ],
        }
    }
}

impl MergerRegistry {
    pub fn empty() -> Self {
        Self {
            mergers: Vec::new(),
        }
    }

    /// Add a merger. Later registrations take precedence.
    pub fn register(&mut self, merger: Box<dyn DefinitionMerger>) {
        self.mergers.insert(0, merger);
    }

    pub fn for_game(&self, game: &str) -> Result<&dyn DefinitionMerger> {
        self.mergers
            .iter()
            .find(|m| m.can_process(game))
            .map(|m| m.as_ref())
            .ok_or_else(|| Error::UnsupportedGame(game.to_string()))
    }
}

impl std::fmt::Debug for MergerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergerRegistry")
            .field("mergers", &self.mergers.len())
            .finish()
    }
}

/// Write a merged file below `output_root`, replacing any previous version.
///
/// Returns the absolute path written.
pub fn write_merged_file(output_root: &Utf8Path, merged: &MergedFile) -> Result<Utf8PathBuf> {
    let path = output_root.join(&merged.path);
    write_atomic(&path, &merged.encoding.encode(&merged.content))?;
    tracing::debug!("Wrote merged file {}", path);
    Ok(path)
}

/// Definition recorded in history for a merged group.
pub fn merged_definition(
    primary: &Definition,
    merged: &MergedFile,
    patch_name: &str,
    order: usize,
) -> Definition {
    Definition::builder(primary.type_name(), primary.id(), &merged.path)
        .value_type(primary.value_type())
        .code(&merged.content)
        .mod_name(patch_name)
        .original_mod_name(&primary.original_mod_name)
        .order(order)
        .code_separator(primary.code_separator.clone())
        .code_tag(primary.code_tag.clone())
        .used_parser("merge")
        .build()
}
