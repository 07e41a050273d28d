//! User-authored ignore rules for the conflict list.
//!
//! One rule per line:
//!
//! ```text
//! # comment
//! modName:Some Mod          # conflicts only involving this mod are ignored
//! --showGameMods            # keep mod-vs-game conflicts visible
//! --showSelfConflicts       # keep conflicts within a single mod visible
//! common/buildings          # prefix, case-insensitive
//! events/*_debug.txt        # wildcard over the whole path, case-insensitive
//! !common/buildings/keep    # include rule, overrides any ignore rule
//! ```
//!
//! Path rules match against every file name of the group's definitions and
//! against the group's address path (`type/id`).

use crate::error::{Error, Result};
use modmerge_definitions::Definition;
use regex::Regex;
use std::collections::BTreeSet;

const MOD_NAME_PREFIX: &str = "modName:";
const SHOW_GAME_MODS: &str = "--showGameMods";
const SHOW_SELF_CONFLICTS: &str = "--showSelfConflicts";

#[derive(Debug, Clone)]
enum PathPattern {
    /// Lowercase path prefix, matched on whole segments.
    Prefix(String),
    Wildcard(Regex),
}

impl PathPattern {
    fn parse(pattern: &str) -> Result<Self> {
        if !pattern.contains('*') && !pattern.contains('?') {
            return Ok(Self::Prefix(pattern.trim_end_matches('/').to_lowercase()));
        }

        let escaped = regex::escape(pattern)
            .replace("\\*", ".*")
            .replace("\\?", ".");
        let regex = Regex::new(&format!("(?i)^{}$", escaped)).map_err(|source| {
            Error::InvalidIgnorePattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self::Wildcard(regex))
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => {
                let path = path.to_lowercase();
                match path.strip_prefix(prefix.as_str()) {
                    Some(rest) => rest.is_empty() || rest.starts_with('/'),
                    None => false,
                }
            }
            Self::Wildcard(regex) => regex.is_match(path),
        }
    }
}

/// Why a conflict group was moved to the ignored bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Every contributing mod is excluded by a `modName:` rule.
    ExcludedMods,
    /// Only one mod conflicts with the base game.
    GameMod,
    /// Only one mod is involved, conflicting with itself.
    SelfConflict,
    /// A path rule matched and no include rule did.
    PathRule,
}

/// Parsed ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    source: String,
    excluded_mods: BTreeSet<String>,
    show_game_mods: bool,
    show_self_conflicts: bool,
    ignore: Vec<PathPattern>,
    include: Vec<PathPattern>,
}

fn normalize_rule_path(path: &str) -> String {
    path.replace('\\', "/").trim().trim_start_matches('/').to_string()
}

impl IgnoreRules {
    /// Parse rule text. Blank and `#` lines are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Self {
            source: text.to_string(),
            ..Default::default()
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix(MOD_NAME_PREFIX) {
                rules.excluded_mods.insert(name.trim().to_string());
            } else if line == SHOW_GAME_MODS {
                rules.show_game_mods = true;
            } else if line == SHOW_SELF_CONFLICTS {
                rules.show_self_conflicts = true;
            } else if let Some(include) = line.strip_prefix('!') {
                let include = normalize_rule_path(include);
                if !include.is_empty() {
                    rules.include.push(PathPattern::parse(&include)?);
                }
            } else {
                let pattern = normalize_rule_path(line);
                if !pattern.is_empty() {
                    rules.ignore.push(PathPattern::parse(&pattern)?);
                }
            }
        }

        tracing::debug!(
            "Parsed ignore rules: {} ignore, {} include, {} excluded mods",
            rules.ignore.len(),
            rules.include.len(),
            rules.excluded_mods.len()
        );
        Ok(rules)
    }

    /// The text the rules were parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_mod_excluded(&self, mod_name: &str) -> bool {
        self.excluded_mods.contains(mod_name)
    }

    pub fn show_game_mods(&self) -> bool {
        self.show_game_mods
    }

    pub fn show_self_conflicts(&self) -> bool {
        self.show_self_conflicts
    }

    /// `true` if an ignore rule matches any of `paths` and no include rule does.
    pub fn is_path_ignored<'a, I>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let paths: Vec<String> = paths.into_iter().map(normalize_rule_path).collect();
        let matches = |patterns: &[PathPattern]| {
            patterns
                .iter()
                .any(|pattern| paths.iter().any(|path| pattern.matches(path)))
        };
        matches(&self.ignore) && !matches(&self.include)
    }

    /// Decide whether a conflict group is ignored.
    pub fn ignore_reason(&self, definitions: &[Definition]) -> Option<IgnoreReason> {
        let mods: BTreeSet<&str> = definitions
            .iter()
            .filter(|d| !d.is_from_game)
            .map(|d| d.mod_name.as_str())
            .collect();
        let non_game_definitions = definitions.iter().filter(|d| !d.is_from_game).count();

        if mods.iter().all(|m| self.is_mod_excluded(m)) {
            return Some(IgnoreReason::ExcludedMods);
        }

        if mods.len() <= 1 {
            if !self.show_game_mods && non_game_definitions <= 1 {
                return Some(IgnoreReason::GameMod);
            }
            if !self.show_self_conflicts && non_game_definitions > 1 {
                return Some(IgnoreReason::SelfConflict);
            }
        }

        let address_paths: Vec<String> = definitions.iter().map(|d| d.address_path()).collect();
        let paths = definitions
            .iter()
            .flat_map(|d| {
                std::iter::once(d.file()).chain(d.additional_file_names().iter().map(String::as_str))
            })
            .chain(address_paths.iter().map(String::as_str));
        if self.is_path_ignored(paths) {
            return Some(IgnoreReason::PathRule);
        }

        None
    }

    pub fn is_ignored(&self, definitions: &[Definition]) -> bool {
        self.ignore_reason(definitions).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(mod_name: &str, file: &str, id: &str) -> Definition {
        let parent = file.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        Definition::builder(parent, id, file)
            .mod_name(mod_name)
            .code(format!("{} = {{ {} }}", id, mod_name.len()))
            .build()
    }

    fn game(file: &str, id: &str) -> Definition {
        Definition::builder("common/buildings", id, file)
            .mod_name("Stellaris")
            .from_game(true)
            .build()
    }

    fn pair(file: &str) -> Vec<Definition> {
        vec![def("Mod A", file, "x"), def("Mod B", file, "x")]
    }

    #[test]
    fn test_empty_rules_ignore_nothing_between_mods() {
        let rules = IgnoreRules::parse("").unwrap();
        assert_eq!(rules.ignore_reason(&pair("common/buildings/a.txt")), None);
    }

    #[test]
    fn test_game_mod_conflicts_hidden_by_default() {
        let group = vec![game("common/buildings/00.txt", "x"), def("Mod A", "common/buildings/a.txt", "x")];

        let rules = IgnoreRules::parse("").unwrap();
        assert_eq!(rules.ignore_reason(&group), Some(IgnoreReason::GameMod));

        let rules = IgnoreRules::parse("--showGameMods").unwrap();
        assert!(rules.show_game_mods());
        assert_eq!(rules.ignore_reason(&group), None);
    }

    #[test]
    fn test_self_conflicts_hidden_by_default() {
        let group = vec![
            def("Mod A", "common/buildings/a.txt", "x"),
            def("Mod A", "common/buildings/b.txt", "x"),
        ];
        let rules = IgnoreRules::parse("").unwrap();
        assert_eq!(rules.ignore_reason(&group), Some(IgnoreReason::SelfConflict));

        let rules = IgnoreRules::parse("--showSelfConflicts").unwrap();
        assert_eq!(rules.ignore_reason(&group), None);
    }

    #[test]
    fn test_excluded_mods() {
        let rules = IgnoreRules::parse("modName:Mod A\nmodName: Mod B \n").unwrap();
        assert!(rules.is_mod_excluded("Mod A"));
        assert!(rules.is_mod_excluded("Mod B"));
        assert_eq!(
            rules.ignore_reason(&pair("common/buildings/a.txt")),
            Some(IgnoreReason::ExcludedMods)
        );

        let rules = IgnoreRules::parse("modName:Mod A").unwrap();
        assert_eq!(rules.ignore_reason(&pair("common/buildings/a.txt")), None);
    }

    #[test]
    fn test_prefix_rule_is_case_insensitive() {
        let rules = IgnoreRules::parse("# buildings are fine\nCommon\\Buildings").unwrap();
        assert_eq!(
            rules.ignore_reason(&pair("common/buildings/a.txt")),
            Some(IgnoreReason::PathRule)
        );
        assert_eq!(rules.ignore_reason(&pair("events/a.txt")), None);
    }

    #[test]
    fn test_prefix_rule_stops_at_segment_boundary() {
        let rules = IgnoreRules::parse("events").unwrap();
        assert!(rules.is_path_ignored(["events/x.txt"]));
        assert!(rules.is_path_ignored(["Events"]));
        assert!(!rules.is_path_ignored(["events_extra/x.txt"]));

        let rules = IgnoreRules::parse("events/").unwrap();
        assert!(rules.is_path_ignored(["events/x.txt"]));
        assert!(!rules.is_path_ignored(["events_extra/x.txt"]));
    }

    #[test]
    fn test_wildcard_matches_whole_path() {
        let rules = IgnoreRules::parse("events/*_DEBUG.txt").unwrap();
        assert!(rules.is_path_ignored(["events/my_debug.txt"]));
        assert!(!rules.is_path_ignored(["events/my_debug.txt.bak"]));
        assert!(!rules.is_path_ignored(["other/events/my_debug.txt"]));

        let rules = IgnoreRules::parse("events/a?.txt").unwrap();
        assert!(rules.is_path_ignored(["events/ab.txt"]));
        assert!(!rules.is_path_ignored(["events/abc.txt"]));
    }

    #[test]
    fn test_include_overrides_ignore() {
        let rules = IgnoreRules::parse("common/buildings\n!common/buildings/keep.txt").unwrap();
        assert!(rules.is_path_ignored(["common/buildings/drop.txt"]));
        assert!(!rules.is_path_ignored(["common/buildings/keep.txt"]));
    }

    #[test]
    fn test_address_path_matches() {
        let rules = IgnoreRules::parse("common/buildings/x").unwrap();
        assert!(rules.is_ignored(&pair("common/buildings/a.txt")));
    }

    #[test]
    fn test_source_is_kept() {
        let text = "# keep me\ncommon/buildings\n";
        assert_eq!(IgnoreRules::parse(text).unwrap().source(), text);
    }
}
