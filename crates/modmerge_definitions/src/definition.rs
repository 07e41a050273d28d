//! The [`Definition`] record and its builder.
//!
//! Identity fields (`type`, `id`, `file`, `disk_file`, `virtual_path`) and content
//! (`code`, `value_type`) are private. Everything derived from them is computed once
//! by [`DefinitionBuilder::build`] and recomputed on deserialization, so the
//! case-insensitive keys and content hashes can never drift from their sources.

use crate::canonical::{address_sha, normalize_code, sha256_hex, text_sha};
use crate::value_type::{AddressKind, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize a mod-relative path: forward slashes, no leading `./` or `/`.
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut trimmed = replaced.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

/// Directory part of a normalized path, or `""` for top-level files.
pub fn parent_directory(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Logical address of a definition. Groups of definitions sharing an address are
/// what conflict detection compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub kind: AddressKind,
    /// `type_and_id` for [`AddressKind::TypeAndId`], `file_ci` for [`AddressKind::File`].
    pub key: String,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddressKind::TypeAndId => write!(f, "{}", self.key),
            AddressKind::File => write!(f, "file:{}", self.key),
        }
    }
}

/// Error captured while tokenizing the unit a definition was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Provenance of one file being turned into definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    pub mod_name: String,
    pub mod_path: String,
    /// Mod-relative path, normalized on construction.
    pub file: String,
    /// Rank in the load order at indexing time.
    pub order: usize,
    /// Mods the owning mod declares as dependencies.
    pub dependencies: Vec<String>,
    pub is_from_game: bool,
}

impl ModFile {
    pub fn new(
        mod_name: impl Into<String>,
        mod_path: impl Into<String>,
        file: impl AsRef<str>,
        order: usize,
    ) -> Self {
        Self {
            mod_name: mod_name.into(),
            mod_path: mod_path.into(),
            file: normalize_path(file.as_ref()),
            order,
            dependencies: Vec::new(),
            is_from_game: false,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn from_game(mut self) -> Self {
        self.is_from_game = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityParts {
    id: String,
    #[serde(rename = "type")]
    type_name: String,
    file: String,
    disk_file: String,
    virtual_path: Option<String>,
}

/// Identity of a definition plus the keys derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdentityParts", into = "IdentityParts")]
struct Identity {
    parts: IdentityParts,
    type_and_id: String,
    file_ci: String,
    disk_file_ci: String,
    parent_directory: String,
    parent_directory_ci: String,
    virtual_parent_directory: Option<String>,
}

impl From<IdentityParts> for Identity {
    fn from(parts: IdentityParts) -> Self {
        let type_and_id = format!("{}-{}", parts.type_name, parts.id);
        let parent = parent_directory(&parts.file).to_string();
        let virtual_parent_directory = parts
            .virtual_path
            .as_deref()
            .map(|p| parent_directory(p).to_string());
        Self {
            type_and_id,
            file_ci: parts.file.to_lowercase(),
            disk_file_ci: parts.disk_file.to_lowercase(),
            parent_directory_ci: parent.to_lowercase(),
            parent_directory: parent,
            virtual_parent_directory,
            parts,
        }
    }
}

impl From<Identity> for IdentityParts {
    fn from(identity: Identity) -> Self {
        identity.parts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentParts {
    value_type: ValueType,
    code: String,
    original_code: String,
    /// Only set for [`ValueType::Binary`], where it is the hash of the raw bytes.
    raw_sha: Option<String>,
}

/// Content of a definition plus its hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ContentParts", into = "ContentParts")]
struct Content {
    parts: ContentParts,
    content_sha: String,
    definition_sha: String,
}

impl Content {
    fn new(parts: ContentParts, type_and_id: &str) -> Self {
        let (content_sha, definition_sha) = match (&parts.raw_sha, parts.value_type.hashes_raw_bytes()) {
            (Some(raw), true) => (raw.clone(), raw.clone()),
            _ => (text_sha(&parts.code), address_sha(type_and_id, &parts.code)),
        };
        Self {
            parts,
            content_sha,
            definition_sha,
        }
    }
}

impl From<ContentParts> for Content {
    // The address is not known here; `Definition`'s own `From` rebinds it.
    fn from(parts: ContentParts) -> Self {
        Content::new(parts, "")
    }
}

impl From<Content> for ContentParts {
    fn from(content: Content) -> Self {
        content.parts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDefinition {
    identity: Identity,
    content: Content,
    mod_name: String,
    original_mod_name: String,
    mod_path: String,
    order: usize,
    is_from_game: bool,
    is_custom_patch: bool,
    allow_duplicate: bool,
    code_separator: String,
    code_tag: String,
    dependencies: Vec<String>,
    variables: Vec<String>,
    additional_file_names: Vec<String>,
    generated_file_names: Vec<String>,
    overwritten_file_names: Vec<String>,
    tags: Vec<String>,
    error: Option<ParseError>,
    used_parser: String,
}

/// One addressable unit of content from one file of one mod.
///
/// Construct with [`Definition::builder`]. Identity and content are read-only;
/// provenance fields are public because nothing is derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredDefinition", into = "StoredDefinition")]
pub struct Definition {
    identity: Identity,
    content: Content,
    pub mod_name: String,
    pub original_mod_name: String,
    pub mod_path: String,
    /// Load-order rank. Later wins.
    pub order: usize,
    pub is_from_game: bool,
    /// Authored by the user in the conflict solver rather than shipped by a mod.
    pub is_custom_patch: bool,
    /// Never reported as a conflict, even when other mods define the same address.
    pub allow_duplicate: bool,
    /// Text placed between this unit and the next when spliced back into a file.
    pub code_separator: String,
    /// Wrapping tag for units that live inside a parent block, e.g. `bitmapfonts`.
    pub code_tag: String,
    pub dependencies: Vec<String>,
    /// Names of variable definitions declared alongside this unit.
    pub variables: Vec<String>,
    additional_file_names: Vec<String>,
    generated_file_names: Vec<String>,
    overwritten_file_names: Vec<String>,
    pub tags: Vec<String>,
    pub error: Option<ParseError>,
    pub used_parser: String,
}

impl From<StoredDefinition> for Definition {
    fn from(stored: StoredDefinition) -> Self {
        let content = Content::new(stored.content.parts, &stored.identity.type_and_id);
        Self {
            identity: stored.identity,
            content,
            mod_name: stored.mod_name,
            original_mod_name: stored.original_mod_name,
            mod_path: stored.mod_path,
            order: stored.order,
            is_from_game: stored.is_from_game,
            is_custom_patch: stored.is_custom_patch,
            allow_duplicate: stored.allow_duplicate,
            code_separator: stored.code_separator,
            code_tag: stored.code_tag,
            dependencies: stored.dependencies,
            variables: stored.variables,
            additional_file_names: stored.additional_file_names,
            generated_file_names: stored.generated_file_names,
            overwritten_file_names: stored.overwritten_file_names,
            tags: stored.tags,
            error: stored.error,
            used_parser: stored.used_parser,
        }
    }
}

impl From<Definition> for StoredDefinition {
    fn from(definition: Definition) -> Self {
        Self {
            identity: definition.identity,
            content: definition.content,
            mod_name: definition.mod_name,
            original_mod_name: definition.original_mod_name,
            mod_path: definition.mod_path,
            order: definition.order,
            is_from_game: definition.is_from_game,
            is_custom_patch: definition.is_custom_patch,
            allow_duplicate: definition.allow_duplicate,
            code_separator: definition.code_separator,
            code_tag: definition.code_tag,
            dependencies: definition.dependencies,
            variables: definition.variables,
            additional_file_names: definition.additional_file_names,
            generated_file_names: definition.generated_file_names,
            overwritten_file_names: definition.overwritten_file_names,
            tags: definition.tags,
            error: definition.error,
            used_parser: definition.used_parser,
        }
    }
}

impl Definition {
    /// Start building a definition for `type_name`/`id` found in `file`.
    pub fn builder(
        type_name: impl Into<String>,
        id: impl Into<String>,
        file: impl AsRef<str>,
    ) -> DefinitionBuilder {
        DefinitionBuilder::new(type_name, id, file)
    }

    pub fn id(&self) -> &str {
        &self.identity.parts.id
    }

    pub fn type_name(&self) -> &str {
        &self.identity.parts.type_name
    }

    /// `"{type}-{id}"`.
    pub fn type_and_id(&self) -> &str {
        &self.identity.type_and_id
    }

    pub fn file(&self) -> &str {
        &self.identity.parts.file
    }

    pub fn file_ci(&self) -> &str {
        &self.identity.file_ci
    }

    pub fn disk_file(&self) -> &str {
        &self.identity.parts.disk_file
    }

    pub fn disk_file_ci(&self) -> &str {
        &self.identity.disk_file_ci
    }

    pub fn parent_directory(&self) -> &str {
        &self.identity.parent_directory
    }

    pub fn parent_directory_ci(&self) -> &str {
        &self.identity.parent_directory_ci
    }

    pub fn virtual_path(&self) -> Option<&str> {
        self.identity.parts.virtual_path.as_deref()
    }

    /// Directory used for display grouping: the virtual path's parent when set,
    /// otherwise the real parent directory.
    pub fn display_directory(&self) -> &str {
        self.identity
            .virtual_parent_directory
            .as_deref()
            .unwrap_or(&self.identity.parent_directory)
    }

    pub fn value_type(&self) -> ValueType {
        self.content.parts.value_type
    }

    /// Stored code: tabs expanded, lines trimmed, blank lines removed.
    pub fn code(&self) -> &str {
        &self.content.parts.code
    }

    /// Code exactly as it appeared in the source file.
    pub fn original_code(&self) -> &str {
        &self.content.parts.original_code
    }

    /// Hash of the canonical content (raw bytes for binaries).
    pub fn content_sha(&self) -> &str {
        &self.content.content_sha
    }

    /// Hash of the address plus canonical content. Equal hashes mean the same unit
    /// with the same meaning.
    pub fn definition_sha(&self) -> &str {
        &self.content.definition_sha
    }

    pub fn additional_file_names(&self) -> &[String] {
        &self.additional_file_names
    }

    pub fn generated_file_names(&self) -> &[String] {
        &self.generated_file_names
    }

    pub fn overwritten_file_names(&self) -> &[String] {
        &self.overwritten_file_names
    }

    /// Logical address used for conflict grouping.
    pub fn address(&self) -> Address {
        match self.value_type().address_kind() {
            AddressKind::TypeAndId => Address {
                kind: AddressKind::TypeAndId,
                key: self.identity.type_and_id.clone(),
            },
            AddressKind::File => Address {
                kind: AddressKind::File,
                key: self.identity.file_ci.clone(),
            },
        }
    }

    /// Path-like form of the address, as matched by ignore rules.
    ///
    /// `common/buildings/building_foo` for objects, the file path for whole files.
    pub fn address_path(&self) -> String {
        match self.value_type().address_kind() {
            AddressKind::TypeAndId if self.type_name().is_empty() => self.id().to_string(),
            AddressKind::TypeAndId => format!("{}/{}", self.type_name(), self.id()),
            AddressKind::File => self.file().to_string(),
        }
    }

    /// `true` when the definition was produced from a unit that failed to tokenize.
    pub fn is_invalid(&self) -> bool {
        self.value_type() == ValueType::Invalid
    }
}

/// Builder for [`Definition`].
///
/// All derived fields are computed in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    identity: IdentityParts,
    value_type: ValueType,
    code: String,
    raw_sha: Option<String>,
    mod_name: String,
    original_mod_name: Option<String>,
    mod_path: String,
    order: usize,
    is_from_game: bool,
    is_custom_patch: bool,
    allow_duplicate: bool,
    code_separator: String,
    code_tag: String,
    dependencies: Vec<String>,
    variables: Vec<String>,
    additional_file_names: Vec<String>,
    generated_file_names: Vec<String>,
    overwritten_file_names: Vec<String>,
    tags: Vec<String>,
    error: Option<ParseError>,
    used_parser: String,
}

impl DefinitionBuilder {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>, file: impl AsRef<str>) -> Self {
        let file = normalize_path(file.as_ref());
        Self {
            identity: IdentityParts {
                id: id.into(),
                type_name: normalize_path(&type_name.into()),
                disk_file: file.clone(),
                file,
                virtual_path: None,
            },
            value_type: ValueType::Object,
            code: String::new(),
            raw_sha: None,
            mod_name: String::new(),
            original_mod_name: None,
            mod_path: String::new(),
            order: 0,
            is_from_game: false,
            is_custom_patch: false,
            allow_duplicate: false,
            code_separator: String::new(),
            code_tag: String::new(),
            dependencies: Vec::new(),
            variables: Vec::new(),
            additional_file_names: Vec::new(),
            generated_file_names: Vec::new(),
            overwritten_file_names: Vec::new(),
            tags: Vec::new(),
            error: None,
            used_parser: String::new(),
        }
    }

    /// Copy provenance (mod, path, order, dependencies) from a [`ModFile`].
    pub fn provenance(mut self, file: &ModFile) -> Self {
        self.mod_name = file.mod_name.clone();
        self.mod_path = file.mod_path.clone();
        self.order = file.order;
        self.dependencies = file.dependencies.clone();
        self.is_from_game = file.is_from_game;
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Hash raw bytes for [`ValueType::Binary`] definitions.
    pub fn raw_bytes(mut self, bytes: &[u8]) -> Self {
        self.raw_sha = Some(sha256_hex(bytes));
        self
    }

    pub fn disk_file(mut self, disk_file: impl AsRef<str>) -> Self {
        self.identity.disk_file = normalize_path(disk_file.as_ref());
        self
    }

    pub fn virtual_path(mut self, virtual_path: impl AsRef<str>) -> Self {
        self.identity.virtual_path = Some(normalize_path(virtual_path.as_ref()));
        self
    }

    pub fn mod_name(mut self, mod_name: impl Into<String>) -> Self {
        self.mod_name = mod_name.into();
        self
    }

    pub fn original_mod_name(mut self, name: impl Into<String>) -> Self {
        self.original_mod_name = Some(name.into());
        self
    }

    pub fn mod_path(mut self, mod_path: impl Into<String>) -> Self {
        self.mod_path = mod_path.into();
        self
    }

    pub fn order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn from_game(mut self, is_from_game: bool) -> Self {
        self.is_from_game = is_from_game;
        self
    }

    pub fn custom_patch(mut self, is_custom_patch: bool) -> Self {
        self.is_custom_patch = is_custom_patch;
        self
    }

    pub fn allow_duplicate(mut self, allow_duplicate: bool) -> Self {
        self.allow_duplicate = allow_duplicate;
        self
    }

    pub fn code_separator(mut self, separator: impl Into<String>) -> Self {
        self.code_separator = separator.into();
        self
    }

    pub fn code_tag(mut self, tag: impl Into<String>) -> Self {
        self.code_tag = tag.into();
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn variables(mut self, variables: Vec<String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn additional_file_name(mut self, name: impl AsRef<str>) -> Self {
        self.additional_file_names.push(normalize_path(name.as_ref()));
        self
    }

    pub fn generated_file_name(mut self, name: impl AsRef<str>) -> Self {
        self.generated_file_names.push(normalize_path(name.as_ref()));
        self
    }

    pub fn overwritten_file_name(mut self, name: impl AsRef<str>) -> Self {
        self.overwritten_file_names.push(normalize_path(name.as_ref()));
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn error(mut self, error: ParseError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn used_parser(mut self, parser: impl Into<String>) -> Self {
        self.used_parser = parser.into();
        self
    }

    pub fn build(self) -> Definition {
        let identity = Identity::from(self.identity);
        let file = identity.parts.file.clone();
        let original_code = self.code;
        let content = Content::new(
            ContentParts {
                value_type: self.value_type,
                code: normalize_code(&original_code),
                original_code,
                raw_sha: self.raw_sha,
            },
            &identity.type_and_id,
        );

        let with_file = |mut names: Vec<String>| {
            if !names.contains(&file) {
                names.insert(0, file.clone());
            }
            names
        };

        Definition {
            content,
            original_mod_name: self
                .original_mod_name
                .unwrap_or_else(|| self.mod_name.clone()),
            mod_name: self.mod_name,
            mod_path: self.mod_path,
            order: self.order,
            is_from_game: self.is_from_game,
            is_custom_patch: self.is_custom_patch,
            allow_duplicate: self.allow_duplicate,
            code_separator: self.code_separator,
            code_tag: self.code_tag,
            dependencies: self.dependencies,
            variables: self.variables,
            additional_file_names: with_file(self.additional_file_names),
            generated_file_names: with_file(self.generated_file_names),
            overwritten_file_names: with_file(self.overwritten_file_names),
            tags: self.tags,
            error: self.error,
            used_parser: self.used_parser,
            identity,
        }
    }
}
