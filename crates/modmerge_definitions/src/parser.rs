//! Turning one mod file into definitions.
//!
//! Classification rules, applied in order:
//!
//! 1. Extensions not listed in [`ParserOptions::text_extensions`] are
//!    [`Binary`](ValueType::Binary) and hashed over their raw bytes.
//! 2. Text with no canonical content is [`EmptyFile`](ValueType::EmptyFile).
//! 3. Files in a whole-file directory (or at the mod root) are
//!    [`WholeTextFile`](ValueType::WholeTextFile).
//! 4. Everything else is tokenized and each top-level statement becomes one
//!    definition: `namespace = x` a [`Namespace`](ValueType::Namespace), `@name = v`
//!    a [`Variable`](ValueType::Variable), anything else an
//!    [`Object`](ValueType::Object). A block with an inner `id = x` is identified by
//!    `x` (events), otherwise by its key.
//!
//! A file that fails to tokenize yields a single [`Invalid`](ValueType::Invalid)
//! definition carrying the error position. It never aborts the rest of the mod.

use crate::canonical::canonicalize;
use crate::definition::{parent_directory, Definition, ModFile, ParseError};
use crate::script::{ScriptElement, ScriptTokenizer};
use crate::value_type::ValueType;
use serde::{Deserialize, Serialize};

/// Directory and extension rules used for classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserOptions {
    /// Directories whose files are only ever replaced as a whole.
    pub whole_file_directories: Vec<String>,
    /// Lowercase extensions (without dot) treated as text.
    pub text_extensions: Vec<String>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            whole_file_directories: strings(&[
                "localisation",
                "localisation_synced",
                "interface",
                "gfx",
                "fonts",
                "map",
                "music",
                "sound",
            ]),
            text_extensions: strings(&[
                "txt", "yml", "gui", "gfx", "asset", "lua", "csv", "mod", "shader", "fxh",
                "sfx", "settings", "json",
            ]),
        }
    }
}

impl ParserOptions {
    fn is_text(&self, extension: &str) -> bool {
        self.text_extensions.iter().any(|e| e == extension)
    }

    fn is_whole_file_directory(&self, parent_ci: &str) -> bool {
        parent_ci.is_empty()
            || self.whole_file_directories.iter().any(|dir| {
                let dir = dir.to_lowercase();
                parent_ci == dir || parent_ci.starts_with(&format!("{}/", dir))
            })
    }
}

/// Classifies files into definitions using a [`ScriptTokenizer`].
pub struct DefinitionParser<'a> {
    tokenizer: &'a dyn ScriptTokenizer,
    options: &'a ParserOptions,
}

impl<'a> DefinitionParser<'a> {
    pub fn new(tokenizer: &'a dyn ScriptTokenizer, options: &'a ParserOptions) -> Self {
        Self { tokenizer, options }
    }

    /// Parse `bytes` read from `file`.
    pub fn parse_file(&self, file: &ModFile, bytes: &[u8]) -> Vec<Definition> {
        let path = file.file.as_str();
        let parent = parent_directory(path);
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        if !self.options.is_text(&extension) {
            return vec![Definition::builder(parent, file_name, path)
                .provenance(file)
                .value_type(ValueType::Binary)
                .raw_bytes(bytes)
                .used_parser("binary")
                .build()];
        }

        let text = String::from_utf8_lossy(bytes);
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

        if canonicalize(text).is_empty() {
            return vec![Definition::builder(parent, file_name, path)
                .provenance(file)
                .value_type(ValueType::EmptyFile)
                .code(text)
                .used_parser("empty")
                .build()];
        }

        if self.options.is_whole_file_directory(&parent.to_lowercase()) {
            return vec![Definition::builder(parent, file_name, path)
                .provenance(file)
                .value_type(ValueType::WholeTextFile)
                .code(text)
                .used_parser("whole-text")
                .build()];
        }

        match self.tokenizer.tokenize(text) {
            Ok(elements) => self.script_definitions(file, parent, file_name, &elements),
            Err(e) => {
                tracing::debug!("Failed to tokenize {} in {}: {}", path, file.mod_name, e);
                vec![Definition::builder(parent, file_name, path)
                    .provenance(file)
                    .value_type(ValueType::Invalid)
                    .code(text)
                    .error(ParseError {
                        message: e.message,
                        line: e.line,
                        column: e.column,
                    })
                    .used_parser("script")
                    .build()]
            }
        }
    }

    fn script_definitions(
        &self,
        file: &ModFile,
        parent: &str,
        file_name: &str,
        elements: &[ScriptElement],
    ) -> Vec<Definition> {
        let variables: Vec<String> = elements
            .iter()
            .filter(|e| e.key.starts_with('@'))
            .map(|e| e.key.clone())
            .collect();

        elements
            .iter()
            .enumerate()
            .map(|(idx, element)| {
                let (value_type, id) = classify(element, file_name, idx);
                let mut builder = Definition::builder(parent, id.clone(), &file.file)
                    .provenance(file)
                    .value_type(value_type)
                    .code(&element.code)
                    .code_separator("\n")
                    .used_parser("script");
                if value_type == ValueType::Object {
                    builder = builder
                        .variables(variables.clone())
                        .tags(vec![id, element.key.clone()]);
                }
                builder.build()
            })
            .collect()
    }
}

fn classify(element: &ScriptElement, file_name: &str, idx: usize) -> (ValueType, String) {
    if element.key.eq_ignore_ascii_case("namespace") {
        if let Some(name) = element.scalar() {
            return (ValueType::Namespace, name.to_string());
        }
    }
    if element.key.starts_with('@') {
        return (ValueType::Variable, element.key.clone());
    }

    let inner_id = element
        .children()
        .iter()
        .find(|child| child.key.eq_ignore_ascii_case("id"))
        .and_then(|child| child.scalar());
    if let Some(id) = inner_id {
        return (ValueType::Object, id.to_string());
    }

    if element.key.is_empty() {
        return (ValueType::Object, format!("{}-{}", file_name, idx));
    }
    (ValueType::Object, element.key.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ShallowTokenizer;

    fn parse(path: &str, content: &str) -> Vec<Definition> {
        let options = ParserOptions::default();
        let parser = DefinitionParser::new(&ShallowTokenizer, &options);
        let file = ModFile::new("Mod A", "/mods/a", path, 3)
            .with_dependencies(vec!["Base Mod".to_string()]);
        parser.parse_file(&file, content.as_bytes())
    }

    #[test]
    fn test_objects_namespaces_variables() {
        let defs = parse(
            "events/my_events.txt",
            "namespace = my\n@delay = 10\ncountry_event = {\n\tid = my.1\n}\nplain = { a = 1 }\n",
        );
        assert_eq!(defs.len(), 4);

        assert_eq!(defs[0].value_type(), ValueType::Namespace);
        assert_eq!(defs[0].id(), "my");
        assert_eq!(defs[1].value_type(), ValueType::Variable);
        assert_eq!(defs[1].id(), "@delay");

        assert_eq!(defs[2].value_type(), ValueType::Object);
        assert_eq!(defs[2].id(), "my.1");
        assert_eq!(defs[2].type_name(), "events");
        assert_eq!(defs[2].type_and_id(), "events-my.1");
        assert_eq!(defs[2].code(), "country_event = {\nid = my.1\n}");
        assert_eq!(defs[2].variables, ["@delay"]);

        assert_eq!(defs[3].id(), "plain");
        assert!(defs.iter().all(|d| d.mod_name == "Mod A" && d.order == 3));
        assert_eq!(defs[3].dependencies, ["Base Mod"]);
    }

    #[test]
    fn test_whole_file_directory() {
        let defs = parse("localisation/english/l_english.yml", "\u{feff}l_english:\n key:0 \"Value\"\n");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].value_type(), ValueType::WholeTextFile);
        assert_eq!(defs[0].id(), "l_english.yml");
        assert_eq!(defs[0].type_name(), "localisation/english");
        assert!(!defs[0].code().starts_with('\u{feff}'));
    }

    #[test]
    fn test_binary_file() {
        let defs = parse("gfx/interface/icon.dds", "DDS \x00\x01");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].value_type(), ValueType::Binary);
        assert_eq!(defs[0].content_sha(), defs[0].definition_sha());
    }

    #[test]
    fn test_empty_file() {
        let defs = parse("common/buildings/empty.txt", "# nothing here\n\n");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].value_type(), ValueType::EmptyFile);
    }

    #[test]
    fn test_invalid_file_captures_error() {
        let defs = parse("common/buildings/broken.txt", "a = { b = 1\n");
        assert_eq!(defs.len(), 1);
        assert!(defs[0].is_invalid());
        let error = defs[0].error.as_ref().unwrap();
        assert_eq!(error.message, "missing closing '}'");
        assert_eq!(error.line, 1);
        assert_eq!(defs[0].id(), "broken.txt");
    }
}
