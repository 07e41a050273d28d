//! Script definitions for moddable strategy games.
//!
//! A [`Definition`] is one addressable unit of mod content: a scripted object, a
//! namespace or variable declaration, a whole text file or a binary blob. This crate
//! turns raw files into definitions and indexes them for lookup:
//!
//! - **Canonical hashing**: content hashes ignore formatting and comments, so two
//!   mods that ship the same object with different indentation do not conflict
//! - **Parsing**: [`DefinitionParser`] classifies the output of a [`ScriptTokenizer`]
//!   into definitions and captures parse errors on the definition itself
//! - **Indexing**: [`IndexedDefinitions`] answers lookups by file, type, type+id,
//!   parent directory and value type, backed by memory or a disk-resident store
//! - **Display tree**: [`HierarchicalDefinitions`] groups an index by directory
//!
//! # Example
//!
//! ```
//! use modmerge_definitions::{
//!     DefinitionParser, IndexedDefinitions, ModFile, ParserOptions, ShallowTokenizer,
//! };
//!
//! let tokenizer = ShallowTokenizer;
//! let options = ParserOptions::default();
//! let parser = DefinitionParser::new(&tokenizer, &options);
//!
//! let file = ModFile::new("My Mod", "/mods/my_mod", "common/buildings/my_buildings.txt", 0);
//! let definitions = parser.parse_file(&file, b"building_foo = { cost = 10 }");
//!
//! let index = IndexedDefinitions::in_memory(definitions);
//! assert_eq!(index.get_by_type_id("common/buildings", "building_foo").len(), 1);
//! ```

pub mod canonical;
pub mod definition;
pub mod error;
pub mod hierarchical;
pub mod indexed;
pub mod parser;
pub mod script;
pub mod store;
pub mod value_type;

pub use definition::{Address, Definition, DefinitionBuilder, ModFile, ParseError};
pub use error::{Error, Result};
pub use hierarchical::{HierarchicalDefinitions, HierarchyBuilder};
pub use indexed::{IndexedDefinitions, SharedIndex};
pub use parser::{DefinitionParser, ParserOptions};
pub use script::{ScriptElement, ScriptTokenizer, ScriptValue, ShallowTokenizer, TokenizeError};
pub use store::{DefinitionStore, DiskStore, MemoryStore, StoreKind};
pub use value_type::{AddressKind, MergeTier, ValueType};
