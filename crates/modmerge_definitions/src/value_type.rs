//! The closed set of definition kinds.
//!
//! Every decision that depends on what a definition *is* (how it is hashed, how
//! it is addressed, which merge tier it lands in) is an exhaustive `match` on
//! [`ValueType`] so that a new kind cannot be added without visiting each of them.

use serde::{Deserialize, Serialize};

/// Kind of content a [`Definition`](crate::Definition) holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    /// A top-level scripted object, e.g. `building_foo = { ... }`.
    Object,
    /// A `namespace = name` declaration.
    Namespace,
    /// A scripted variable, e.g. `@cost = 10`.
    Variable,
    /// A text file that is only ever replaced as a whole (localisation, GUI layouts).
    WholeTextFile,
    /// A non-text file. Hashed over its raw bytes and never merged.
    Binary,
    /// A text file with no content once comments and whitespace are removed.
    EmptyFile,
    /// A unit that failed to tokenize. Carries the error on the definition.
    Invalid,
}

/// How two definitions are decided to occupy the same logical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressKind {
    /// Same `type` and `id`, regardless of which file they came from.
    TypeAndId,
    /// Same logical file path (case-insensitive).
    File,
}

/// Output tier used when concatenating a merge group.
///
/// Declarations must precede their use in the script grammar, so tiers are
/// emitted in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MergeTier {
    Namespace,
    Variable,
    Body,
}

impl ValueType {
    /// Addressing rule for this kind.
    pub fn address_kind(self) -> AddressKind {
        match self {
            ValueType::Object | ValueType::Namespace | ValueType::Variable | ValueType::Invalid => {
                AddressKind::TypeAndId
            }
            ValueType::WholeTextFile | ValueType::Binary | ValueType::EmptyFile => {
                AddressKind::File
            }
        }
    }

    /// Merge tier this kind is emitted in.
    pub fn merge_tier(self) -> MergeTier {
        match self {
            ValueType::Namespace => MergeTier::Namespace,
            ValueType::Variable => MergeTier::Variable,
            ValueType::Object
            | ValueType::WholeTextFile
            | ValueType::Binary
            | ValueType::EmptyFile
            | ValueType::Invalid => MergeTier::Body,
        }
    }

    /// `true` for namespace and variable declarations, which may be mixed into any
    /// merge group regardless of its type.
    pub fn is_declaration(self) -> bool {
        match self.merge_tier() {
            MergeTier::Namespace | MergeTier::Variable => true,
            MergeTier::Body => false,
        }
    }

    /// `true` if the content hash is computed over raw bytes instead of canonical text.
    pub fn hashes_raw_bytes(self) -> bool {
        match self {
            ValueType::Binary => true,
            ValueType::Object
            | ValueType::Namespace
            | ValueType::Variable
            | ValueType::WholeTextFile
            | ValueType::EmptyFile
            | ValueType::Invalid => false,
        }
    }

    /// `true` if definitions of this kind can be combined into one output file.
    pub fn is_mergeable(self) -> bool {
        match self {
            ValueType::Object
            | ValueType::Namespace
            | ValueType::Variable
            | ValueType::WholeTextFile => true,
            ValueType::Binary | ValueType::EmptyFile | ValueType::Invalid => false,
        }
    }

    /// `true` if conflict detection considers this kind at all.
    pub fn participates_in_conflicts(self) -> bool {
        match self {
            ValueType::Invalid => false,
            ValueType::Object
            | ValueType::Namespace
            | ValueType::Variable
            | ValueType::WholeTextFile
            | ValueType::Binary
            | ValueType::EmptyFile => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_kinds() {
        assert_eq!(ValueType::Object.address_kind(), AddressKind::TypeAndId);
        assert_eq!(ValueType::Variable.address_kind(), AddressKind::TypeAndId);
        assert_eq!(ValueType::WholeTextFile.address_kind(), AddressKind::File);
        assert_eq!(ValueType::Binary.address_kind(), AddressKind::File);
        assert_eq!(ValueType::EmptyFile.address_kind(), AddressKind::File);
    }

    #[test]
    fn test_merge_tiers_are_ordered() {
        assert!(MergeTier::Namespace < MergeTier::Variable);
        assert!(MergeTier::Variable < MergeTier::Body);
        assert_eq!(ValueType::Object.merge_tier(), MergeTier::Body);
    }

    #[test]
    fn test_declarations() {
        assert!(ValueType::Namespace.is_declaration());
        assert!(ValueType::Variable.is_declaration());
        assert!(!ValueType::Object.is_declaration());
    }

    #[test]
    fn test_serialization_format() {
        let json = serde_json::to_string(&ValueType::WholeTextFile).unwrap();
        assert_eq!(json, "\"wholeTextFile\"");
    }
}
