//! Code normalization and content hashing.
//!
//! Two forms of normalization are applied to script text:
//!
//! - [`normalize_code`] produces the *stored* code: tabs expanded, every line
//!   trimmed, blank lines dropped. This is what gets concatenated on merge.
//! - [`canonicalize`] produces the *hashed* form. On top of the above it removes
//!   `#` comments outside quoted strings, collapses all whitespace runs (including
//!   newlines) to one space, and removes the spaces next to `=`, `{` and `}`.
//!
//! The canonical form is a contract: formatting-only and comment-only edits hash
//! identically, while reordered keys or changed values do not.

use sha2::{Digest, Sha256};

const TAB_WIDTH: usize = 4;

/// Normalize script text for storage on a definition.
///
/// ```
/// use modmerge_definitions::canonical::normalize_code;
///
/// assert_eq!(normalize_code("a = {\n\n\tb = 1\n}\n"), "a = {\nb = 1\n}");
/// ```
pub fn normalize_code(code: &str) -> String {
    let tab = " ".repeat(TAB_WIDTH);
    code.lines()
        .map(|line| line.replace('\t', &tab))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_structural(c: char) -> bool {
    matches!(c, '=' | '{' | '}')
}

/// Produce the canonical form of script text used for hashing.
///
/// ```
/// use modmerge_definitions::canonical::canonicalize;
///
/// let a = canonicalize("foo = {\n    bar = 1 # comment\n}");
/// let b = canonicalize("foo={bar=1}");
/// assert_eq!(a, b);
/// assert_eq!(a, "foo={bar=1}");
/// ```
pub fn canonicalize(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut in_quote = false;
    let mut escaped = false;
    let mut in_comment = false;
    let mut pending_space = false;

    for c in code.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                pending_space = true;
            }
            continue;
        }

        if in_quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quote = false;
            }
            continue;
        }

        if c == '#' {
            in_comment = true;
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space {
            let after_structural = out.ends_with(is_structural);
            if !out.is_empty() && !after_structural && !is_structural(c) {
                out.push(' ');
            }
            pending_space = false;
        }

        if c == '"' {
            in_quote = true;
        }
        out.push(c);
    }

    out
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash of the canonical form of `code`.
pub fn text_sha(code: &str) -> String {
    sha256_hex(canonicalize(code).as_bytes())
}

/// Hash binding a canonical body to its address, so identical bodies under two
/// different `type_and_id` keys never compare equal.
pub fn address_sha(type_and_id: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(type_and_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonicalize(code).as_bytes());
    hex::encode(hasher.finalize())
}
