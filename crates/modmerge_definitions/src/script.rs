//! Script value trees and the tokenizer seam.
//!
//! Definition construction consumes a tree of [`ScriptElement`]s rather than raw
//! text. Any grammar can be plugged in through [`ScriptTokenizer`]. The bundled
//! [`ShallowTokenizer`] understands the common `key op value` / `{ ... }` shape of
//! Clausewitz-style scripts: quoted strings, `#` comments and nested blocks. It
//! does not validate anything beyond balanced braces and terminated strings.

use std::fmt;

/// Value on the right of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    /// A bare token or quoted string (quotes kept).
    Scalar(String),
    /// A `{ ... }` block.
    Block(Vec<ScriptElement>),
    /// Bare list entries (`{ a b c }`) and stray keys carry no value.
    None,
}

/// One statement of a script file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptElement {
    /// Left-hand token. Empty for anonymous blocks.
    pub key: String,
    /// `=`, `==`, `<`, `<=`, `>`, `>=`, `!=`, or empty for bare entries.
    pub operator: String,
    pub value: ScriptValue,
    /// 1-based line the statement starts on.
    pub line: usize,
    /// Source text of the whole statement.
    pub code: String,
}

impl ScriptElement {
    /// Scalar value with surrounding quotes removed.
    pub fn scalar(&self) -> Option<&str> {
        match &self.value {
            ScriptValue::Scalar(s) => Some(s.trim_matches('"')),
            ScriptValue::Block(_) | ScriptValue::None => None,
        }
    }

    /// Children of a block value.
    pub fn children(&self) -> &[ScriptElement] {
        match &self.value {
            ScriptValue::Block(children) => children,
            ScriptValue::Scalar(_) | ScriptValue::None => &[],
        }
    }
}

/// Failure to tokenize a unit. Position is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizeError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}, column {}", self.message, self.line, self.column)
    }
}

impl std::error::Error for TokenizeError {}

/// Turns script text into a value tree.
///
/// Implementations must be shareable across the parsing worker pool.
pub trait ScriptTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<ScriptElement>, TokenizeError>;
}

/// Minimal tokenizer for `key op value` scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowTokenizer;

impl ScriptTokenizer for ShallowTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<ScriptElement>, TokenizeError> {
        let tokens = lex(text)?;
        let mut parser = Parser {
            text,
            tokens,
            pos: 0,
        };
        parser.statements(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Operator(String),
    Open,
    Close,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    line: usize,
    column: usize,
}

fn is_word_break(c: char) -> bool {
    c.is_whitespace() || matches!(c, '{' | '}' | '=' | '<' | '>' | '#' | '"')
}

fn lex(text: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut line = 1;
    let mut line_start = 0;

    while let Some(&(idx, c)) = chars.peek() {
        let column = text[line_start..idx].chars().count() + 1;

        if c == '\n' {
            chars.next();
            line += 1;
            line_start = idx + 1;
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '#' {
            while let Some(&(_, c)) = chars.peek() {
                if c == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }

        let start = idx;
        let (kind, start_line) = match c {
            '{' => {
                chars.next();
                (TokenKind::Open, line)
            }
            '}' => {
                chars.next();
                (TokenKind::Close, line)
            }
            '=' | '<' | '>' | '!' if c != '!' || text[idx + 1..].starts_with('=') => {
                chars.next();
                let mut op = c.to_string();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    op.push('=');
                }
                (TokenKind::Operator(op), line)
            }
            '"' => {
                let start_line = line;
                chars.next();
                let mut escaped = false;
                let mut closed = false;
                for (i, c) in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        line_start = i + 1;
                    }
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(TokenizeError {
                        message: "unterminated string".to_string(),
                        line: start_line,
                        column,
                    });
                }
                (TokenKind::Word(String::new()), start_line)
            }
            _ => {
                while let Some(&(i, c)) = chars.peek() {
                    let starts_not_equal = c == '!' && text[i + 1..].starts_with('=');
                    if is_word_break(c) || starts_not_equal {
                        break;
                    }
                    chars.next();
                }
                (TokenKind::Word(String::new()), line)
            }
        };

        let end = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
        let kind = match kind {
            TokenKind::Word(_) => TokenKind::Word(text[start..end].to_string()),
            other => other,
        };
        tokens.push(Token {
            kind,
            start,
            end,
            line: start_line,
            column,
        });
    }

    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error_at(&self, token: Option<&Token>, message: &str) -> TokenizeError {
        let (line, column) = match token.or_else(|| self.tokens.last()) {
            Some(t) => (t.line, t.column),
            None => (1, 1),
        };
        TokenizeError {
            message: message.to_string(),
            line,
            column,
        }
    }

    fn statements(&mut self, nested: bool) -> Result<Vec<ScriptElement>, TokenizeError> {
        let mut elements = Vec::new();

        loop {
            let Some(token) = self.tokens.get(self.pos).cloned() else {
                if nested {
                    return Err(self.error_at(None, "missing closing '}'"));
                }
                return Ok(elements);
            };

            match token.kind.clone() {
                TokenKind::Close if nested => {
                    self.pos += 1;
                    return Ok(elements);
                }
                TokenKind::Close => return Err(self.error_at(Some(&token), "unexpected '}'")),
                TokenKind::Operator(_) => {
                    return Err(self.error_at(Some(&token), "operator without key"))
                }
                TokenKind::Open => {
                    self.pos += 1;
                    let children = self.statements(true)?;
                    elements.push(self.element(
                        &token,
                        String::new(),
                        String::new(),
                        ScriptValue::Block(children),
                    ));
                }
                TokenKind::Word(key) => {
                    self.pos += 1;
                    let next = self.tokens.get(self.pos).map(|t| t.kind.clone());
                    let Some(TokenKind::Operator(op)) = next else {
                        elements.push(self.element(&token, key, String::new(), ScriptValue::None));
                        continue;
                    };
                    self.pos += 1;

                    let value_token = self.tokens.get(self.pos).cloned();
                    let value = match value_token.as_ref().map(|t| &t.kind) {
                        Some(TokenKind::Word(word)) => {
                            self.pos += 1;
                            ScriptValue::Scalar(word.clone())
                        }
                        Some(TokenKind::Open) => {
                            self.pos += 1;
                            ScriptValue::Block(self.statements(true)?)
                        }
                        _ => {
                            return Err(self.error_at(
                                value_token.as_ref(),
                                &format!("missing value after '{}'", op),
                            ))
                        }
                    };
                    elements.push(self.element(&token, key, op, value));
                }
            }
        }
    }

    /// Build an element spanning from `first` to the last consumed token.
    fn element(
        &self,
        first: &Token,
        key: String,
        operator: String,
        value: ScriptValue,
    ) -> ScriptElement {
        let end = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.end)
            .unwrap_or(first.end);
        ScriptElement {
            key,
            operator,
            value,
            line: first.line,
            code: self.text[first.start..end].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(text: &str) -> Result<Vec<ScriptElement>, TokenizeError> {
        ShallowTokenizer.tokenize(text)
    }

    #[test]
    fn test_top_level_statements() {
        let elements = tokenize("namespace = test\n@cost = 10\nfoo = {\n  bar = 1\n}\n").unwrap();
        assert_eq!(elements.len(), 3);

        assert_eq!(elements[0].key, "namespace");
        assert_eq!(elements[0].scalar(), Some("test"));
        assert_eq!(elements[1].key, "@cost");
        assert_eq!(elements[1].line, 2);

        assert_eq!(elements[2].key, "foo");
        assert_eq!(elements[2].line, 3);
        assert_eq!(elements[2].code, "foo = {\n  bar = 1\n}");
        assert_eq!(elements[2].children().len(), 1);
        assert_eq!(elements[2].children()[0].scalar(), Some("1"));
    }

    #[test]
    fn test_comments_and_quotes() {
        let elements = tokenize("# header\nname = \"A # B\" # trailing\n").unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].scalar(), Some("A # B"));
        assert_eq!(elements[0].code, "name = \"A # B\"");
    }

    #[test]
    fn test_comparison_operators() {
        let elements = tokenize("limit = { size >= 3 count != 2 age < 5 }").unwrap();
        let ops: Vec<&str> = elements[0]
            .children()
            .iter()
            .map(|e| e.operator.as_str())
            .collect();
        assert_eq!(ops, [">=", "!=", "<"]);
    }

    #[test]
    fn test_bare_list_entries() {
        let elements = tokenize("dependencies = { \"Mod A\" \"Mod B\" }").unwrap();
        let names: Vec<&str> = elements[0]
            .children()
            .iter()
            .map(|e| e.key.trim_matches('"'))
            .collect();
        assert_eq!(names, ["Mod A", "Mod B"]);
        assert_eq!(elements[0].children()[0].value, ScriptValue::None);
    }

    #[test]
    fn test_missing_closing_brace() {
        let err = tokenize("foo = {\n  bar = 1\n").unwrap_err();
        assert_eq!(err.message, "missing closing '}'");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unexpected_closing_brace() {
        let err = tokenize("foo = 1\n}\n").unwrap_err();
        assert_eq!(err.message, "unexpected '}'");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("a = 1\nname = \"oops\n").unwrap_err();
        assert_eq!(err.message, "unterminated string");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 8);
    }

    #[test]
    fn test_missing_value() {
        let err = tokenize("foo =").unwrap_err();
        assert_eq!(err.message, "missing value after '='");
    }
}
