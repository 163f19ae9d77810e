//! Tokenizer for the format-string DSL.
//!
//! A format string describes the wire layout of one message:
//!
//! - **Fixed text**: any bytes outside placeholders and sections, matched verbatim.
//! - **Field placeholder**: `{name}` or `{name:hint}`. The hint is kept on the token but not
//!   interpreted.
//! - **Optional section**: `[prefix{name}suffix]`. The body holds exactly one placeholder;
//!   brackets nest so the prefix and suffix may contain `[` / `]` of their own.
//! - **Escapes**: `\{`, `\}`, `\[`, `\]` and `\\` produce the literal character. A backslash
//!   before any other character is literal text.
//!
//! The scan is a single left-to-right pass. Token spans always partition the source: joining
//! every [`Token::raw_text`] in order gives back the original string.

use std::fmt;
use std::str::FromStr;

/// Structural error in a format string. Positions are byte offsets into the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unclosed placeholder starting at byte {position}")]
    UnclosedPlaceholder { position: usize },
    #[error("empty placeholder at byte {position}")]
    EmptyPlaceholder { position: usize },
    #[error("invalid field name `{name}` at byte {position}")]
    InvalidFieldName { name: String, position: usize },
    #[error("unmatched `{token}` at byte {position}")]
    UnmatchedClosingToken { token: char, position: usize },
    #[error("unclosed optional section starting at byte {position}")]
    UnclosedOptionalSection { position: usize },
    #[error("optional section at byte {position} has no field placeholder")]
    MissingFieldInOptional { position: usize },
    #[error("optional section at byte {position} has more than one field placeholder")]
    MultipleFieldsInOptional { position: usize },
}

impl FormatError {
    /// Byte offset where the error was detected.
    pub fn position(&self) -> usize {
        match self {
            FormatError::UnclosedPlaceholder { position }
            | FormatError::EmptyPlaceholder { position }
            | FormatError::InvalidFieldName { position, .. }
            | FormatError::UnmatchedClosingToken { position, .. }
            | FormatError::UnclosedOptionalSection { position }
            | FormatError::MissingFieldInOptional { position }
            | FormatError::MultipleFieldsInOptional { position } => *position,
        }
    }
}

/// What a token stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Literal bytes; `text` is the unescaped value of the span.
    Fixed { text: String },
    /// Required placeholder `{name}` / `{name:hint}`.
    Field { name: String, hint: Option<String> },
    /// Optional section `[prefix{name}suffix]`; prefix and suffix are unescaped.
    Optional {
        name: String,
        hint: Option<String>,
        prefix: String,
        suffix: String,
    },
}

/// One lexical unit of a format string, with its byte span `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub raw_text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn field_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Fixed { .. } => None,
            TokenKind::Field { name, .. } | TokenKind::Optional { name, .. } => Some(name),
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Fixed { .. } => None,
            TokenKind::Field { hint, .. } | TokenKind::Optional { hint, .. } => hint.as_deref(),
        }
    }

    /// True for fixed text and `{name}` placeholders; false for optional sections.
    pub fn required(&self) -> bool {
        !matches!(self.kind, TokenKind::Optional { .. })
    }

    pub fn optional_prefix(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Optional { prefix, .. } => Some(prefix),
            _ => None,
        }
    }

    pub fn optional_suffix(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Optional { suffix, .. } => Some(suffix),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Fixed { text } => write!(f, "Fixed({:?})", text),
            TokenKind::Field { name, .. } => write!(f, "Field({})", name),
            TokenKind::Optional {
                name,
                prefix,
                suffix,
                ..
            } => write!(f, "Optional({}, prefix={:?}, suffix={:?})", name, prefix, suffix),
        }
    }
}

/// A tokenized format string.
///
/// `field_names` lists every placeholder in order of appearance, duplicates included.
/// `required_fields` and `optional_fields` are de-duplicated, in first-appearance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFormat {
    pub source: String,
    pub tokens: Vec<Token>,
    pub field_names: Vec<String>,
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    pub has_optional: bool,
}

impl ParsedFormat {
    fn from_tokens(source: &str, tokens: Vec<Token>) -> Self {
        let mut field_names = Vec::new();
        let mut required_fields: Vec<String> = Vec::new();
        let mut optional_fields: Vec<String> = Vec::new();
        for token in &tokens {
            let Some(name) = token.field_name() else {
                continue;
            };
            field_names.push(name.to_string());
            let bucket = if token.required() {
                &mut required_fields
            } else {
                &mut optional_fields
            };
            if !bucket.iter().any(|n| n == name) {
                bucket.push(name.to_string());
            }
        }
        let has_optional = !optional_fields.is_empty();
        ParsedFormat {
            source: source.to_string(),
            tokens,
            field_names,
            required_fields,
            optional_fields,
            has_optional,
        }
    }

    /// Tokens that reference a field (placeholders and optional sections).
    pub fn field_tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.field_name().is_some())
    }
}

impl FromStr for ParsedFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        tokenize(s)
    }
}

fn is_special(b: u8) -> bool {
    matches!(b, b'{' | b'}' | b'[' | b']' | b'\\')
}

/// Field names match `^[A-Za-z_][A-Za-z0-9_-]*$`.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Escape every DSL metacharacter so `s` tokenizes as a single fixed text.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '{' | '}' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inverse of [`escape`]. A backslash not followed by a metacharacter is kept.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '{' | '}' | '[' | ']' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Tokenize a format string.
pub fn tokenize(source: &str) -> Result<ParsedFormat, FormatError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut pending_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() && is_special(bytes[i + 1]) => {
                pending.push(bytes[i + 1]);
                i += 2;
            }
            b'{' => {
                flush_fixed(&mut tokens, source, &mut pending, pending_start, i);
                let (name, hint, end) = scan_placeholder(source, i, bytes.len())?;
                tokens.push(Token {
                    kind: TokenKind::Field { name, hint },
                    raw_text: source[i..end].to_string(),
                    start: i,
                    end,
                });
                i = end;
                pending_start = i;
            }
            b'[' => {
                flush_fixed(&mut tokens, source, &mut pending, pending_start, i);
                let end = scan_section_end(bytes, i)?;
                tokens.push(optional_token(source, i, end)?);
                i = end;
                pending_start = i;
            }
            b @ (b'}' | b']') => {
                return Err(FormatError::UnmatchedClosingToken {
                    token: b as char,
                    position: i,
                })
            }
            b => {
                pending.push(b);
                i += 1;
            }
        }
    }
    flush_fixed(&mut tokens, source, &mut pending, pending_start, bytes.len());

    Ok(ParsedFormat::from_tokens(source, tokens))
}

fn flush_fixed(
    tokens: &mut Vec<Token>,
    source: &str,
    pending: &mut Vec<u8>,
    start: usize,
    end: usize,
) {
    if start >= end {
        return;
    }
    // Splits only ever happen at ASCII metacharacters, so the pending bytes stay valid UTF-8.
    let text = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    tokens.push(Token {
        kind: TokenKind::Fixed { text },
        raw_text: source[start..end].to_string(),
        start,
        end,
    });
}

/// Scan `{name}` / `{name:hint}` starting at `start` (the `{`), not looking past `limit`.
/// Returns the name, the hint and the offset just after the closing `}`.
fn scan_placeholder(
    source: &str,
    start: usize,
    limit: usize,
) -> Result<(String, Option<String>, usize), FormatError> {
    let close = source.as_bytes()[start + 1..limit]
        .iter()
        .position(|&b| b == b'}')
        .map(|p| start + 1 + p)
        .ok_or(FormatError::UnclosedPlaceholder { position: start })?;
    let content = &source[start + 1..close];
    if content.is_empty() {
        return Err(FormatError::EmptyPlaceholder { position: start });
    }
    let (name, hint) = match content.split_once(':') {
        Some((name, hint)) => (name, Some(hint).filter(|h| !h.is_empty())),
        None => (content, None),
    };
    if !is_valid_field_name(name) {
        return Err(FormatError::InvalidFieldName {
            name: name.to_string(),
            position: start,
        });
    }
    Ok((name.to_string(), hint.map(str::to_string), close + 1))
}

/// Offset just after the `]` closing the section opened at `start`.
fn scan_section_end(bytes: &[u8], start: usize) -> Result<usize, FormatError> {
    let mut depth = 0usize;
    let mut j = start;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' if j + 1 < bytes.len() => {
                j += 2;
                continue;
            }
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(j + 1);
                }
            }
            _ => {}
        }
        j += 1;
    }
    Err(FormatError::UnclosedOptionalSection { position: start })
}

fn optional_token(source: &str, start: usize, end: usize) -> Result<Token, FormatError> {
    let bytes = source.as_bytes();
    let body_end = end - 1;
    let mut prefix: Vec<u8> = Vec::new();
    let mut suffix: Vec<u8> = Vec::new();
    let mut field: Option<(String, Option<String>)> = None;

    let mut i = start + 1;
    while i < body_end {
        match bytes[i] {
            b'\\' if i + 1 < body_end && is_special(bytes[i + 1]) => {
                let text = if field.is_some() { &mut suffix } else { &mut prefix };
                text.push(bytes[i + 1]);
                i += 2;
            }
            b'{' => {
                if field.is_some() {
                    return Err(FormatError::MultipleFieldsInOptional { position: start });
                }
                let (name, hint, next) = scan_placeholder(source, i, body_end)?;
                field = Some((name, hint));
                i = next;
            }
            b'}' => {
                return Err(FormatError::UnmatchedClosingToken {
                    token: '}',
                    position: i,
                })
            }
            b => {
                let text = if field.is_some() { &mut suffix } else { &mut prefix };
                text.push(b);
                i += 1;
            }
        }
    }

    let (name, hint) = field.ok_or(FormatError::MissingFieldInOptional { position: start })?;
    Ok(Token {
        kind: TokenKind::Optional {
            name,
            hint,
            prefix: String::from_utf8_lossy(&prefix).into_owned(),
            suffix: String::from_utf8_lossy(&suffix).into_owned(),
        },
        raw_text: source[start..end].to_string(),
        start,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[&str] = &[
        "",
        "plain text",
        "{a}",
        "START {id} | {payload} [TIMEOUT:{seconds}]\n\n",
        "A{x}[:{y}]B",
        "\\{literal\\} and \\[brackets\\] and \\\\",
        "[[nested]{x}[more]]tail",
        "GET {path} HTTP/1.1\r\n[Host: {host}\r\n]\r\n",
        "{a}{b}{a}",
        "héllo {world_ok} ünïcode",
        "trailing backslash \\",
        "\\q is not an escape",
    ];

    fn fixed(text: &str) -> TokenKind {
        TokenKind::Fixed {
            text: text.to_string(),
        }
    }

    fn field(name: &str) -> TokenKind {
        TokenKind::Field {
            name: name.to_string(),
            hint: None,
        }
    }

    #[test]
    fn tokenize_start_line_example() {
        let parsed = tokenize("START {id} | {payload} [TIMEOUT:{seconds}]\n\n").expect("tokenize");
        let kinds: Vec<_> = parsed.tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                fixed("START "),
                field("id"),
                fixed(" | "),
                field("payload"),
                fixed(" "),
                TokenKind::Optional {
                    name: "seconds".to_string(),
                    hint: None,
                    prefix: "TIMEOUT:".to_string(),
                    suffix: String::new(),
                },
                fixed("\n\n"),
            ]
        );
        assert_eq!(parsed.required_fields, vec!["id", "payload"]);
        assert_eq!(parsed.optional_fields, vec!["seconds"]);
        assert!(parsed.has_optional);
    }

    #[test]
    fn spans_cover_source_without_gaps() {
        for src in CORPUS {
            let parsed = tokenize(src).expect(src);
            let mut expected_start = 0;
            for t in &parsed.tokens {
                assert_eq!(t.start, expected_start, "gap before {:?} in {:?}", t, src);
                assert!(t.end > t.start);
                assert_eq!(&src[t.start..t.end], t.raw_text);
                expected_start = t.end;
            }
            assert_eq!(expected_start, src.len(), "coverage of {:?}", src);
            let joined: String = parsed.tokens.iter().map(|t| t.raw_text.as_str()).collect();
            assert_eq!(&joined, src);
        }
    }

    #[test]
    fn field_names_keep_order_and_duplicates() {
        let parsed = tokenize("{a}{b}[x{c}]{a}").expect("tokenize");
        assert_eq!(parsed.field_names, vec!["a", "b", "c", "a"]);
        assert_eq!(parsed.required_fields, vec!["a", "b"]);
        assert_eq!(parsed.optional_fields, vec!["c"]);
    }

    #[test]
    fn escape_roundtrip() {
        for s in CORPUS {
            assert_eq!(unescape(&escape(s)), *s);
            let parsed = tokenize(&escape(s)).expect("escaped text tokenizes");
            assert!(parsed.field_names.is_empty());
        }
    }

    #[test]
    fn escapes_become_literal_text() {
        let parsed = tokenize("a\\{b\\}c").expect("tokenize");
        assert_eq!(parsed.tokens.len(), 1);
        assert_eq!(parsed.tokens[0].kind, fixed("a{b}c"));
        assert_eq!(parsed.tokens[0].raw_text, "a\\{b\\}c");
    }

    #[test]
    fn hint_is_kept() {
        let parsed = tokenize("{len:u16}").expect("tokenize");
        assert_eq!(parsed.tokens[0].hint(), Some("u16"));
        assert_eq!(parsed.tokens[0].field_name(), Some("len"));
    }

    #[test]
    fn nested_brackets_in_optional_prefix() {
        let parsed = tokenize("[[x]{v}]").expect("tokenize");
        assert_eq!(parsed.tokens[0].optional_prefix(), Some("[x]"));
        assert_eq!(parsed.tokens[0].optional_suffix(), Some(""));
    }

    #[test]
    fn errors_carry_positions() {
        assert_eq!(
            tokenize("ab{x"),
            Err(FormatError::UnclosedPlaceholder { position: 2 })
        );
        assert_eq!(tokenize("a{}"), Err(FormatError::EmptyPlaceholder { position: 1 }));
        assert!(matches!(
            tokenize("{9x}"),
            Err(FormatError::InvalidFieldName { position: 0, .. })
        ));
        assert_eq!(
            tokenize("ab}"),
            Err(FormatError::UnmatchedClosingToken {
                token: '}',
                position: 2
            })
        );
        assert_eq!(
            tokenize("x]"),
            Err(FormatError::UnmatchedClosingToken {
                token: ']',
                position: 1
            })
        );
        assert_eq!(
            tokenize("[{x}"),
            Err(FormatError::UnclosedOptionalSection { position: 0 })
        );
        assert_eq!(
            tokenize("a[text]"),
            Err(FormatError::MissingFieldInOptional { position: 1 })
        );
        assert_eq!(
            tokenize("[{x}{y}]"),
            Err(FormatError::MultipleFieldsInOptional { position: 0 })
        );
    }

    #[test]
    fn field_name_rules() {
        assert!(is_valid_field_name("a"));
        assert!(is_valid_field_name("_x-1"));
        assert!(!is_valid_field_name(""));
        assert!(!is_valid_field_name("1a"));
        assert!(!is_valid_field_name("a b"));
        assert!(!is_valid_field_name("-a"));
    }
}
