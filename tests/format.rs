//! Format-string syntax: token shapes, structural errors and the span/escape properties.

use protofmt::token::{escape, is_valid_field_name, unescape};
use protofmt::{tokenize, FormatError, ParsedFormat, TokenKind};

fn kinds(format: &str) -> Vec<TokenKind> {
    tokenize(format)
        .expect("tokenize")
        .tokens
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

fn fixed(s: &str) -> TokenKind {
    TokenKind::Fixed {
        text: s.to_string(),
    }
}

fn field(s: &str) -> TokenKind {
    TokenKind::Field {
        name: s.to_string(),
        hint: None,
    }
}

#[test]
fn test_start_message_tokens() {
    let p = tokenize("START {id} | {payload} [TIMEOUT:{seconds}]\n\n").expect("tokenize");
    let k: Vec<_> = p.tokens.iter().map(|t| t.kind.clone()).collect();
    assert_eq!(
        k,
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
    assert_eq!(p.required_fields, vec!["id", "payload"]);
    assert_eq!(p.optional_fields, vec!["seconds"]);
    assert!(p.has_optional);
}

#[test]
fn test_hint_is_kept() {
    let p = tokenize("{len:u16}").expect("tokenize");
    assert_eq!(p.tokens[0].hint(), Some("u16"));
    assert_eq!(p.tokens[0].field_name(), Some("len"));
    assert_eq!(p.field_names, vec!["len"]);
}

#[test]
fn test_escapes_become_fixed_text() {
    assert_eq!(kinds(r"a\{b\}c\[d\]e\\f"), vec![fixed(r"a{b}c[d]e\f")]);
    // a backslash before anything else is literal
    assert_eq!(kinds(r"C:\temp\n"), vec![fixed(r"C:\temp\n")]);
    assert_eq!(kinds("trailing\\"), vec![fixed("trailing\\")]);
}

#[test]
fn test_optional_section_with_nested_brackets() {
    let k = kinds("x[[a]{v}[b]]y");
    assert_eq!(
        k[1],
        TokenKind::Optional {
            name: "v".to_string(),
            hint: None,
            prefix: "[a]".to_string(),
            suffix: "[b]".to_string(),
        }
    );
    assert_eq!(k.len(), 3);
}

#[test]
fn test_escaped_bracket_inside_optional() {
    let k = kinds(r"[\]{v}\[]");
    assert_eq!(
        k,
        vec![TokenKind::Optional {
            name: "v".to_string(),
            hint: None,
            prefix: "]".to_string(),
            suffix: "[".to_string(),
        }]
    );
}

#[test]
fn test_structural_errors() {
    let cases: &[(&str, FormatError)] = &[
        ("ab{cd", FormatError::UnclosedPlaceholder { position: 2 }),
        ("a{}", FormatError::EmptyPlaceholder { position: 1 }),
        (
            "{9lives}",
            FormatError::InvalidFieldName {
                name: "9lives".to_string(),
                position: 0,
            },
        ),
        (
            "a}",
            FormatError::UnmatchedClosingToken {
                token: '}',
                position: 1,
            },
        ),
        (
            "a]",
            FormatError::UnmatchedClosingToken {
                token: ']',
                position: 1,
            },
        ),
        ("x[{a}", FormatError::UnclosedOptionalSection { position: 1 }),
        ("[no field]", FormatError::MissingFieldInOptional { position: 0 }),
        ("[{a}{b}]", FormatError::MultipleFieldsInOptional { position: 0 }),
    ];
    for (format, expected) in cases {
        let err = tokenize(format).unwrap_err();
        assert_eq!(&err, expected, "format {:?}", format);
        assert_eq!(err.position(), expected.position());
    }
}

#[test]
fn test_field_name_rules() {
    for ok in ["a", "_x", "snake_case", "kebab-case", "A1"] {
        assert!(is_valid_field_name(ok), "{}", ok);
    }
    for bad in ["", "1a", "-a", "a b", "a.b", "é"] {
        assert!(!is_valid_field_name(bad), "{}", bad);
    }
}

#[test]
fn test_spans_cover_source_and_names_keep_order() {
    let corpus = [
        "",
        "{a}{b}{a}",
        "A{x}[:{y}]B",
        "GET {path} HTTP/1.1\r\n[Host: {host}\r\n]\r\n",
        r"\{lit\} {v} [\[{w}\]]",
        "ünïcode {ü_ok}",
    ];
    for format in corpus {
        let p = match tokenize(format) {
            Ok(p) => p,
            // "ü_ok" is not a valid name; only structurally valid formats are checked
            Err(FormatError::InvalidFieldName { .. }) => continue,
            Err(e) => panic!("{:?}: {}", format, e),
        };
        let mut pos = 0;
        let mut rebuilt = String::new();
        for t in &p.tokens {
            assert_eq!(t.start, pos, "{:?}", format);
            rebuilt.push_str(&t.raw_text);
            pos = t.end;
        }
        assert_eq!(pos, format.len());
        assert_eq!(rebuilt, format);

        let names: Vec<&str> = p.tokens.iter().filter_map(|t| t.field_name()).collect();
        assert_eq!(p.field_names, names);
    }
    assert_eq!(tokenize("{a}{b}{a}").expect("tokenize").field_names, vec!["a", "b", "a"]);
}

#[test]
fn test_escape_round_trip() {
    for s in ["", "plain", "{a}", "[x]", r"\", r"\\{", "mixed {[ ]} \\ end", "ünï{}"] {
        assert_eq!(unescape(&escape(s)), s);
        let p = tokenize(&escape(s)).expect("escaped text tokenizes");
        assert!(p.field_names.is_empty());
    }
}

#[test]
fn test_from_str() {
    let p: ParsedFormat = "{a}-{b}".parse().expect("parse");
    assert_eq!(p.required_fields, vec!["a", "b"]);
}
