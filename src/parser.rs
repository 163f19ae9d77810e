//! Parse schema source into the AST using PEST.

use crate::ast::*;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::path::Path;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// Parse schema source into a [`Protocol`].
pub fn parse(source: &str) -> Result<Protocol, String> {
    let pairs = SchemaParser::parse(Rule::protocol, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_protocol(pair)
}

/// Read and parse a schema file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Protocol, String> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    parse(&source).map_err(|e| format!("{}: {}", path.display(), e))
}

fn build_protocol(pair: pest::iterators::Pair<Rule>) -> Result<Protocol, String> {
    let mut messages = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::message_section {
            messages.push(build_message(inner)?);
        }
    }
    Ok(Protocol { messages })
}

fn build_message(pair: pest::iterators::Pair<Rule>) -> Result<MessageSection, String> {
    let mut name = String::new();
    let mut format = None;
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::format_decl => {
                if format.is_some() {
                    return Err(format!("message {}: more than one format", name));
                }
                let lit = inner.into_inner().next().ok_or("format: missing string")?;
                format = Some(parse_string_lit(lit)?);
            }
            Rule::field_decl => fields.push(build_field(inner)?),
            _ => {}
        }
    }
    let format = format.ok_or_else(|| format!("message {}: missing format", name))?;
    Ok(MessageSection {
        name,
        format,
        fields,
    })
}

fn build_field(pair: pest::iterators::Pair<Rule>) -> Result<FieldDeclaration, String> {
    let mut name = String::new();
    let mut field_type = None;
    let mut required = true;
    let mut constraint = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::field_ident => name = inner.as_str().to_string(),
            Rule::field_type => field_type = Some(build_field_type(inner)?),
            Rule::optional_marker => required = false,
            Rule::constraint => constraint = Some(build_constraint(inner)?),
            _ => {}
        }
    }
    let field_type = field_type.ok_or_else(|| format!("field {}: missing type", name))?;
    if let Some(c) = &constraint {
        check_constraint(&name, &field_type, c)?;
    }
    Ok(FieldDeclaration {
        name,
        field_type,
        required,
        constraint,
    })
}

fn build_field_type(pair: pest::iterators::Pair<Rule>) -> Result<FieldType, String> {
    let inner = pair.into_inner().next().ok_or("Empty field_type")?;
    match inner.as_rule() {
        Rule::base_type => parse_base_type(inner.as_str()),
        Rule::enum_type => {
            let variants = inner
                .into_inner()
                .map(parse_string_lit)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FieldType::Enum(variants))
        }
        _ => Err("Unknown field type".to_string()),
    }
}

fn parse_base_type(s: &str) -> Result<FieldType, String> {
    match s {
        "string" => Ok(FieldType::String),
        "number" => Ok(FieldType::Number),
        "bool" => Ok(FieldType::Boolean),
        "bytes" => Ok(FieldType::Bytes),
        _ => Err(format!("Unknown base type: {}", s)),
    }
}

fn build_constraint(pair: pest::iterators::Pair<Rule>) -> Result<Constraint, String> {
    let inner = pair.into_inner().next().ok_or("Empty constraint")?;
    let rule = inner.as_rule();
    let mut bounds = inner.into_inner();
    let min_s = bounds.next().ok_or("constraint min")?.as_str();
    let max_s = bounds.next().ok_or("constraint max")?.as_str();
    match rule {
        Rule::range_constraint => {
            let min: f64 = min_s.parse().map_err(|_| "range min number")?;
            let max: f64 = max_s.parse().map_err(|_| "range max number")?;
            if min > max {
                return Err(format!("empty range [{}..{}]", min_s, max_s));
            }
            Ok(Constraint::Range { min, max })
        }
        Rule::length_constraint => {
            let min: usize = min_s.parse().map_err(|_| "length min number")?;
            let max: usize = max_s.parse().map_err(|_| "length max number")?;
            if min > max {
                return Err(format!("empty length range [len {}..{}]", min, max));
            }
            Ok(Constraint::Length { min, max })
        }
        _ => Err("Unknown constraint".to_string()),
    }
}

fn check_constraint(name: &str, field_type: &FieldType, c: &Constraint) -> Result<(), String> {
    match (c, field_type) {
        (Constraint::Range { .. }, FieldType::Number) => Ok(()),
        (Constraint::Length { .. }, FieldType::String | FieldType::Bytes) => Ok(()),
        (Constraint::Range { .. }, t) => Err(format!("field {}: range constraint on {}", name, t)),
        (Constraint::Length { .. }, t) => Err(format!("field {}: length constraint on {}", name, t)),
    }
}

/// Unescape a `"..."` literal. `\n \r \t \0 \" \\ \xHH` are decoded; any other `\X` is kept
/// as is so format escapes like `\{` reach the tokenizer untouched.
fn parse_string_lit(pair: pest::iterators::Pair<Rule>) -> Result<String, String> {
    let raw = pair
        .into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or_default();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let b = u8::from_str_radix(&hex, 16)
                    .map_err(|_| format!("Invalid hex escape: \\x{}", hex))?;
                if !b.is_ascii() {
                    return Err(format!("Hex escape \\x{} is not ASCII", hex));
                }
                out.push(b as char);
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}
