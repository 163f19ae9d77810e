//! Schema model: messages, their format strings and field declarations.

use std::collections::HashMap;
use std::fmt;

/// Root protocol definition: one or more message types.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    pub messages: Vec<MessageSection>,
}

#[derive(Debug, Clone)]
pub struct MessageSection {
    pub name: String,
    pub format: String,
    pub fields: Vec<FieldDeclaration>,
}

/// Declared type of a field; selects the converter applied to extracted bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Bytes,
    /// Text value restricted to one of the listed variants (checked after extraction).
    Enum(Vec<String>),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "bool"),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::Enum(values) => write!(f, "enum({})", values.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Inclusive length range in bytes (strings and bytes).
    Length { min: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDeclaration {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub constraint: Option<Constraint>,
}

impl FieldDeclaration {
    /// Required field without constraint.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDeclaration {
            name: name.into(),
            field_type,
            required: true,
            constraint: None,
        }
    }

    /// String declaration for a field the format references but the schema does not declare.
    pub fn synthesized(name: impl Into<String>, required: bool) -> Self {
        FieldDeclaration {
            required,
            ..FieldDeclaration::new(name, FieldType::String)
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }
}

/// Resolved protocol: messages by name for the codec.
#[derive(Debug, Clone)]
pub struct ResolvedProtocol {
    pub protocol: Protocol,
    pub messages_by_name: HashMap<String, usize>,
}

impl ResolvedProtocol {
    pub fn resolve(protocol: Protocol) -> Result<Self, String> {
        let mut messages_by_name = HashMap::new();
        for (i, m) in protocol.messages.iter().enumerate() {
            if messages_by_name.insert(m.name.clone(), i).is_some() {
                return Err(format!("Duplicate message name: {}", m.name));
            }
            for (j, f) in m.fields.iter().enumerate() {
                if m.fields[..j].iter().any(|other| other.name == f.name) {
                    return Err(format!("Duplicate field name in {}: {}", m.name, f.name));
                }
            }
        }
        Ok(ResolvedProtocol {
            protocol,
            messages_by_name,
        })
    }

    pub fn get_message(&self, name: &str) -> Option<&MessageSection> {
        self.messages_by_name
            .get(name)
            .map(|&i| &self.protocol.messages[i])
    }

    /// Messages in declaration order.
    pub fn messages(&self) -> &[MessageSection] {
        &self.protocol.messages
    }

    pub fn field_declaration(&self, message: &str, field: &str) -> Option<&FieldDeclaration> {
        self.get_message(message)?
            .fields
            .iter()
            .find(|f| f.name == field)
    }
}
