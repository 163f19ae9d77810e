//! Decode and render text messages from a schema.
//!
//! A [`Codec`] compiles the format string of every message up front. Decoding runs the
//! message's machine and then validates the declared constraints (numeric range, length,
//! enum membership). Rendering walks the same machine and writes literals verbatim and
//! field values as text.

use crate::ast::*;
use crate::compile::{CompileError, Compiler, FieldPolicy};
use crate::engine::{Engine, EngineOptions, ExecutionError, Fields};
use crate::lint::LintMessage;
use crate::machine::{StateKind, StateMachine};
use crate::value::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("message {message}: {source}")]
    Compile {
        message: String,
        source: CompileError,
    },
    #[error("Execution: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Unknown message: {0}")]
    UnknownMessage(String),
    #[error("message {message}: no value for required field `{field}`")]
    MissingValue { message: String, field: String },
    #[error("no message type matches the input (tried {tried})")]
    NoMatchingMessage { tried: usize },
}

/// A message recognised by [`Codec::decode_any`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub name: String,
    pub fields: Fields,
    pub consumed: usize,
}

#[derive(Debug)]
pub struct Codec {
    resolved: ResolvedProtocol,
    /// One machine per message, in declaration order.
    machines: Vec<StateMachine>,
    diagnostics: Vec<(String, LintMessage)>,
    engine: Engine,
}

impl Codec {
    /// Compile every message with the default field policy and engine options.
    pub fn new(resolved: ResolvedProtocol) -> Result<Self, CodecError> {
        Self::with_options(resolved, FieldPolicy::default(), EngineOptions::default())
    }

    pub fn with_options(
        resolved: ResolvedProtocol,
        policy: FieldPolicy,
        options: EngineOptions,
    ) -> Result<Self, CodecError> {
        let compiler = Compiler::new(policy);
        let mut machines = Vec::with_capacity(resolved.messages().len());
        let mut diagnostics = Vec::new();
        for msg in resolved.messages() {
            let compiled = compiler
                .compile_str(&msg.format, &msg.fields, &msg.name)
                .map_err(|source| CodecError::Compile {
                    message: msg.name.clone(),
                    source,
                })?;
            diagnostics.extend(
                compiled
                    .diagnostics
                    .into_iter()
                    .map(|d| (msg.name.clone(), d)),
            );
            machines.push(compiled.machine);
        }
        Ok(Codec {
            resolved,
            machines,
            diagnostics,
            engine: Engine::new(options),
        })
    }

    pub fn resolved(&self) -> &ResolvedProtocol {
        &self.resolved
    }

    pub fn machine(&self, message_name: &str) -> Option<&StateMachine> {
        self.resolved
            .messages_by_name
            .get(message_name)
            .and_then(|&i| self.machines.get(i))
    }

    /// Compiler diagnostics, tagged with the message they belong to.
    pub fn diagnostics(&self) -> &[(String, LintMessage)] {
        &self.diagnostics
    }

    /// Decode a single message by name from the given bytes.
    pub fn decode_message(&self, message_name: &str, bytes: &[u8]) -> Result<Fields, CodecError> {
        self.decode_message_with_extent(message_name, bytes).1
    }

    /// Decode a single message and return (bytes_consumed, result). Constraints are checked
    /// after the machine accepts, so a validation failure still reports the message extent.
    pub fn decode_message_with_extent(
        &self,
        message_name: &str,
        bytes: &[u8],
    ) -> (usize, Result<Fields, CodecError>) {
        let (msg, machine) = match self.lookup(message_name) {
            Ok(found) => found,
            Err(e) => return (0, Err(e)),
        };
        let result = self.engine.run(machine, bytes);
        let consumed = result.bytes_consumed;
        let fields = match result.into_result() {
            Ok(fields) => fields,
            Err(e) => return (consumed, Err(e.into())),
        };
        if let Err(e) = validate_fields(msg, &fields) {
            return (consumed, Err(e));
        }
        (consumed, Ok(fields))
    }

    /// Try every message in declaration order; the first one that decodes and validates wins.
    pub fn decode_any(&self, bytes: &[u8]) -> Result<Decoded, CodecError> {
        for msg in self.resolved.messages() {
            if let (consumed, Ok(fields)) = self.decode_message_with_extent(&msg.name, bytes) {
                return Ok(Decoded {
                    name: msg.name.clone(),
                    fields,
                    consumed,
                });
            }
        }
        Err(CodecError::NoMatchingMessage {
            tried: self.machines.len(),
        })
    }

    /// Render a message by name. Optional sections are written only when their value is
    /// present and not null.
    pub fn encode_message(&self, message_name: &str, values: &Fields) -> Result<Vec<u8>, CodecError> {
        let (msg, machine) = self.lookup(message_name)?;
        validate_fields(msg, values)?;
        let mut out = Vec::new();
        let mut current = machine.state(machine.initial_state());
        let mut steps = 0;
        while let Some(state) = current {
            steps += 1;
            if steps > machine.states().len() {
                return Err(CodecError::Validation(format!(
                    "message {}: machine does not reach an accept state",
                    message_name
                )));
            }
            match &state.kind {
                StateKind::Init => {}
                StateKind::ExpectFixed { expected: lit } | StateKind::ExpectDelimiter { delimiter: lit } => {
                    out.extend_from_slice(lit)
                }
                StateKind::ExtractField(extract) => match values.get(&extract.target) {
                    Some(v) if !v.is_null() => out.extend(v.to_wire()),
                    _ if extract.required => {
                        return Err(CodecError::MissingValue {
                            message: message_name.to_string(),
                            field: extract.target.clone(),
                        })
                    }
                    _ => {}
                },
                StateKind::OptionalField {
                    extract,
                    prefix,
                    suffix,
                } => {
                    if let Some(v) = values.get(&extract.target).filter(|v| !v.is_null()) {
                        out.extend_from_slice(prefix);
                        out.extend(v.to_wire());
                        out.extend_from_slice(suffix);
                    }
                }
                StateKind::Accept => return Ok(out),
                StateKind::Error { message } => return Err(CodecError::Validation(message.clone())),
            }
            current = machine.successor(state.id);
        }
        Err(CodecError::Validation(format!(
            "message {}: machine does not reach an accept state",
            message_name
        )))
    }

    fn lookup(&self, message_name: &str) -> Result<(&MessageSection, &StateMachine), CodecError> {
        self.resolved
            .get_message(message_name)
            .zip(self.machine(message_name))
            .ok_or_else(|| CodecError::UnknownMessage(message_name.to_string()))
    }
}

/// Check declared constraints and enum membership. Null and absent values are skipped;
/// required-ness is the engine's concern.
fn validate_fields(msg: &MessageSection, fields: &Fields) -> Result<(), CodecError> {
    for f in &msg.fields {
        let Some(v) = fields.get(&f.name).filter(|v| !v.is_null()) else {
            continue;
        };
        if let FieldType::Enum(allowed) = &f.field_type {
            let text = v.to_string();
            if !allowed.iter().any(|a| *a == text) {
                return Err(CodecError::Validation(format!(
                    "{}.{}: `{}` is not one of {:?}",
                    msg.name, f.name, text, allowed
                )));
            }
        }
        validate_constraint(&msg.name, f, v)?;
    }
    Ok(())
}

fn validate_constraint(message: &str, f: &FieldDeclaration, v: &Value) -> Result<(), CodecError> {
    match &f.constraint {
        None => Ok(()),
        Some(Constraint::Range { min, max }) => {
            let n = v.as_f64().ok_or_else(|| {
                CodecError::Validation(format!("{}.{}: expected numeric for range", message, f.name))
            })?;
            if n < *min || n > *max {
                return Err(CodecError::Validation(format!(
                    "{}.{}: value {} not in [{}..{}]",
                    message, f.name, n, min, max
                )));
            }
            Ok(())
        }
        Some(Constraint::Length { min, max }) => {
            let len = v.as_bytes().map(<[u8]>::len).ok_or_else(|| {
                CodecError::Validation(format!("{}.{}: expected text for length", message, f.name))
            })?;
            if len < *min || len > *max {
                return Err(CodecError::Validation(format!(
                    "{}.{}: length {} not in [len {}..{}]",
                    message, f.name, len, min, max
                )));
            }
            Ok(())
        }
    }
}
