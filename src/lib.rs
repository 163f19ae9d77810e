//! # protofmt: protocol format strings compiled to state machines
//!
//! A format string describes the textual layout of one message type:
//!
//! ```text
//! START {id} | {payload} [TIMEOUT:{seconds}]\n\n
//! ```
//!
//! Fixed text must match byte for byte, `{name}` extracts a field, `[prefix{name}suffix]` is an
//! optional section and `\` escapes any of `{ } [ ] \`. `{name:hint}` attaches a hint to a
//! field.
//!
//! ## Pipeline
//!
//! - [`token::tokenize`] turns the format into a [`ParsedFormat`] of tokens, or a
//!   [`FormatError`] with the byte position of the problem.
//! - [`compile::compile`] (or [`Compiler`] for policy and diagnostics) turns tokens and field
//!   declarations into an immutable, validated [`StateMachine`].
//! - [`engine::run`] (or [`Engine`] with [`EngineOptions`]) interprets a machine against a
//!   byte buffer and returns an [`ExecutionResult`]: the typed fields on success, or a
//!   structured [`ExecutionError`] with offset, expected and actual bytes and the state
//!   history.
//!
//! ## Schemas
//!
//! Message types can also be declared in a schema file and loaded with [`parse`]:
//!
//! ```text
//! message Invite {
//!     format: "INVITE {uri} SIP/2.0\r\n[Timeout: {timeout}\r\n]\r\n";
//!     uri: string;
//!     timeout: number? [0..3600];
//! }
//! ```
//!
//! [`Codec`] compiles every message of a resolved schema once and decodes (with constraint
//! validation) or renders messages by name; [`decode_frame`] decodes several consecutive
//! messages from one buffer.
//!
//! ## Usage
//!
//! See `tests/engine.rs` and `tests/integration.rs` for full examples.

pub mod ast;
pub mod codec;
pub mod compile;
pub mod dump;
pub mod engine;
pub mod frame;
pub mod lint;
pub mod machine;
pub mod parser;
pub mod token;
pub mod value;

pub use ast::{Constraint, FieldDeclaration, FieldType, MessageSection, Protocol, ResolvedProtocol};
pub use codec::{Codec, CodecError, Decoded};
pub use compile::{compile, CompileError, Compiled, Compiler, FieldPolicy};
pub use engine::{
    get_engine_profile, reset_engine_profile, run, Engine, EngineOptions, ExecutionError,
    ExecutionErrorKind, ExecutionResult, Fields,
};
pub use frame::{decode_frame, FrameDecodeResult};
pub use lint::{lint_machine, LintMessage, LintRule, Severity};
pub use machine::{BuildError, StateId, StateKind, StateMachine, StateMachineBuilder};
pub use parser::{parse, parse_file};
pub use token::{tokenize, FormatError, ParsedFormat, Token, TokenKind};
pub use value::Value;
