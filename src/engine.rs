//! Interpret a compiled [`StateMachine`] against a byte buffer.
//!
//! The engine is a pure function of `(machine, buffer)`: each [`Engine::run`] call owns a
//! private execution context, so one machine can be run from many threads at once.
//!
//! ## Loop
//!
//! Starting at the initial state with offset 0, the current state's action runs, then the
//! first outgoing transition (by descending priority) whose condition holds is taken. The
//! loop ends at a terminal state: `Accept` assembles the output record, `Error` fails.
//!
//! ## Field boundaries
//!
//! A field without a fixed length ends where the next structure begins:
//!
//! 1. next state is fixed text: the first occurrence of that text;
//! 2. next state is an optional section: the earliest of its prefix marker and the text
//!    of the state after it;
//! 3. otherwise the first fallback terminator (tab, then CRLF by default), else the end
//!    of the buffer.
//!
//! A required field whose delimiter never appears fails with `DelimiterNotFound`; an optional
//! section in that situation is absent.
//!
//! ## Errors
//!
//! Failures are returned in [`ExecutionResult::error`], never panicked, with the offset,
//! expected and actual bytes, and the full state history.
//!
//! ## Profiling
//!
//! Enable the **`engine_profile`** feature and use [`reset_engine_profile`] /
//! [`get_engine_profile`] to get time spent per state kind (label → nanoseconds).

use crate::machine::{Condition, Extract, State, StateId, StateKind, StateMachine};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "engine_profile")]
use std::cell::RefCell;
#[cfg(feature = "engine_profile")]
use std::time::Instant;

/// Extracted fields by name.
pub type Fields = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    UnexpectedEndOfData,
    FixedStringMismatch,
    DelimiterNotFound,
    TypeConversionFailure,
    MissingRequiredField,
    NoValidTransition,
    /// An `Error` state was entered.
    ErrorState,
    /// The machine is inconsistent (unknown state id, runaway loop).
    InternalInvalidState,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why and where a run failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {offset} ({state}): {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    pub state: StateId,
    pub offset: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub state_history: Vec<StateId>,
}

impl ExecutionError {
    fn with_expected(mut self, expected: &[u8]) -> Self {
        self.expected = Some(String::from_utf8_lossy(expected).into_owned());
        self
    }

    fn with_actual(mut self, actual: &[u8]) -> Self {
        self.actual = Some(String::from_utf8_lossy(actual).into_owned());
        self
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub fields: Option<Fields>,
    pub bytes_consumed: usize,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    fn accepted(fields: Fields, bytes_consumed: usize) -> Self {
        ExecutionResult {
            success: true,
            fields: Some(fields),
            bytes_consumed,
            error: None,
        }
    }

    fn failed(error: ExecutionError, bytes_consumed: usize) -> Self {
        ExecutionResult {
            success: false,
            fields: None,
            bytes_consumed,
            error: Some(error),
        }
    }

    /// Field value on success; `None` after a failure or for unknown names.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref()?.get(name)
    }

    pub fn into_result(self) -> Result<Fields, ExecutionError> {
        match (self.fields, self.error) {
            (_, Some(e)) => Err(e),
            (Some(fields), None) => Ok(fields),
            (None, None) => Ok(Fields::new()),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Bytes of remaining input quoted in `actual` on mismatch.
    pub snippet_len: usize,
    /// Terminators tried in order when a field has no structural delimiter.
    pub fallback_terminators: Vec<Vec<u8>>,
    /// Loop guard; defaults to `states * (len + 1) + 1`.
    pub max_steps: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            snippet_len: 50,
            fallback_terminators: vec![b"\t".to_vec(), b"\r\n".to_vec()],
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    options: EngineOptions,
}

/// Per-run state. Lives for one [`Engine::run`] call only.
struct ExecutionContext<'a> {
    buffer: &'a [u8],
    current: StateId,
    offset: usize,
    fields: Fields,
    history: Vec<StateId>,
    complete: bool,
}

impl<'a> ExecutionContext<'a> {
    fn new(machine: &StateMachine, buffer: &'a [u8]) -> Self {
        ExecutionContext {
            buffer,
            current: machine.initial_state(),
            offset: 0,
            fields: Fields::new(),
            history: Vec::new(),
            complete: false,
        }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buffer[self.offset.min(self.buffer.len())..]
    }

    fn error(&self, kind: ExecutionErrorKind, message: impl Into<String>) -> ExecutionError {
        ExecutionError {
            kind,
            message: message.into(),
            state: self.current,
            offset: self.offset,
            expected: None,
            actual: None,
            state_history: self.history.clone(),
        }
    }
}

/// End of a field value, or the delimiter that could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Boundary {
    At(usize),
    Missing(Vec<u8>),
}

/// Steps allowed before a run is treated as stuck in a cycle.
fn step_limit(states: usize, len: usize) -> usize {
    states.saturating_mul(len.saturating_add(1)).saturating_add(1)
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(from);
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Engine { options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run `machine` over `buffer` from offset 0.
    pub fn run(&self, machine: &StateMachine, buffer: &[u8]) -> ExecutionResult {
        let mut ctx = ExecutionContext::new(machine, buffer);
        match self.execute(machine, &mut ctx) {
            Ok(fields) => ExecutionResult::accepted(fields, ctx.offset),
            Err(e) => ExecutionResult::failed(e, ctx.offset),
        }
    }

    fn execute(
        &self,
        machine: &StateMachine,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Fields, ExecutionError> {
        let max_steps = self
            .options
            .max_steps
            .unwrap_or_else(|| step_limit(machine.states().len(), ctx.buffer.len()));
        let mut steps = 0usize;
        while !ctx.complete {
            steps += 1;
            if steps > max_steps {
                return Err(ctx.error(
                    ExecutionErrorKind::InternalInvalidState,
                    format!("no terminal state reached after {} steps", max_steps),
                ));
            }
            let state = machine.state(ctx.current).ok_or_else(|| {
                ctx.error(
                    ExecutionErrorKind::InternalInvalidState,
                    format!("unknown state {}", ctx.current),
                )
            })?;
            ctx.history.push(state.id);
            self.step(machine, state, ctx)?;
            if !ctx.complete {
                ctx.current = self.select_transition(state, ctx)?;
            }
        }
        Ok(std::mem::take(&mut ctx.fields))
    }

    fn step(
        &self,
        machine: &StateMachine,
        state: &State,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), ExecutionError> {
        #[cfg(feature = "engine_profile")]
        let _g = ProfileGuard::new(state.kind.label());
        match &state.kind {
            StateKind::Init => Ok(()),
            StateKind::ExpectFixed { expected } => self.expect_fixed(expected, ctx),
            StateKind::ExpectDelimiter { delimiter } => {
                if ctx.remaining().starts_with(delimiter) {
                    ctx.offset += delimiter.len();
                    Ok(())
                } else {
                    Err(self.mismatch(ctx, ExecutionErrorKind::DelimiterNotFound, delimiter))
                }
            }
            StateKind::ExtractField(extract) => self.extract_field(machine, state, extract, ctx),
            StateKind::OptionalField {
                extract,
                prefix,
                suffix,
            } => self.optional_field(machine, state, extract, prefix, suffix, ctx),
            StateKind::Accept => {
                self.assemble(machine, ctx)?;
                ctx.complete = true;
                Ok(())
            }
            StateKind::Error { message } => {
                Err(ctx.error(ExecutionErrorKind::ErrorState, message.clone()))
            }
        }
    }

    fn expect_fixed(&self, expected: &[u8], ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let end = ctx.offset + expected.len();
        if end > ctx.buffer.len() {
            return Err(self.mismatch(ctx, ExecutionErrorKind::UnexpectedEndOfData, expected));
        }
        if &ctx.buffer[ctx.offset..end] != expected {
            return Err(self.mismatch(ctx, ExecutionErrorKind::FixedStringMismatch, expected));
        }
        ctx.offset = end;
        Ok(())
    }

    fn mismatch(
        &self,
        ctx: &ExecutionContext<'_>,
        kind: ExecutionErrorKind,
        expected: &[u8],
    ) -> ExecutionError {
        let message = match kind {
            ExecutionErrorKind::UnexpectedEndOfData => format!(
                "need {} byte(s) for {:?}, {} left",
                expected.len(),
                String::from_utf8_lossy(expected),
                ctx.remaining().len()
            ),
            _ => format!("expected {:?}", String::from_utf8_lossy(expected)),
        };
        ctx.error(kind, message)
            .with_expected(expected)
            .with_actual(self.snippet(ctx.remaining()))
    }

    fn snippet<'b>(&self, data: &'b [u8]) -> &'b [u8] {
        &data[..data.len().min(self.options.snippet_len)]
    }

    fn extract_field(
        &self,
        machine: &StateMachine,
        state: &State,
        extract: &Extract,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), ExecutionError> {
        let end = match self.find_boundary(machine, state.id, ctx.buffer, ctx.offset) {
            Boundary::At(end) => end,
            Boundary::Missing(delimiter) => {
                let scanned = self.snippet(ctx.remaining());
                let mut err = ctx.error(
                    ExecutionErrorKind::DelimiterNotFound,
                    format!(
                        "no {:?} after field `{}`",
                        String::from_utf8_lossy(&delimiter),
                        extract.target
                    ),
                );
                err.offset = ctx.buffer.len();
                return Err(err.with_expected(&delimiter).with_actual(scanned));
            }
        };
        let value = self.convert(extract, &ctx.buffer[ctx.offset..end], ctx)?;
        ctx.fields.insert(extract.target.clone(), value);
        ctx.offset = end;
        Ok(())
    }

    fn optional_field(
        &self,
        machine: &StateMachine,
        state: &State,
        extract: &Extract,
        prefix: &[u8],
        suffix: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), ExecutionError> {
        if !ctx.remaining().starts_with(prefix) {
            return Ok(());
        }
        let start = ctx.offset + prefix.len();
        let end = if suffix.is_empty() {
            self.find_boundary(machine, state.id, ctx.buffer, start)
        } else {
            find(ctx.buffer, start, suffix).map_or(Boundary::Missing(suffix.to_vec()), Boundary::At)
        };
        let Boundary::At(end) = end else {
            return Ok(());
        };
        let value = self.convert(extract, &ctx.buffer[start..end], ctx)?;
        ctx.fields.insert(extract.target.clone(), value);
        ctx.offset = end + suffix.len();
        Ok(())
    }

    fn convert(
        &self,
        extract: &Extract,
        raw: &[u8],
        ctx: &ExecutionContext<'_>,
    ) -> Result<Value, ExecutionError> {
        use crate::machine::Converter;
        if raw.is_empty()
            && !extract.required
            && matches!(extract.converter, Converter::Number | Converter::Boolean)
        {
            return Ok(Value::Null);
        }
        extract.converter.apply(raw).map_err(|reason| {
            ctx.error(
                ExecutionErrorKind::TypeConversionFailure,
                format!("field `{}`: {}", extract.target, reason),
            )
            .with_actual(self.snippet(raw))
        })
    }

    /// Where the value of field state `id`, starting at `from`, ends.
    fn find_boundary(
        &self,
        machine: &StateMachine,
        id: StateId,
        buffer: &[u8],
        from: usize,
    ) -> Boundary {
        let Some(next) = machine.successor(id) else {
            return self.fallback_boundary(buffer, from);
        };
        if let Some(literal) = next.kind.literal() {
            return find(buffer, from, literal).map_or(Boundary::Missing(literal.to_vec()), Boundary::At);
        }
        if let StateKind::OptionalField { prefix, .. } = &next.kind {
            let hop = machine.successor(next.id).and_then(|s| s.kind.literal());
            let marker = Some(prefix.as_slice())
                .filter(|p| !p.is_empty())
                .and_then(|p| find(buffer, from, p));
            let after = hop.and_then(|lit| find(buffer, from, lit));
            return match (marker, after) {
                (Some(a), Some(b)) => Boundary::At(a.min(b)),
                (Some(a), None) | (None, Some(a)) => Boundary::At(a),
                (None, None) => match hop {
                    Some(lit) => Boundary::Missing(lit.to_vec()),
                    None => self.fallback_boundary(buffer, from),
                },
            };
        }
        self.fallback_boundary(buffer, from)
    }

    fn fallback_boundary(&self, buffer: &[u8], from: usize) -> Boundary {
        self.options
            .fallback_terminators
            .iter()
            .find_map(|t| find(buffer, from, t).filter(|_| !t.is_empty()))
            .map_or(Boundary::At(buffer.len()), Boundary::At)
    }

    fn select_transition(
        &self,
        state: &State,
        ctx: &ExecutionContext<'_>,
    ) -> Result<StateId, ExecutionError> {
        let remaining = ctx.remaining();
        state
            .transitions
            .iter()
            .find(|t| match &t.condition {
                Condition::Always | Condition::OnDelimiter | Condition::OnOptional => true,
                Condition::OnMatch(value) => remaining.starts_with(value),
                Condition::OnLength(n) => remaining.len() >= *n,
            })
            .map(|t| t.to)
            .ok_or_else(|| {
                ctx.error(
                    ExecutionErrorKind::NoValidTransition,
                    format!(
                        "none of {} transition(s) out of {} ({}) matches",
                        state.transitions.len(),
                        state.id,
                        state.kind.label()
                    ),
                )
                .with_actual(self.snippet(remaining))
            })
    }

    /// Check required fields and fill the rest with `Null`.
    fn assemble(&self, machine: &StateMachine, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        for decl in machine.field_declarations() {
            if ctx.fields.contains_key(&decl.name) {
                continue;
            }
            if decl.required {
                return Err(ctx.error(
                    ExecutionErrorKind::MissingRequiredField,
                    format!("required field `{}` was not populated", decl.name),
                ));
            }
            ctx.fields.insert(decl.name.clone(), Value::Null);
        }
        Ok(())
    }
}

/// Run `machine` over `buffer` with default options.
pub fn run(machine: &StateMachine, buffer: &[u8]) -> ExecutionResult {
    Engine::default().run(machine, buffer)
}

#[cfg(feature = "engine_profile")]
#[derive(Default)]
struct EngineProfileStats {
    ns_per_label: HashMap<String, u64>,
}

#[cfg(feature = "engine_profile")]
thread_local!(static ENGINE_PROFILE: RefCell<EngineProfileStats> = RefCell::new(EngineProfileStats::default()));

#[cfg(feature = "engine_profile")]
fn record_engine_profile(label: &'static str, d: std::time::Duration) {
    ENGINE_PROFILE.with(|p| {
        let mut st = p.borrow_mut();
        *st.ns_per_label.entry(label.to_string()).or_insert(0) += d.as_nanos() as u64;
    });
}

/// Resets accumulated engine profile stats for the current thread.
#[cfg(feature = "engine_profile")]
pub fn reset_engine_profile() {
    ENGINE_PROFILE.with(|p| *p.borrow_mut() = EngineProfileStats::default());
}

/// Returns accumulated engine profile: state kind label → total nanoseconds.
#[cfg(feature = "engine_profile")]
pub fn get_engine_profile() -> HashMap<String, u64> {
    ENGINE_PROFILE.with(|p| p.borrow().ns_per_label.clone())
}

#[cfg(feature = "engine_profile")]
struct ProfileGuard {
    label: &'static str,
    start: Instant,
}

#[cfg(feature = "engine_profile")]
impl ProfileGuard {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

#[cfg(feature = "engine_profile")]
impl Drop for ProfileGuard {
    fn drop(&mut self) {
        record_engine_profile(self.label, self.start.elapsed());
    }
}

#[cfg(not(feature = "engine_profile"))]
/// No-op when the `engine_profile` feature is not enabled.
pub fn reset_engine_profile() {}

#[cfg(not(feature = "engine_profile"))]
/// Returns an empty map when the `engine_profile` feature is not enabled.
pub fn get_engine_profile() -> HashMap<String, u64> {
    HashMap::new()
}
