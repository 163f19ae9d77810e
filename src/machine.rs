//! Compiled state machine: states in a dense arena, transitions as id references.
//!
//! A [`StateMachine`] is produced once by [`StateMachineBuilder::build`] and never mutated
//! afterwards, so it can be shared between threads and interpreted concurrently.
//!
//! Outgoing transitions of a state are kept sorted by descending priority (stable for equal
//! priorities). The engine takes the first transition whose condition matches, which is what
//! makes the machine deterministic.

use crate::ast::{FieldDeclaration, FieldType};
use crate::value::Value;
use std::fmt::{self, Write as _};
use std::ops::Range;

/// Priority of unconditional edges (fixed text and required fields).
pub const PRIORITY_ALWAYS: u8 = 10;
/// Priority of edges into an optional section.
pub const PRIORITY_OPTIONAL: u8 = 5;

/// Index of a state in its machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Maps the raw bytes of a field to a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// UTF-8 text.
    Identity,
    /// Integer, else finite decimal; surrounding ASCII whitespace ignored.
    Number,
    /// `true/1/yes/on` or `false/0/no/off`, case-insensitive.
    Boolean,
    /// Raw copy.
    Bytes,
    /// UTF-8 text; membership is checked by the caller.
    Enum,
}

impl Converter {
    pub fn for_type(field_type: &FieldType) -> Self {
        match field_type {
            FieldType::String => Converter::Identity,
            FieldType::Number => Converter::Number,
            FieldType::Boolean => Converter::Boolean,
            FieldType::Bytes => Converter::Bytes,
            FieldType::Enum(_) => Converter::Enum,
        }
    }

    /// Convert `raw`; the error is a human-readable reason.
    pub fn apply(self, raw: &[u8]) -> Result<Value, String> {
        match self {
            Converter::Bytes => Ok(Value::Bytes(raw.to_vec())),
            Converter::Identity | Converter::Enum => std::str::from_utf8(raw)
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| format!("invalid UTF-8: {}", e)),
            Converter::Number => {
                let text = std::str::from_utf8(raw)
                    .map_err(|_| "number is not valid UTF-8".to_string())?
                    .trim_matches(|c: char| c.is_ascii_whitespace());
                if let Ok(n) = text.parse::<i64>() {
                    return Ok(Value::Int(n));
                }
                match text.parse::<f64>() {
                    Ok(x) if x.is_finite() && !text.is_empty() => Ok(Value::Float(x)),
                    _ => Err(format!("`{}` is not a number", text)),
                }
            }
            Converter::Boolean => {
                let text = String::from_utf8_lossy(raw);
                match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                    other => Err(format!("`{}` is not a boolean", other)),
                }
            }
        }
    }
}

/// Extraction performed by a field state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extract {
    pub target: String,
    pub converter: Converter,
    pub required: bool,
}

/// State kind with the data each kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Init,
    ExpectFixed {
        expected: Vec<u8>,
    },
    ExtractField(Extract),
    ExpectDelimiter {
        delimiter: Vec<u8>,
    },
    OptionalField {
        extract: Extract,
        prefix: Vec<u8>,
        suffix: Vec<u8>,
    },
    Accept,
    Error {
        message: String,
    },
}

impl StateKind {
    pub fn label(&self) -> &'static str {
        match self {
            StateKind::Init => "Init",
            StateKind::ExpectFixed { .. } => "ExpectFixed",
            StateKind::ExtractField(_) => "ExtractField",
            StateKind::ExpectDelimiter { .. } => "ExpectDelimiter",
            StateKind::OptionalField { .. } => "OptionalField",
            StateKind::Accept => "Accept",
            StateKind::Error { .. } => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StateKind::Accept | StateKind::Error { .. })
    }

    /// Literal a field boundary can be searched for, if this state starts with one.
    pub fn literal(&self) -> Option<&[u8]> {
        match self {
            StateKind::ExpectFixed { expected } => Some(expected),
            StateKind::ExpectDelimiter { delimiter } => Some(delimiter),
            _ => None,
        }
    }
}

/// The action a state performs, viewed independently of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    Validate { expected: &'a [u8] },
    Extract(&'a Extract),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    OnMatch(Vec<u8>),
    OnDelimiter,
    OnLength(usize),
    OnOptional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: StateId,
    pub to: StateId,
    pub condition: Condition,
    pub priority: u8,
}

/// Where a state came from in the format string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMetadata {
    pub token_index: Option<usize>,
    pub span: Option<Range<usize>>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub id: StateId,
    pub kind: StateKind,
    pub transitions: Vec<Transition>,
    pub metadata: StateMetadata,
}

impl State {
    pub fn action(&self) -> Option<Action<'_>> {
        match &self.kind {
            StateKind::ExpectFixed { expected } => Some(Action::Validate { expected }),
            StateKind::ExpectDelimiter { delimiter } => Some(Action::Validate {
                expected: delimiter,
            }),
            StateKind::ExtractField(extract) | StateKind::OptionalField { extract, .. } => {
                Some(Action::Extract(extract))
            }
            StateKind::Init | StateKind::Accept | StateKind::Error { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.kind {
            StateKind::Error { message } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("initial state is missing or unknown")]
    NoInitialState,
    #[error("machine has no accept state")]
    NoAcceptState,
    #[error("state {state} has more than one unconditional transition")]
    AmbiguousTransition { state: StateId },
    #[error("transition {from} -> {to} references an unknown state")]
    UnknownState { from: StateId, to: StateId },
}

/// Immutable state graph for one message type.
#[derive(Debug, Clone)]
pub struct StateMachine {
    states: Vec<State>,
    initial: StateId,
    accept: Vec<StateId>,
    error: Vec<StateId>,
    source_format: String,
    message_type: String,
    fields: Vec<FieldDeclaration>,
}

impl StateMachine {
    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(id.0)
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn initial_state(&self) -> StateId {
        self.initial
    }

    pub fn accept_states(&self) -> &[StateId] {
        &self.accept
    }

    pub fn error_states(&self) -> &[StateId] {
        &self.error
    }

    pub fn source_format(&self) -> &str {
        &self.source_format
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Declarations the output record is assembled from (declared and synthesized).
    pub fn field_declarations(&self) -> &[FieldDeclaration] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDeclaration> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn transitions_from(&self, id: StateId) -> &[Transition] {
        self.state(id).map(|s| s.transitions.as_slice()).unwrap_or(&[])
    }

    /// Target of the highest-priority transition out of `id`.
    pub fn successor(&self, id: StateId) -> Option<&State> {
        let t = self.transitions_from(id).first()?;
        self.state(t.to)
    }

    pub fn transition_count(&self) -> usize {
        self.states.iter().map(|s| s.transitions.len()).sum()
    }

    /// Text rendering of the graph, one state per line followed by its edges.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "machine {} ({} states, {} transitions)",
            self.message_type,
            self.states.len(),
            self.transition_count()
        );
        for s in &self.states {
            let detail = match &s.kind {
                StateKind::ExpectFixed { expected } => {
                    format!(" {:?}", String::from_utf8_lossy(expected))
                }
                StateKind::ExpectDelimiter { delimiter } => {
                    format!(" {:?}", String::from_utf8_lossy(delimiter))
                }
                StateKind::ExtractField(e) => format!(" {} ({:?})", e.target, e.converter),
                StateKind::OptionalField {
                    extract,
                    prefix,
                    suffix,
                } => format!(
                    " {} ({:?}) prefix={:?} suffix={:?}",
                    extract.target,
                    extract.converter,
                    String::from_utf8_lossy(prefix),
                    String::from_utf8_lossy(suffix)
                ),
                StateKind::Error { message } => format!(" {:?}", message),
                StateKind::Init | StateKind::Accept => String::new(),
            };
            let marker = if s.id == self.initial { "*" } else { " " };
            let _ = writeln!(out, "{}{} {}{}", marker, s.id, s.kind.label(), detail);
            for t in &s.transitions {
                let _ = writeln!(out, "    -> {} {:?} p{}", t.to, t.condition, t.priority);
            }
        }
        out
    }
}

/// Assembles a [`StateMachine`] and validates it on [`build`](StateMachineBuilder::build).
#[derive(Debug, Default)]
pub struct StateMachineBuilder {
    states: Vec<State>,
    initial: Option<StateId>,
    source_format: String,
    message_type: String,
    fields: Vec<FieldDeclaration>,
    dangling: Vec<Transition>,
}

impl StateMachineBuilder {
    pub fn new(message_type: impl Into<String>) -> Self {
        StateMachineBuilder {
            message_type: message_type.into(),
            ..Default::default()
        }
    }

    pub fn source_format(&mut self, format: impl Into<String>) -> &mut Self {
        self.source_format = format.into();
        self
    }

    pub fn fields(&mut self, fields: Vec<FieldDeclaration>) -> &mut Self {
        self.fields = fields;
        self
    }

    pub fn add_state(&mut self, kind: StateKind) -> StateId {
        self.add_state_with(kind, StateMetadata::default())
    }

    pub fn add_state_with(&mut self, kind: StateKind, metadata: StateMetadata) -> StateId {
        let id = StateId(self.states.len());
        self.states.push(State {
            id,
            kind,
            transitions: Vec::new(),
            metadata,
        });
        id
    }

    pub fn set_initial(&mut self, id: StateId) -> &mut Self {
        self.initial = Some(id);
        self
    }

    /// Add an edge. Edges from an unknown state are reported by [`build`](Self::build).
    pub fn add_transition(
        &mut self,
        from: StateId,
        to: StateId,
        condition: Condition,
        priority: u8,
    ) -> &mut Self {
        let transition = Transition {
            from,
            to,
            condition,
            priority,
        };
        match self.states.get_mut(from.0) {
            Some(state) => {
                let at = state
                    .transitions
                    .iter()
                    .position(|t| t.priority < priority)
                    .unwrap_or(state.transitions.len());
                state.transitions.insert(at, transition);
            }
            None => self.dangling.push(transition),
        }
        self
    }

    pub fn build(self) -> Result<StateMachine, BuildError> {
        if let Some(t) = self.dangling.first() {
            return Err(BuildError::UnknownState {
                from: t.from,
                to: t.to,
            });
        }
        let initial = self
            .initial
            .filter(|id| id.0 < self.states.len())
            .ok_or(BuildError::NoInitialState)?;
        let accept: Vec<StateId> = self
            .states
            .iter()
            .filter(|s| matches!(s.kind, StateKind::Accept))
            .map(|s| s.id)
            .collect();
        if accept.is_empty() {
            return Err(BuildError::NoAcceptState);
        }
        for s in &self.states {
            if let Some(t) = s.transitions.iter().find(|t| t.to.0 >= self.states.len()) {
                return Err(BuildError::UnknownState {
                    from: t.from,
                    to: t.to,
                });
            }
            let always = s
                .transitions
                .iter()
                .filter(|t| t.condition == Condition::Always)
                .count();
            if always > 1 {
                return Err(BuildError::AmbiguousTransition { state: s.id });
            }
        }
        let error = self
            .states
            .iter()
            .filter(|s| matches!(s.kind, StateKind::Error { .. }))
            .map(|s| s.id)
            .collect();
        Ok(StateMachine {
            states: self.states,
            initial,
            accept,
            error,
            source_format: self.source_format,
            message_type: self.message_type,
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(s: &str) -> StateKind {
        StateKind::ExpectFixed {
            expected: s.as_bytes().to_vec(),
        }
    }

    #[test]
    fn two_unconditional_edges_are_ambiguous() {
        let mut b = StateMachineBuilder::new("M");
        let init = b.add_state(StateKind::Init);
        let a = b.add_state(fixed("a"));
        let c = b.add_state(fixed("c"));
        let accept = b.add_state(StateKind::Accept);
        b.set_initial(init)
            .add_transition(init, a, Condition::Always, PRIORITY_ALWAYS)
            .add_transition(init, c, Condition::Always, PRIORITY_ALWAYS)
            .add_transition(a, accept, Condition::Always, PRIORITY_ALWAYS)
            .add_transition(c, accept, Condition::Always, PRIORITY_ALWAYS);
        assert_eq!(
            b.build().unwrap_err(),
            BuildError::AmbiguousTransition { state: init }
        );
    }

    #[test]
    fn missing_initial_or_accept_fails() {
        let mut b = StateMachineBuilder::new("M");
        b.add_state(StateKind::Accept);
        assert_eq!(b.build().unwrap_err(), BuildError::NoInitialState);

        let mut b = StateMachineBuilder::new("M");
        let init = b.add_state(StateKind::Init);
        b.set_initial(init);
        assert_eq!(b.build().unwrap_err(), BuildError::NoAcceptState);

        let mut b = StateMachineBuilder::new("M");
        b.add_state(StateKind::Accept);
        b.set_initial(StateId(7));
        assert_eq!(b.build().unwrap_err(), BuildError::NoInitialState);
    }

    #[test]
    fn unknown_target_fails() {
        let mut b = StateMachineBuilder::new("M");
        let init = b.add_state(StateKind::Init);
        b.add_state(StateKind::Accept);
        b.set_initial(init)
            .add_transition(init, StateId(9), Condition::Always, PRIORITY_ALWAYS);
        assert!(matches!(
            b.build(),
            Err(BuildError::UnknownState { to: StateId(9), .. })
        ));
    }

    #[test]
    fn transitions_sorted_by_descending_priority() {
        let mut b = StateMachineBuilder::new("M");
        let init = b.add_state(StateKind::Init);
        let x = b.add_state(fixed("x"));
        let y = b.add_state(fixed("y"));
        let accept = b.add_state(StateKind::Accept);
        b.set_initial(init)
            .add_transition(init, x, Condition::OnOptional, PRIORITY_OPTIONAL)
            .add_transition(init, y, Condition::OnMatch(b"y".to_vec()), 7)
            .add_transition(init, accept, Condition::Always, PRIORITY_ALWAYS);
        let m = b.build().expect("build");
        let priorities: Vec<u8> = m.transitions_from(init).iter().map(|t| t.priority).collect();
        assert_eq!(priorities, vec![10, 7, 5]);
        assert_eq!(m.successor(init).map(|s| s.id), Some(accept));
    }

    #[test]
    fn actions_and_description() {
        let mut b = StateMachineBuilder::new("Ping");
        let init = b.add_state(StateKind::Init);
        let lit = b.add_state(fixed("PING "));
        let arg = b.add_state(StateKind::ExtractField(Extract {
            target: "arg".to_string(),
            converter: Converter::Identity,
            required: true,
        }));
        let accept = b.add_state(StateKind::Accept);
        let reject = b.add_state(StateKind::Error {
            message: "bad ping".to_string(),
        });
        b.set_initial(init)
            .add_transition(init, lit, Condition::Always, PRIORITY_ALWAYS)
            .add_transition(lit, arg, Condition::Always, PRIORITY_ALWAYS)
            .add_transition(arg, accept, Condition::Always, PRIORITY_ALWAYS);
        let m = b.build().expect("build");

        assert_eq!(
            m.state(lit).and_then(State::action),
            Some(Action::Validate { expected: b"PING " })
        );
        assert!(matches!(
            m.state(arg).and_then(State::action),
            Some(Action::Extract(e)) if e.target == "arg"
        ));
        assert_eq!(m.state(init).and_then(State::action), None);
        assert_eq!(m.state(reject).and_then(State::error_message), Some("bad ping"));
        assert!(m.state(accept).is_some_and(State::is_terminal));
        assert_eq!(m.error_states(), &[reject]);

        let text = m.describe();
        assert!(text.starts_with("machine Ping (5 states, 3 transitions)"));
        assert!(text.contains("*s0 Init"));
        assert!(text.contains("s1 ExpectFixed \"PING \""));
    }

    #[test]
    fn number_converter() {
        assert_eq!(Converter::Number.apply(b" 42 "), Ok(Value::Int(42)));
        assert_eq!(Converter::Number.apply(b"-1.5"), Ok(Value::Float(-1.5)));
        assert!(Converter::Number.apply(b"abc").is_err());
        assert!(Converter::Number.apply(b"").is_err());
        assert!(Converter::Number.apply(b"inf").is_err());
    }

    #[test]
    fn boolean_converter() {
        assert_eq!(Converter::Boolean.apply(b"Yes"), Ok(Value::Bool(true)));
        assert_eq!(Converter::Boolean.apply(b"0"), Ok(Value::Bool(false)));
        assert!(Converter::Boolean.apply(b"maybe").is_err());
    }

    #[test]
    fn identity_rejects_invalid_utf8() {
        assert!(Converter::Identity.apply(&[0xff, 0xfe]).is_err());
        assert_eq!(
            Converter::Bytes.apply(&[0xff]),
            Ok(Value::Bytes(vec![0xff]))
        );
    }
}
