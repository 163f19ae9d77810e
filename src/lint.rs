//! Build-time diagnostics for compiled machines.
//!
//! ## Rules
//!
//! - **Unreachable state**: a state (other than an `Error` state) that no path from the
//!   initial state reaches.
//! - **Shadowed transition**: a state with an `Always` edge and other edges; the `Always`
//!   edge is evaluated first by priority, so the others never fire.
//! - **Duplicate field**: the same field is extracted by more than one state; the last value
//!   wins.
//! - **Unreferenced required field**: a required declaration no state extracts; every run
//!   will fail with `MissingRequiredField`.
//!
//! Findings are warnings: they never block a compile. Compile errors are turned into
//! error-level messages with [`LintMessage::from_compile_error`] so tools can report both the
//! same way. Run the `lint_format` binary over schema files: `lint_format proto.fmt`.

use crate::compile::CompileError;
use crate::machine::{Condition, StateId, StateKind, StateMachine};
use std::collections::{HashSet, VecDeque};

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    UnreachableState,
    ShadowedTransition,
    DuplicateField,
    UnreferencedRequiredField,
    /// Field referenced by the format but not declared (reported by the compiler).
    UndeclaredField,
    /// The format or the machine failed to compile.
    CompileFailure,
}

impl LintRule {
    pub fn id(self) -> &'static str {
        match self {
            LintRule::UnreachableState => "unreachable-state",
            LintRule::ShadowedTransition => "shadowed-transition",
            LintRule::DuplicateField => "duplicate-field",
            LintRule::UnreferencedRequiredField => "unreferenced-required-field",
            LintRule::UndeclaredField => "undeclared-field",
            LintRule::CompileFailure => "compile-failure",
        }
    }
}

/// A single lint message, attached to a state when one applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintMessage {
    pub state: Option<StateId>,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

impl LintMessage {
    pub fn from_compile_error(err: &CompileError) -> Self {
        let state = match err {
            CompileError::Build(crate::machine::BuildError::AmbiguousTransition { state }) => {
                Some(*state)
            }
            _ => None,
        };
        LintMessage {
            state,
            rule: LintRule::CompileFailure,
            severity: Severity::Error,
            message: err.to_string(),
        }
    }
}

/// Run all rules on a machine. Returns messages in state order per rule.
pub fn lint_machine(machine: &StateMachine) -> Vec<LintMessage> {
    let mut out = Vec::new();

    // Reachability
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([machine.initial_state()]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        for t in machine.transitions_from(id) {
            queue.push_back(t.to);
        }
    }
    for s in machine.states() {
        if !seen.contains(&s.id) && !matches!(s.kind, StateKind::Error { .. }) {
            out.push(LintMessage {
                state: Some(s.id),
                rule: LintRule::UnreachableState,
                severity: Severity::Warning,
                message: format!("{} ({}) is not reachable from the initial state", s.id, s.kind.label()),
            });
        }
    }

    // Always edges shadow their siblings
    for s in machine.states() {
        let has_always = s.transitions.iter().any(|t| t.condition == Condition::Always);
        if has_always && s.transitions.len() > 1 {
            out.push(LintMessage {
                state: Some(s.id),
                rule: LintRule::ShadowedTransition,
                severity: Severity::Warning,
                message: format!(
                    "{} mixes an unconditional transition with {} other(s); they never fire",
                    s.id,
                    s.transitions.len() - 1
                ),
            });
        }
    }

    // Field usage
    let mut extracted: Vec<&str> = Vec::new();
    for s in machine.states() {
        let target = match &s.kind {
            StateKind::ExtractField(e) | StateKind::OptionalField { extract: e, .. } => &e.target,
            _ => continue,
        };
        if extracted.contains(&target.as_str()) {
            out.push(LintMessage {
                state: Some(s.id),
                rule: LintRule::DuplicateField,
                severity: Severity::Warning,
                message: format!("field `{}` is extracted more than once; last value wins", target),
            });
        }
        extracted.push(target);
    }
    for f in machine.field_declarations() {
        if f.required && !extracted.contains(&f.name.as_str()) {
            out.push(LintMessage {
                state: None,
                rule: LintRule::UnreferencedRequiredField,
                severity: Severity::Warning,
                message: format!(
                    "required field `{}` does not appear in the format; parsing always fails",
                    f.name
                ),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldDeclaration, FieldType};
    use crate::compile::compile;
    use crate::machine::{StateMachineBuilder, PRIORITY_ALWAYS, PRIORITY_OPTIONAL};
    use crate::token::tokenize;

    #[test]
    fn compiled_machine_is_clean() {
        let p = tokenize("A{x}[:{y}]B").expect("tokenize");
        let m = compile(&p, &[], "M").expect("compile");
        assert!(lint_machine(&m).is_empty(), "{:?}", lint_machine(&m));
    }

    #[test]
    fn unreachable_and_shadowed() {
        let mut b = StateMachineBuilder::new("M");
        let init = b.add_state(StateKind::Init);
        let accept = b.add_state(StateKind::Accept);
        let orphan = b.add_state(StateKind::ExpectFixed {
            expected: b"x".to_vec(),
        });
        b.set_initial(init)
            .add_transition(init, accept, Condition::Always, PRIORITY_ALWAYS)
            .add_transition(init, orphan, Condition::OnOptional, PRIORITY_OPTIONAL)
            .add_transition(orphan, accept, Condition::Always, PRIORITY_ALWAYS);
        let m = b.build().expect("build");
        let rules: Vec<_> = lint_machine(&m).iter().map(|l| (l.rule, l.state)).collect();
        assert!(rules.contains(&(LintRule::ShadowedTransition, Some(init))));

        let mut b = StateMachineBuilder::new("M");
        let init = b.add_state(StateKind::Init);
        let accept = b.add_state(StateKind::Accept);
        let orphan = b.add_state(StateKind::Init);
        b.set_initial(init)
            .add_transition(init, accept, Condition::Always, PRIORITY_ALWAYS);
        let m = b.build().expect("build");
        let msgs = lint_machine(&m);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].rule, LintRule::UnreachableState);
        assert_eq!(msgs[0].state, Some(orphan));
        assert_eq!(msgs[0].severity, Severity::Warning);
    }

    #[test]
    fn duplicate_and_unreferenced_fields() {
        let p = tokenize("{a}-{a}").expect("tokenize");
        let decls = vec![
            FieldDeclaration::new("a", FieldType::String),
            FieldDeclaration::new("missing", FieldType::Number),
        ];
        let m = compile(&p, &decls, "M").expect("compile");
        let rules: Vec<_> = lint_machine(&m).iter().map(|l| l.rule).collect();
        assert_eq!(
            rules,
            vec![LintRule::DuplicateField, LintRule::UnreferencedRequiredField]
        );
    }

    #[test]
    fn compile_errors_become_error_messages() {
        let err = crate::compile::Compiler::default()
            .compile_str("{a", &[], "M")
            .unwrap_err();
        let msg = LintMessage::from_compile_error(&err);
        assert_eq!(msg.severity, Severity::Error);
        assert_eq!(msg.rule, LintRule::CompileFailure);
        assert!(msg.message.contains("unclosed placeholder"));
    }
}
