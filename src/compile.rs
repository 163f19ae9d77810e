//! Compile a tokenized format string and its field declarations into a [`StateMachine`].
//!
//! One state is created per token, between an `Init` state and an `Accept` state, plus one
//! `Error` state. Fixed text and required fields are entered with an `Always` edge
//! (priority 10); optional sections with an `OnOptional` edge (priority 5).

use crate::ast::FieldDeclaration;
use crate::lint::{lint_machine, LintMessage, LintRule, Severity};
use crate::machine::{
    BuildError, Condition, Converter, Extract, StateKind, StateMachine, StateMachineBuilder,
    StateMetadata, PRIORITY_ALWAYS, PRIORITY_OPTIONAL,
};
use crate::token::{tokenize, FormatError, ParsedFormat, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("format: {0}")]
    Format(#[from] FormatError),
    #[error("build: {0}")]
    Build(#[from] BuildError),
    #[error("field `{name}` is referenced by the format but not declared")]
    UndeclaredField { name: String },
}

/// What to do with a field the format references but the declarations omit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldPolicy {
    /// Synthesize a String declaration silently.
    #[default]
    Synthesize,
    /// Synthesize and report an [`LintRule::UndeclaredField`] warning.
    Warn,
    /// Fail with [`CompileError::UndeclaredField`].
    Reject,
}

/// A compiled machine with its non-fatal diagnostics.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub machine: StateMachine,
    pub diagnostics: Vec<LintMessage>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler {
    policy: FieldPolicy,
}

impl Compiler {
    pub fn new(policy: FieldPolicy) -> Self {
        Compiler { policy }
    }

    pub fn policy(&self) -> FieldPolicy {
        self.policy
    }

    /// Tokenize `format`, then [`compile`](Self::compile) it.
    pub fn compile_str(
        &self,
        format: &str,
        declarations: &[FieldDeclaration],
        message_type: &str,
    ) -> Result<Compiled, CompileError> {
        let parsed = tokenize(format)?;
        self.compile(&parsed, declarations, message_type)
    }

    pub fn compile(
        &self,
        parsed: &ParsedFormat,
        declarations: &[FieldDeclaration],
        message_type: &str,
    ) -> Result<Compiled, CompileError> {
        let mut diagnostics = Vec::new();
        let fields = self.resolve_fields(parsed, declarations, &mut diagnostics)?;

        let mut builder = StateMachineBuilder::new(message_type);
        builder.source_format(parsed.source.as_str());

        let init = builder.add_state(StateKind::Init);
        builder.set_initial(init);
        let mut prev = init;

        for (index, token) in parsed.tokens.iter().enumerate() {
            let (kind, condition, priority) = match &token.kind {
                TokenKind::Fixed { text } => (
                    StateKind::ExpectFixed {
                        expected: text.as_bytes().to_vec(),
                    },
                    Condition::Always,
                    PRIORITY_ALWAYS,
                ),
                TokenKind::Field { name, .. } => (
                    StateKind::ExtractField(extract_for(&fields, name)),
                    Condition::Always,
                    PRIORITY_ALWAYS,
                ),
                TokenKind::Optional {
                    name,
                    prefix,
                    suffix,
                    ..
                } => (
                    StateKind::OptionalField {
                        extract: extract_for(&fields, name),
                        prefix: prefix.as_bytes().to_vec(),
                        suffix: suffix.as_bytes().to_vec(),
                    },
                    Condition::OnOptional,
                    PRIORITY_OPTIONAL,
                ),
            };
            let metadata = StateMetadata {
                token_index: Some(index),
                span: Some(token.start..token.end),
                hint: token.hint().map(str::to_string),
            };
            let id = builder.add_state_with(kind, metadata);
            builder.add_transition(prev, id, condition, priority);
            prev = id;
        }

        let accept = builder.add_state(StateKind::Accept);
        builder.add_transition(prev, accept, Condition::Always, PRIORITY_ALWAYS);
        builder.add_state(StateKind::Error {
            message: format!("{} does not match `{}`", message_type, parsed.source),
        });
        builder.fields(fields);

        let machine = builder.build()?;
        diagnostics.extend(lint_machine(&machine));
        Ok(Compiled {
            machine,
            diagnostics,
        })
    }

    /// Declarations in schema order, followed by synthesized ones in format order.
    fn resolve_fields(
        &self,
        parsed: &ParsedFormat,
        declarations: &[FieldDeclaration],
        diagnostics: &mut Vec<LintMessage>,
    ) -> Result<Vec<FieldDeclaration>, CompileError> {
        let mut fields = declarations.to_vec();
        for token in parsed.field_tokens() {
            let Some(name) = token.field_name() else {
                continue;
            };
            if fields.iter().any(|f| f.name == name) {
                continue;
            }
            match self.policy {
                FieldPolicy::Reject => {
                    return Err(CompileError::UndeclaredField {
                        name: name.to_string(),
                    })
                }
                FieldPolicy::Warn => diagnostics.push(LintMessage {
                    state: None,
                    rule: LintRule::UndeclaredField,
                    severity: Severity::Warning,
                    message: format!("field `{}` is not declared; treated as string", name),
                }),
                FieldPolicy::Synthesize => {}
            }
            fields.push(FieldDeclaration::synthesized(name, token.required()));
        }
        Ok(fields)
    }
}

fn extract_for(fields: &[FieldDeclaration], name: &str) -> Extract {
    let decl = fields.iter().find(|f| f.name == name);
    Extract {
        target: name.to_string(),
        converter: decl.map_or(Converter::Identity, |d| Converter::for_type(&d.field_type)),
        required: decl.map_or(true, |d| d.required),
    }
}

/// Compile with the default [`FieldPolicy`], discarding diagnostics.
pub fn compile(
    parsed: &ParsedFormat,
    declarations: &[FieldDeclaration],
    message_type: &str,
) -> Result<StateMachine, CompileError> {
    Compiler::default()
        .compile(parsed, declarations, message_type)
        .map(|c| c.machine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FieldType;
    use crate::machine::StateId;

    fn parsed(format: &str) -> ParsedFormat {
        tokenize(format).expect("tokenize")
    }

    #[test]
    fn one_state_per_token_plus_structural_states() {
        let p = parsed("START {id} | {payload} [TIMEOUT:{seconds}]\n\n");
        let m = compile(&p, &[], "Start").expect("compile");
        assert_eq!(m.states().len(), p.tokens.len() + 3);
        assert_eq!(m.initial_state(), StateId(0));
        assert_eq!(m.accept_states(), &[StateId(p.tokens.len() + 1)]);
        assert_eq!(m.error_states(), &[StateId(p.tokens.len() + 2)]);
        assert_eq!(m.transition_count(), p.tokens.len() + 1);
    }

    #[test]
    fn optional_edges_use_lower_priority() {
        let p = parsed("A{x}[:{y}]B");
        let m = compile(&p, &[], "M").expect("compile");
        let into_optional = &m.transitions_from(StateId(2))[0];
        assert_eq!(into_optional.condition, Condition::OnOptional);
        assert_eq!(into_optional.priority, PRIORITY_OPTIONAL);
        let out_of_optional = &m.transitions_from(StateId(3))[0];
        assert_eq!(out_of_optional.condition, Condition::Always);
        assert_eq!(out_of_optional.priority, PRIORITY_ALWAYS);
    }

    #[test]
    fn converters_follow_declared_types() {
        let p = parsed("{n} {flag} {raw} {text}");
        let decls = vec![
            FieldDeclaration::new("n", FieldType::Number),
            FieldDeclaration::new("flag", FieldType::Boolean).optional(),
            FieldDeclaration::new("raw", FieldType::Bytes),
        ];
        let m = compile(&p, &decls, "M").expect("compile");
        let extracts: Vec<(String, Converter, bool)> = m
            .states()
            .iter()
            .filter_map(|s| match &s.kind {
                StateKind::ExtractField(e) => Some((e.target.clone(), e.converter, e.required)),
                _ => None,
            })
            .collect();
        assert_eq!(
            extracts,
            vec![
                ("n".to_string(), Converter::Number, true),
                ("flag".to_string(), Converter::Boolean, false),
                ("raw".to_string(), Converter::Bytes, true),
                ("text".to_string(), Converter::Identity, true),
            ]
        );
        assert_eq!(m.field_declarations().len(), 4);
        assert_eq!(m.field("text").map(|f| f.field_type.clone()), Some(FieldType::String));
    }

    #[test]
    fn synthesized_optional_field_is_not_required() {
        let p = parsed("a[:{y}]");
        let m = compile(&p, &[], "M").expect("compile");
        assert_eq!(m.field("y").map(|f| f.required), Some(false));
    }

    #[test]
    fn field_policy_warn_and_reject() {
        let p = parsed("{a}");
        let warned = Compiler::new(FieldPolicy::Warn)
            .compile(&p, &[], "M")
            .expect("compile");
        assert!(warned
            .diagnostics
            .iter()
            .any(|d| d.rule == LintRule::UndeclaredField));
        assert_eq!(
            Compiler::new(FieldPolicy::Reject).compile(&p, &[], "M").unwrap_err(),
            CompileError::UndeclaredField {
                name: "a".to_string()
            }
        );
        let quiet = Compiler::default().compile(&p, &[], "M").expect("compile");
        assert!(quiet.diagnostics.is_empty());
    }

    #[test]
    fn compile_is_deterministic() {
        for format in ["{a}", "x{a}y[p{b}s]z", "START {id} | {payload} [TIMEOUT:{seconds}]\n\n"] {
            let p = parsed(format);
            let m1 = compile(&p, &[], "M").expect("compile");
            let m2 = compile(&p, &[], "M").expect("compile");
            assert_eq!(m1.states(), m2.states());
            assert_eq!(m1.transition_count(), m2.transition_count());
        }
    }

    #[test]
    fn format_errors_propagate() {
        assert!(matches!(
            Compiler::default().compile_str("{", &[], "M"),
            Err(CompileError::Format(FormatError::UnclosedPlaceholder { position: 0 }))
        ));
    }

    #[test]
    fn empty_format_goes_straight_to_accept() {
        let m = compile(&parsed(""), &[], "Empty").expect("compile");
        assert_eq!(m.successor(m.initial_state()).map(|s| s.kind.clone()), Some(StateKind::Accept));
    }
}
