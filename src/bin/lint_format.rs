//! Compile every message of schema files and report diagnostics.
//!
//! Usage:
//!   lint_format [OPTIONS] [FILE ...]
//!   lint_format < schema.fmt
//!
//! Options:
//!   --human, -H      Human-readable output
//!   --describe, -d   Print each compiled machine
//!   --strict         Reject fields the format uses but the schema does not declare
//!
//! Exits with status 1 when any file fails to parse or compile.

use protofmt::{
    parse, Compiler, FieldPolicy, LintMessage, ResolvedProtocol, Severity,
};
use std::io::{self, Read};
use std::path::Path;

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_message(path: &str, message_type: &str, m: &LintMessage, style: OutputStyle) {
    let severity_str = match m.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    let state = m.state.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
    match style {
        OutputStyle::Compact => {
            println!(
                "{}:{}:{}: {}: {} [{}]",
                path,
                message_type,
                state,
                severity_str,
                m.message,
                m.rule.id()
            );
        }
        OutputStyle::Human => {
            println!("  {} {} ({}): {}", path, message_type, state, m.message);
            println!("    rule: {}", m.rule.id());
        }
    }
}

#[derive(Default)]
struct Totals {
    errors: usize,
    warnings: usize,
}

impl Totals {
    fn count(&mut self, m: &LintMessage) {
        match m.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
    }
}

fn lint_source(
    path: &str,
    src: &str,
    compiler: Compiler,
    style: OutputStyle,
    describe: bool,
    totals: &mut Totals,
) {
    let protocol = match parse(src).and_then(ResolvedProtocol::resolve) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            totals.errors += 1;
            return;
        }
    };
    for msg in protocol.messages() {
        match compiler.compile_str(&msg.format, &msg.fields, &msg.name) {
            Ok(compiled) => {
                for m in &compiled.diagnostics {
                    totals.count(m);
                    print_message(path, &msg.name, m, style);
                }
                if describe {
                    print!("{}", compiled.machine.describe());
                }
            }
            Err(e) => {
                let m = LintMessage::from_compile_error(&e);
                totals.count(&m);
                print_message(path, &msg.name, &m, style);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut take_flag = |names: &[&str]| {
        if let Some(pos) = args.iter().position(|a| names.contains(&a.as_str())) {
            args.remove(pos);
            true
        } else {
            false
        }
    };
    let style = if take_flag(&["--human", "-H"]) {
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };
    let describe = take_flag(&["--describe", "-d"]);
    let policy = if take_flag(&["--strict"]) {
        FieldPolicy::Reject
    } else {
        FieldPolicy::Warn
    };
    let compiler = Compiler::new(policy);

    let mut totals = Totals::default();
    if args.is_empty() {
        let mut src = String::new();
        io::stdin().read_to_string(&mut src)?;
        lint_source("<stdin>", &src, compiler, style, describe, &mut totals);
    } else {
        for path in &args {
            let path = Path::new(path);
            let src = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{}: {}", path.display(), e);
                    totals.errors += 1;
                    continue;
                }
            };
            let display_path = path.display().to_string();
            lint_source(&display_path, &src, compiler, style, describe, &mut totals);
        }
    }

    if totals.errors > 0 || totals.warnings > 0 {
        eprintln!(
            "lint: {} error(s), {} warning(s)",
            totals.errors, totals.warnings
        );
    }
    if totals.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
