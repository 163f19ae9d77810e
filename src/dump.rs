//! Format decoded values for display (dump text). Uses the compiled machine for field order.

use crate::engine::Fields;
use crate::machine::StateMachine;
use crate::value::Value;

/// Space-separated lowercase hex.
pub fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// One-line rendering: strings quoted with escapes, bytes as hex, scalars as is.
pub fn value_to_dump(v: &Value) -> String {
    match v {
        Value::Null => "-".to_string(),
        Value::String(s) => format!("{:?}", s),
        Value::Bytes(b) => format!("hex({})", hex_string(b)),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => v.to_string(),
    }
}

/// Multi-line dump of a message: header line, then one `name: value` line per declared field
/// in declaration order, then any undeclared extras sorted by name.
pub fn message_to_dump(machine: &StateMachine, fields: &Fields, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut lines = vec![format!("{}{} {{", pad, machine.message_type())];
    for decl in machine.field_declarations() {
        if let Some(v) = fields.get(&decl.name) {
            lines.push(format!("{}  {}: {}", pad, decl.name, value_to_dump(v)));
        }
    }
    let mut extra: Vec<_> = fields
        .keys()
        .filter(|k| machine.field(k).is_none())
        .collect();
    extra.sort();
    for k in extra {
        if let Some(v) = fields.get(k) {
            lines.push(format!("{}  {}: {}", pad, k, value_to_dump(v)));
        }
    }
    lines.push(format!("{}}}", pad));
    lines.join("\n")
}

/// First `max` bytes of a payload as printable text, other bytes as `.`.
pub fn printable_prefix(bytes: &[u8], max: usize) -> String {
    bytes
        .iter()
        .take(max)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
