//! Instruction IR for snapshot artifacts.
//!
//! Each type renders to exactly one artifact line (instructions) or one inline
//! fragment (expressions); `artifact::parse` reads the same grammar back.
use std::fmt::{self, Write as _};

use crate::runtime::types::TypeName;
use crate::runtime::value::Key;

/// Walk-unique name for one captured composite or handle, rendered `$N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub u64);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// EXPRESSIONS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
    Seq(Vec<(Key, Expr)>),
    /// `ty::Variant`
    Variant { ty: TypeName, variant: String },
    /// `ty::from(backing)`
    FromBacking { ty: TypeName, backing: Box<Expr> },
    Symbol(Symbol),
    /// `/* note */ expr`
    Annotated { note: String, expr: Box<Expr> },
}

impl Expr {
    pub fn annotated(note: impl Into<String>, expr: Expr) -> Self {
        Expr::Annotated { note: note.into(), expr: Box::new(expr) }
    }

    pub fn str(s: &str) -> Self {
        Expr::Str(s.as_bytes().to_vec())
    }

    /// Symbols referenced anywhere inside this expression.
    pub fn symbols(&self, out: &mut Vec<Symbol>) {
        match self {
            Expr::Symbol(s) => out.push(*s),
            Expr::Seq(entries) => entries.iter().for_each(|(_, e)| e.symbols(out)),
            Expr::FromBacking { backing, .. } => backing.symbols(out),
            Expr::Annotated { expr, .. } => expr.symbols(out),
            _ => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Null => f.write_str("null"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Int(i) => write!(f, "{i}"),
            Expr::Float(x) => f.write_str(&render_float(*x)),
            Expr::Str(bytes) => f.write_str(&quote_bytes(bytes)),
            Expr::Seq(entries) if entries.is_empty() => f.write_str("[]"),
            Expr::Seq(entries) => {
                f.write_char('[')?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_key(f, key)?;
                    write!(f, " => {value}")?;
                }
                f.write_char(']')
            }
            Expr::Variant { ty, variant } => write!(f, "{ty}::{variant}"),
            Expr::FromBacking { ty, backing } => write!(f, "{ty}::from({backing})"),
            Expr::Symbol(s) => write!(f, "{s}"),
            Expr::Annotated { note, expr } => {
                write!(f, "/* {} */ {expr}", comment_text(note))
            }
        }
    }
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &Key) -> fmt::Result {
    match key {
        Key::Int(i) => write!(f, "{i}"),
        Key::Str(bytes) => f.write_str(&quote_bytes(bytes)),
    }
}

/// Comment bodies stay on one line and never close early.
fn comment_text(note: &str) -> String {
    note.replace("*/", "* /")
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Shortest round-trip text that still reads back as a float.
pub fn render_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let mut s = format!("{x:?}");
    if !s.contains(['.', 'e', 'E']) {
        s.push_str(".0");
    }
    s
}

/// Single-quoted literal; control bytes and invalid UTF-8 become escapes.
pub fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('\'');
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\0' => out.push_str("\\0"),
                c if c.is_ascii_control() => {
                    let _ = write!(out, "\\x{:02x}", c as u32);
                }
                c => out.push(c),
            }
        }
        for b in chunk.invalid() {
            let _ = write!(out, "\\x{b:02x}");
        }
    }
    out.push('\'');
    out
}

// ————————————————————————————————————————————————————————————————————————————
// INSTRUCTIONS
// ————————————————————————————————————————————————————————————————————————————

/// How an `Allocate` binds its symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    /// Blank instance, fields follow as `SetField`.
    Instance(TypeName),
    /// Blank instance of an opaque type; no fields follow.
    Placeholder(TypeName),
    /// Side-effecting recreation of an external resource.
    Recreate { kind: String, args: Vec<Expr> },
    /// Bound to null.
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Allocate { symbol: Symbol, allocation: Allocation },
    SetField { symbol: Symbol, owner: TypeName, field: String, value: Expr },
    SetRootStatic { ty: TypeName, field: String, value: Expr },
    SetRootGlobal { name: String, value: Expr },
}

impl Instruction {
    /// Symbols this instruction reads (not the one it defines).
    pub fn uses(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        match self {
            Instruction::Allocate { allocation: Allocation::Recreate { args, .. }, .. } => {
                args.iter().for_each(|a| a.symbols(&mut out));
            }
            Instruction::Allocate { .. } => {}
            Instruction::SetField { symbol, value, .. } => {
                out.push(*symbol);
                value.symbols(&mut out);
            }
            Instruction::SetRootStatic { value, .. } | Instruction::SetRootGlobal { value, .. } => {
                value.symbols(&mut out);
            }
        }
        out
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Allocate { symbol, allocation } => {
                write!(f, "alloc {symbol} ")?;
                match allocation {
                    Allocation::Instance(ty) => write!(f, "new {ty}"),
                    Allocation::Placeholder(ty) => write!(f, "placeholder {ty}"),
                    Allocation::Recreate { kind, args } => {
                        write!(f, "recreate {} (", quote_bytes(kind.as_bytes()))?;
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{arg}")?;
                        }
                        f.write_char(')')
                    }
                    Allocation::Unavailable { reason } => {
                        write!(f, "unavailable {}", quote_bytes(reason.as_bytes()))
                    }
                }
            }
            Instruction::SetField { symbol, owner, field, value } => {
                write!(f, "set {symbol} {owner}::{field} = {value}")
            }
            Instruction::SetRootStatic { ty, field, value } => {
                write!(f, "static {ty}::{field} = {value}")
            }
            Instruction::SetRootGlobal { name, value } => {
                write!(f, "global {} = {value}", quote_bytes(name.as_bytes()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(name: &str) -> TypeName {
        TypeName::parse(name).unwrap()
    }

    #[test]
    fn floats_always_read_as_floats() {
        assert_eq!(render_float(1.0), "1.0");
        assert_eq!(render_float(-0.0), "-0.0");
        assert_eq!(render_float(3.14), "3.14");
        assert_eq!(render_float(1e300), "1e300");
        assert_eq!(render_float(f64::NAN), "nan");
        assert_eq!(render_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn strings_escape_quotes_controls_and_invalid_utf8() {
        assert_eq!(quote_bytes(b"it's a test"), r"'it\'s a test'");
        assert_eq!(quote_bytes(b"a\\b\n\x01"), r"'a\\b\n\x01'");
        assert_eq!(quote_bytes(b"\xffok"), r"'\xffok'");
        assert_eq!(quote_bytes("héllo".as_bytes()), "'héllo'");
    }

    #[test]
    fn expressions_render_inline() {
        let seq = Expr::Seq(vec![
            (Key::Int(0), Expr::Int(1)),
            (Key::from("k"), Expr::Symbol(Symbol(2))),
        ]);
        assert_eq!(seq.to_string(), "[0 => 1, 'k' => $2]");
        assert_eq!(Expr::Seq(vec![]).to_string(), "[]");

        let backed = Expr::FromBacking { ty: ty("app.Suit"), backing: Box::new(Expr::str("h")) };
        assert_eq!(backed.to_string(), "app.Suit::from('h')");

        let note = Expr::annotated("evil */ note", Expr::Null);
        assert_eq!(note.to_string(), "/* evil * / note */ null");

        let multiline = Expr::annotated("callable closure\n@main.rs:3\r\t", Expr::Null);
        assert_eq!(multiline.to_string(), "/* callable closure @main.rs:3   */ null");
    }

    #[test]
    fn instructions_render_one_line_each() {
        let alloc = Instruction::Allocate {
            symbol: Symbol(2),
            allocation: Allocation::Recreate {
                kind: "stream".into(),
                args: vec![Expr::str("/tmp/x"), Expr::str("r"), Expr::Int(12)],
            },
        };
        assert_eq!(alloc.to_string(), "alloc $2 recreate 'stream' ('/tmp/x', 'r', 12)");

        let set = Instruction::SetField {
            symbol: Symbol(0),
            owner: ty("app.Config"),
            field: "inner".into(),
            value: Expr::Symbol(Symbol(1)),
        };
        assert_eq!(set.to_string(), "set $0 app.Config::inner = $1");
        assert_eq!(set.uses(), vec![Symbol(0), Symbol(1)]);

        let global = Instruction::SetRootGlobal { name: "counter".into(), value: Expr::Int(42) };
        assert_eq!(global.to_string(), "global 'counter' = 42");
    }
}
