//! Restore as data replay: an artifact is read back and its instructions are
//! applied in order against a live [`Runtime`].
//!
//! No code is evaluated. Allocations go through the registered type table,
//! external resources through [`Reviver`]s keyed by handle kind.
use std::collections::HashMap;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::artifact;
use crate::error::{Error, Result};
use crate::ir::{Allocation, Expr, Instruction, Symbol};
use crate::runtime::Runtime;
use crate::runtime::value::{EnumMember, Handle, Key, STREAM_KIND, Value};
use crate::snapshot::buffer::InstructionBuffer;

/// Recreates one kind of external resource from its captured arguments.
pub trait Reviver {
    fn kind(&self) -> &str;
    fn revive(&self, args: &[Value]) -> std::result::Result<Value, ReviveError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ReviveError {
    /// Malformed arguments; aborts the restore.
    #[error(transparent)]
    Invalid(Error),
    /// The resource is gone; the symbol is bound to null.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reopens `(uri, mode, position)` and seeks to the recorded position.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamReviver;

impl Reviver for StreamReviver {
    fn kind(&self) -> &str {
        STREAM_KIND
    }

    fn revive(&self, args: &[Value]) -> std::result::Result<Value, ReviveError> {
        let invalid = |message: &str| {
            ReviveError::Invalid(Error::ReviveArguments {
                kind: STREAM_KIND.to_string(),
                message: message.to_string(),
            })
        };
        let [uri, mode, position] = args else {
            return Err(invalid("expected (uri, mode, position)"));
        };
        let uri = uri.as_str().ok_or_else(|| invalid("uri must be a string"))?;
        let mode = mode.as_str().ok_or_else(|| invalid("mode must be a string"))?;
        let position = position
            .as_int()
            .and_then(|p| u64::try_from(p).ok())
            .ok_or_else(|| invalid("position must be a non-negative integer"))?;

        // the file exists now; never truncate it or require it to be new
        let reopen_mode = match mode.replace('b', "").as_str() {
            "w" | "w+" | "x" | "x+" => "r+".to_string(),
            _ => mode.to_string(),
        };
        let handle = Handle::open(uri, &reopen_mode)?;
        handle.seek(position)?;
        Ok(Value::Handle(handle))
    }
}

/// Counts for one replayed artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub instructions: usize,
    /// Recreations that failed and were bound to null instead.
    pub degraded: usize,
}

pub struct Restorer {
    revivers: Vec<Box<dyn Reviver>>,
}

impl Restorer {
    pub fn new() -> Self {
        Self { revivers: vec![Box::new(StreamReviver)] }
    }

    /// Custom revivers are consulted before the built-ins.
    pub fn with_reviver(mut self, reviver: Box<dyn Reviver>) -> Self {
        self.revivers.insert(0, reviver);
        self
    }

    pub fn with_revivers(mut self, revivers: Vec<Box<dyn Reviver>>) -> Self {
        for reviver in revivers.into_iter().rev() {
            self.revivers.insert(0, reviver);
        }
        self
    }

    fn reviver(&self, kind: &str) -> Option<&dyn Reviver> {
        self.revivers.iter().find(|r| r.kind() == kind).map(|r| r.as_ref())
    }

    pub fn restore(&self, runtime: &mut Runtime, path: impl AsRef<Path>) -> Result<RestoreReport> {
        let path = path.as_ref();
        let buffer = artifact::read(path)?;
        let report = self.replay(runtime, &buffer)?;
        info!(
            path = %path.display(),
            instructions = report.instructions,
            degraded = report.degraded,
            "snapshot restored"
        );
        Ok(report)
    }

    /// Apply `buffer` in order. Stops at the first error; earlier effects stay.
    pub fn replay(&self, runtime: &mut Runtime, buffer: &InstructionBuffer) -> Result<RestoreReport> {
        artifact::verify(buffer)?;
        let mut replay = Replay { runtime, symbols: HashMap::new(), degraded: 0 };

        for instruction in buffer.iter() {
            match instruction {
                Instruction::Allocate { symbol, allocation } => {
                    let value = replay.allocate(self, *symbol, allocation)?;
                    replay.symbols.insert(*symbol, value);
                }
                Instruction::SetField { symbol, owner, field, value } => {
                    let target = match replay.symbols.get(symbol) {
                        Some(Value::Object(obj)) => obj.clone(),
                        _ => return Err(Error::NotAnInstance(*symbol)),
                    };
                    let value = replay.evaluate(value)?;
                    replay.runtime.set_field_of(&target, owner.as_str(), field, value)?;
                }
                Instruction::SetRootStatic { ty, field, value } => {
                    let value = replay.evaluate(value)?;
                    replay.runtime.set_static(ty.as_str(), field, value)?;
                }
                Instruction::SetRootGlobal { name, value } => {
                    let value = replay.evaluate(value)?;
                    replay.runtime.set_global(name.clone(), value);
                }
            }
        }

        Ok(RestoreReport { instructions: buffer.len(), degraded: replay.degraded })
    }
}

impl Default for Restorer {
    fn default() -> Self {
        Self::new()
    }
}

struct Replay<'r> {
    runtime: &'r mut Runtime,
    symbols: HashMap<Symbol, Value>,
    degraded: usize,
}

impl Replay<'_> {
    fn allocate(&mut self, restorer: &Restorer, symbol: Symbol, allocation: &Allocation) -> Result<Value> {
        match allocation {
            Allocation::Instance(ty) | Allocation::Placeholder(ty) => {
                debug!(%symbol, %ty, "instantiating");
                Ok(Value::Object(self.runtime.instantiate(ty.as_str())?))
            }
            Allocation::Recreate { kind, args } => {
                let reviver = restorer.reviver(kind).ok_or_else(|| Error::UnknownHandleKind(kind.clone()))?;
                let args = args.iter().map(|a| self.evaluate(a)).collect::<Result<Vec<_>>>()?;
                match reviver.revive(&args) {
                    Ok(value) => {
                        debug!(%symbol, %kind, "recreated handle");
                        Ok(value)
                    }
                    Err(ReviveError::Io(error)) => {
                        warn!(%symbol, %kind, %error, "could not recreate handle, binding null");
                        self.degraded += 1;
                        Ok(Value::Null)
                    }
                    Err(ReviveError::Invalid(error)) => Err(error),
                }
            }
            Allocation::Unavailable { reason } => {
                debug!(%symbol, %reason, "binding unavailable value to null");
                Ok(Value::Null)
            }
        }
    }

    fn evaluate(&self, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(x) => Value::Float(*x),
            Expr::Str(b) => Value::String(b.clone()),
            Expr::Seq(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    out.push((key.clone(), self.evaluate(item)?));
                }
                Value::Sequence(out)
            }
            Expr::Variant { ty, variant } => self.runtime.enum_member(ty.as_str(), variant)?,
            Expr::FromBacking { ty, backing } => {
                let key = match self.evaluate(backing)? {
                    Value::Int(i) => Key::Int(i),
                    Value::String(s) => Key::Str(s),
                    other => {
                        return Err(Error::UnmatchedBacking { ty: ty.to_string(), backing: other.kind_name().to_string() });
                    }
                };
                let variant = self.runtime.types().variant_by_backing(ty.as_str(), &key)?;
                Value::Enum(EnumMember { ty: ty.clone(), variant: variant.name.clone(), backing: Some(key) })
            }
            Expr::Symbol(symbol) => self.symbols.get(symbol).cloned().ok_or(Error::UndefinedSymbol(*symbol))?,
            Expr::Annotated { expr, .. } => self.evaluate(expr)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::parse;
    use crate::artifact::FORMAT_MARKER;
    use crate::runtime::types::{TypeDescriptor, TypeRegistry};

    fn runtime() -> Runtime {
        let mut types = TypeRegistry::new();
        types.register(TypeDescriptor::class("app.Node").field("next").private_field("id")).unwrap();
        types.register(TypeDescriptor::enumeration("app.Level").backed_variant("High", 2i64)).unwrap();
        Runtime::new(types)
    }

    fn artifact(body: &str) -> InstructionBuffer {
        parse(&format!("{FORMAT_MARKER}\n{body}")).unwrap()
    }

    #[test]
    fn replay_rebuilds_cycles_and_enums() {
        let buffer = artifact(
            "[allocate]\nalloc $0 new app.Node\n[fields]\nset $0 app.Node::next = $0\nset $0 app.Node::id = app.Level::from(2)\n[globals]\nglobal 'head' = $0\n",
        );
        let mut rt = runtime();
        let report = Restorer::new().replay(&mut rt, &buffer).unwrap();
        assert_eq!(report, RestoreReport { instructions: 4, degraded: 0 });

        let head = rt.global("head").and_then(Value::as_object).cloned().unwrap();
        let next = rt.field(&head, "next").unwrap().unwrap();
        assert!(next.as_object().unwrap().ptr_eq(&head));
        let id = rt.field(&head, "id").unwrap().unwrap();
        assert!(matches!(id, Value::Enum(EnumMember { ref variant, .. }) if variant == "High"));
    }

    #[test]
    fn missing_stream_degrades_to_null() {
        let buffer = artifact(
            "[allocate]\nalloc $0 recreate 'stream' ('/nonexistent/warmstart/log.txt', 'r', 0)\n[globals]\nglobal 'log' = $0\n",
        );
        let mut rt = runtime();
        let report = Restorer::new().replay(&mut rt, &buffer).unwrap();
        assert_eq!(report.degraded, 1);
        assert_eq!(rt.global("log"), Some(&Value::Null));
    }

    #[test]
    fn unknown_kinds_and_non_instance_targets_fail() {
        let mut rt = runtime();
        let buffer = artifact("[allocate]\nalloc $0 recreate 'socket' ()\n");
        assert!(matches!(Restorer::new().replay(&mut rt, &buffer), Err(Error::UnknownHandleKind(k)) if k == "socket"));

        let buffer = artifact("[allocate]\nalloc $0 unavailable 'gone'\n[fields]\nset $0 app.Node::next = 1\n");
        assert!(matches!(Restorer::new().replay(&mut rt, &buffer), Err(Error::NotAnInstance(Symbol(0)))));

        let buffer = artifact("[allocate]\nalloc $0 recreate 'stream' ('/tmp/x')\n");
        assert!(matches!(Restorer::new().replay(&mut rt, &buffer), Err(Error::ReviveArguments { .. })));
    }

    #[test]
    fn custom_revivers_take_priority() {
        struct Socket;
        impl Reviver for Socket {
            fn kind(&self) -> &str {
                "socket"
            }
            fn revive(&self, _: &[Value]) -> std::result::Result<Value, ReviveError> {
                Ok(Value::Handle(Handle::detached("socket")))
            }
        }

        let mut rt = runtime();
        let buffer = artifact("[allocate]\nalloc $0 recreate 'socket' ()\n[globals]\nglobal 's' = $0\n");
        Restorer::new().with_reviver(Box::new(Socket)).replay(&mut rt, &buffer).unwrap();
        assert_eq!(rt.global("s").and_then(Value::as_handle).map(|h| h.kind().to_string()), Some("socket".into()));
    }
}
