//! Recursive value encoder.
use tracing::{debug, warn};

use super::buffer::InstructionBuffer;
use super::handler::{HandlerChain, ValueHandler};
use super::identity::IdentityRegistry;
use crate::error::{Error, Result};
use crate::ir::{Allocation, Expr, Instruction};
use crate::runtime::types::TypeRegistry;
use crate::runtime::value::{EnumMember, FieldKey, Key, ObjectRef, Value};

/// State of one in-flight walk. Never reused across snapshots.
pub struct Walk<'a> {
    pub types: &'a TypeRegistry,
    pub identities: IdentityRegistry,
    pub buffer: InstructionBuffer,
}

impl<'a> Walk<'a> {
    pub fn new(types: &'a TypeRegistry) -> Self {
        Self { types, identities: IdentityRegistry::new(), buffer: InstructionBuffer::new() }
    }

    pub fn into_buffer(self) -> InstructionBuffer {
        self.buffer
    }
}

pub struct ValueEncoder {
    handlers: HandlerChain,
}

impl ValueEncoder {
    pub fn new(additional: Vec<Box<dyn ValueHandler>>) -> Self {
        Self { handlers: HandlerChain::new(additional) }
    }

    /// Inline expression for `value`. Composites reached for the first time
    /// append their allocation and field setup to the walk's buffer.
    pub fn encode(&self, value: &Value, walk: &mut Walk<'_>) -> Result<Expr> {
        if let Some(handler) = self.handlers.find(value) {
            return handler.encode(value, walk, self);
        }
        match value {
            Value::Null => Ok(Expr::Null),
            Value::Bool(b) => Ok(Expr::Bool(*b)),
            Value::Int(i) => Ok(Expr::Int(*i)),
            Value::Float(x) => Ok(Expr::Float(*x)),
            Value::String(bytes) => Ok(Expr::Str(bytes.clone())),
            Value::Sequence(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    out.push((key.clone(), self.encode(item, walk)?));
                }
                Ok(Expr::Seq(out))
            }
            Value::Enum(member) => Ok(encode_enum(member)),
            Value::Object(obj) => self.encode_object(obj, walk),
            Value::Handle(handle) => {
                warn!(kind = handle.kind(), "no handler for handle kind, capturing as null");
                Ok(Expr::annotated(format!("unsupported handle kind: {}", handle.kind()), Expr::Null))
            }
            Value::Callable(callable) => {
                warn!(name = %callable.name, "callable value cannot be captured");
                Ok(Expr::annotated(format!("callable {}: cannot be captured", callable.name), Expr::Null))
            }
            Value::Foreign(foreign) => Err(Error::UnsupportedValueKind { kind: foreign.kind.clone() }),
        }
    }

    fn encode_object(&self, obj: &ObjectRef, walk: &mut Walk<'_>) -> Result<Expr> {
        let identity = obj.identity();
        if let Some(symbol) = walk.identities.lookup(identity) {
            return Ok(Expr::Symbol(symbol));
        }
        // registered before any field is visited, so cycles resolve to this symbol
        let symbol = walk.identities.register(identity);
        let ty = obj.type_name();
        let types = walk.types;

        let Some(descriptor) = types.get(ty.as_str()) else {
            warn!(%symbol, %ty, "type is not registered, capturing as null");
            walk.buffer.push_allocation(Instruction::Allocate {
                symbol,
                allocation: Allocation::Unavailable { reason: format!("type {ty} is not registered") },
            });
            return Ok(Expr::Symbol(symbol));
        };
        if descriptor.is_opaque() {
            warn!(%symbol, %ty, "opaque type, capturing as placeholder without fields");
            walk.buffer.push_allocation(Instruction::Allocate {
                symbol,
                allocation: Allocation::Placeholder(ty),
            });
            return Ok(Expr::Symbol(symbol));
        }

        debug!(%symbol, %ty, "allocating instance");
        walk.buffer.push_allocation(Instruction::Allocate {
            symbol,
            allocation: Allocation::Instance(ty.clone()),
        });

        let layout = types.instance_layout(ty.as_str())?;
        let slots: Vec<(FieldKey, Value)> = {
            let object = obj.borrow();
            layout
                .into_iter()
                .filter_map(|key| object.fields.get(&key).cloned().map(|v| (key, v)))
                .collect()
        };
        for (key, value) in slots {
            let value = self.encode(&value, walk)?;
            walk.buffer.push_field_setup(Instruction::SetField {
                symbol,
                owner: key.owner,
                field: key.name,
                value,
            });
        }
        Ok(Expr::Symbol(symbol))
    }
}

impl Default for ValueEncoder {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn encode_enum(member: &EnumMember) -> Expr {
    match &member.backing {
        None => Expr::Variant { ty: member.ty.clone(), variant: member.variant.clone() },
        Some(backing) => Expr::FromBacking {
            ty: member.ty.clone(),
            backing: Box::new(match backing {
                Key::Int(i) => Expr::Int(*i),
                Key::Str(s) => Expr::Str(s.clone()),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Symbol;
    use crate::runtime::Runtime;
    use crate::runtime::types::TypeDescriptor;
    use crate::runtime::value::Handle;

    fn runtime() -> Runtime {
        let mut types = TypeRegistry::new();
        types.register(TypeDescriptor::class("app.Node").field("next").field("label")).unwrap();
        types.register(TypeDescriptor::class("app.Secret").field("key").opaque()).unwrap();
        types.register(TypeDescriptor::enumeration("app.Suit").backed_variant("Hearts", "h")).unwrap();
        Runtime::new(types)
    }

    #[test]
    fn shared_composites_get_one_allocation() {
        let rt = runtime();
        let inner = rt.instantiate("app.Node").unwrap();
        rt.set_field(&inner, "label", Value::str("x")).unwrap();
        let outer = Value::list([Value::Object(inner.clone()), Value::Object(inner)]);

        let encoder = ValueEncoder::default();
        let mut walk = Walk::new(rt.types());
        let expr = encoder.encode(&outer, &mut walk).unwrap();

        assert_eq!(expr.to_string(), "[0 => $0, 1 => $0]");
        assert_eq!(walk.buffer.allocations().len(), 1);
        assert_eq!(walk.buffer.field_setup().len(), 1);
    }

    #[test]
    fn self_reference_terminates() {
        let rt = runtime();
        let node = rt.instantiate("app.Node").unwrap();
        rt.set_field(&node, "next", Value::Object(node.clone())).unwrap();

        let encoder = ValueEncoder::default();
        let mut walk = Walk::new(rt.types());
        let expr = encoder.encode(&Value::Object(node), &mut walk).unwrap();

        assert_eq!(expr, Expr::Symbol(Symbol(0)));
        assert_eq!(walk.buffer.field_setup()[0].to_string(), "set $0 app.Node::next = $0");
    }

    #[test]
    fn opaque_types_become_field_less_placeholders() {
        let rt = runtime();
        let secret = rt.instantiate("app.Secret").unwrap();
        rt.set_field(&secret, "key", Value::str("hunter2")).unwrap();

        let encoder = ValueEncoder::default();
        let mut walk = Walk::new(rt.types());
        encoder.encode(&Value::Object(secret), &mut walk).unwrap();

        assert_eq!(walk.buffer.allocations()[0].to_string(), "alloc $0 placeholder app.Secret");
        assert!(walk.buffer.field_setup().is_empty());
    }

    #[test]
    fn degrades_callables_and_unknown_handles_but_rejects_foreign_values() {
        let rt = runtime();
        let encoder = ValueEncoder::default();
        let mut walk = Walk::new(rt.types());

        let expr = encoder.encode(&Value::callable("on_load"), &mut walk).unwrap();
        assert_eq!(expr.to_string(), "/* callable on_load: cannot be captured */ null");

        let expr = encoder.encode(&Value::Handle(Handle::detached("socket")), &mut walk).unwrap();
        assert_eq!(expr.to_string(), "/* unsupported handle kind: socket */ null");

        let err = encoder.encode(&Value::list([Value::foreign("fiber")]), &mut walk);
        assert!(matches!(err, Err(Error::UnsupportedValueKind { kind }) if kind == "fiber"));
    }

    #[test]
    fn enums_encode_by_name_or_backing() {
        let rt = runtime();
        let encoder = ValueEncoder::default();
        let mut walk = Walk::new(rt.types());
        let hearts = rt.enum_member("app.Suit", "Hearts").unwrap();
        assert_eq!(encoder.encode(&hearts, &mut walk).unwrap().to_string(), "app.Suit::from('h')");
    }

    #[test]
    fn additional_handlers_run_before_builtins() {
        struct Redact;
        impl ValueHandler for Redact {
            fn can_handle(&self, value: &Value) -> bool {
                matches!(value, Value::String(_))
            }
            fn encode(&self, _: &Value, _: &mut Walk<'_>, _: &ValueEncoder) -> Result<Expr> {
                Ok(Expr::str("***"))
            }
        }

        let rt = runtime();
        let encoder = ValueEncoder::new(vec![Box::new(Redact)]);
        let mut walk = Walk::new(rt.types());
        let expr = encoder.encode(&Value::list([Value::str("pw"), Value::Int(1)]), &mut walk).unwrap();
        assert_eq!(expr.to_string(), "[0 => '***', 1 => 1]");
    }
}
