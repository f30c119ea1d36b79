//! Per-walk identity table: one symbol per live composite or handle.
use std::collections::HashMap;

use crate::ir::Symbol;
use crate::runtime::value::IdentityKey;

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    symbols: HashMap<IdentityKey, Symbol>,
    next: u64,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: IdentityKey) -> bool {
        self.symbols.contains_key(&key)
    }

    /// Issue the next symbol for `key`. Callers check [`Self::lookup`] first.
    pub fn register(&mut self, key: IdentityKey) -> Symbol {
        debug_assert!(!self.contains(key), "identity registered twice in one walk");
        let symbol = Symbol(self.next);
        self.next += 1;
        self.symbols.insert(key, symbol);
        symbol
    }

    pub fn lookup(&self, key: IdentityKey) -> Option<Symbol> {
        self.symbols.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::TypeName;
    use crate::runtime::value::{Handle, ObjectRef};

    #[test]
    fn objects_and_handles_share_one_counter() {
        let obj = ObjectRef::new(TypeName::parse("app.A").unwrap());
        let handle = Handle::detached("socket");

        let mut registry = IdentityRegistry::new();
        assert_eq!(registry.register(obj.identity()), Symbol(0));
        assert_eq!(registry.register(handle.identity()), Symbol(1));
        assert_eq!(registry.lookup(obj.clone().identity()), Some(Symbol(0)));
        assert!(registry.contains(handle.identity()));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn symbols_continue_past_u32_range() {
        let a = ObjectRef::new(TypeName::parse("app.A").unwrap());
        let b = ObjectRef::new(TypeName::parse("app.A").unwrap());

        let mut registry = IdentityRegistry { next: u64::from(u32::MAX), ..IdentityRegistry::default() };
        assert_eq!(registry.register(a.identity()), Symbol(u64::from(u32::MAX)));
        assert_eq!(registry.register(b.identity()), Symbol(u64::from(u32::MAX) + 1));
        assert_eq!(Symbol(u64::from(u32::MAX) + 1).to_string(), "$4294967296");
    }
}
