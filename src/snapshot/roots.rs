//! Enumeration of snapshot roots: type-scoped static slots and globals.
use std::collections::BTreeSet;

use crate::config::SnapshotOptions;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::runtime::types::{TypeKind, TypeName};
use crate::runtime::value::Value;

/// Names in the global table that are runtime-provided and never captured.
pub const RESERVED_GLOBALS: &[&str] = &[
    "globals", "argv", "argc", "env", "server", "request", "query", "post", "cookies", "files", "session",
];

/// Static slots owned by one type. `None` marks an uninitialized slot.
#[derive(Debug, Clone)]
pub struct StaticRoot {
    pub ty: TypeName,
    pub slots: Vec<(String, Option<Value>)>,
}

#[derive(Debug, Clone)]
pub struct RootCollector {
    excluded_types: BTreeSet<TypeName>,
    include_globals: bool,
}

impl RootCollector {
    pub fn new(options: &SnapshotOptions) -> Self {
        Self { excluded_types: options.excluded_types.clone(), include_globals: options.include_globals }
    }

    /// Every non-excluded, non-opaque class that owns static slots, in
    /// registration order. Mixins and enums own no storage of their own.
    /// Registry lookup failures are yielded, not skipped.
    pub fn static_roots<'r>(&'r self, runtime: &'r Runtime) -> impl Iterator<Item = Result<StaticRoot>> + 'r {
        runtime.types().iter().filter_map(move |(ty, descriptor)| {
            if descriptor.kind() != TypeKind::Class
                || descriptor.is_opaque()
                || self.excluded_types.contains(ty)
            {
                return None;
            }
            let names = match runtime.types().owned_statics(ty.as_str()) {
                Ok(names) if names.is_empty() => return None,
                Ok(names) => names,
                Err(error) => return Some(Err(error)),
            };
            let mut slots = Vec::with_capacity(names.len());
            for name in names {
                match runtime.static_value(ty.as_str(), &name) {
                    Ok(value) => slots.push((name, value.cloned())),
                    Err(error) => return Some(Err(error)),
                }
            }
            Some(Ok(StaticRoot { ty: ty.clone(), slots }))
        })
    }

    pub fn global_roots<'r>(&'r self, runtime: &'r Runtime) -> impl Iterator<Item = (&'r str, &'r Value)> + 'r {
        runtime
            .globals()
            .filter(move |_| self.include_globals)
            .filter(|(name, _)| !RESERVED_GLOBALS.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::{TypeDescriptor, TypeRegistry};

    fn runtime() -> Runtime {
        let mut types = TypeRegistry::new();
        types.register(TypeDescriptor::mixin("app.Counted").static_slot("instances")).unwrap();
        types.register(TypeDescriptor::class("app.Cache").static_slot("entries").static_slot("hits")).unwrap();
        types.register(TypeDescriptor::class("app.Pool").uses("app.Counted")).unwrap();
        types.register(TypeDescriptor::class("app.Plain").field("x")).unwrap();
        types.register(TypeDescriptor::class("app.Internal").static_slot("state").opaque()).unwrap();
        let mut rt = Runtime::new(types);
        rt.set_static("app.Cache", "entries", Value::list([])).unwrap();
        rt.set_global("counter", Value::Int(1));
        rt.set_global("argv", Value::list([]));
        rt
    }

    #[test]
    fn statics_cover_owning_classes_only() {
        let rt = runtime();
        let collector = RootCollector::new(&SnapshotOptions::default());
        let roots = collector.static_roots(&rt).collect::<Result<Vec<_>>>().unwrap();

        let names: Vec<_> = roots.iter().map(|r| r.ty.to_string()).collect();
        assert_eq!(names, vec!["app.Cache", "app.Pool"]);
        assert!(roots[0].slots[0].1.is_some());
        assert!(roots[0].slots[1].1.is_none());
        assert_eq!(roots[1].slots[0].0, "instances");
    }

    #[test]
    fn excluded_types_and_reserved_globals_are_skipped() {
        let rt = runtime();
        let options = SnapshotOptions::default().exclude(TypeName::parse("app.Cache").unwrap());
        let collector = RootCollector::new(&options);

        let roots = collector.static_roots(&rt).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(roots.len(), 1);
        let globals: Vec<_> = collector.global_roots(&rt).map(|(n, _)| n).collect();
        assert_eq!(globals, vec!["counter"]);

        let options = SnapshotOptions { include_globals: false, ..SnapshotOptions::default() };
        assert_eq!(RootCollector::new(&options).global_roots(&rt).count(), 0);
    }
}
