//! The host runtime: registered types, global roots and static storage.
pub mod types;
pub mod value;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use types::{TypeKind, TypeName, TypeRegistry};
use value::{EnumMember, FieldKey, ObjectRef, Value};

#[derive(Debug, Default)]
pub struct Runtime {
    types: TypeRegistry,
    globals: IndexMap<String, Value>,
    statics: IndexMap<FieldKey, Value>,
}

impl Runtime {
    pub fn new(types: TypeRegistry) -> Self {
        Self { types, globals: IndexMap::new(), statics: IndexMap::new() }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    fn resolve(&self, ty: &str) -> Result<&TypeName> {
        self.types.type_name(ty).ok_or_else(|| Error::UnknownType(ty.to_string()))
    }

    /// A blank instance of `ty`. Every field starts uninitialized.
    pub fn instantiate(&self, ty: &str) -> Result<ObjectRef> {
        let name = self.resolve(ty)?;
        match self.types.get(ty).map(|d| d.kind()) {
            Some(TypeKind::Class) => Ok(ObjectRef::new(name.clone())),
            _ => Err(Error::NotInstantiable(ty.to_string())),
        }
    }

    /// Assign the slot `name` resolves to, most-derived declaration first.
    pub fn set_field(&self, obj: &ObjectRef, name: &str, value: Value) -> Result<()> {
        let ty = obj.type_name();
        let layout = self.types.instance_layout(ty.as_str())?;
        let key = layout.into_iter().find(|k| k.name == name).ok_or_else(|| Error::UnknownField {
            ty: ty.to_string(),
            owner: ty.to_string(),
            field: name.to_string(),
        })?;
        obj.insert(key, value);
        Ok(())
    }

    /// Assign an exact slot, e.g. a private field declared by an ancestor.
    pub fn set_field_of(&self, obj: &ObjectRef, owner: &str, name: &str, value: Value) -> Result<()> {
        let ty = obj.type_name();
        let layout = self.types.instance_layout(ty.as_str())?;
        let key = layout
            .into_iter()
            .find(|k| k.owner.as_str() == owner && k.name == name)
            .ok_or_else(|| Error::UnknownField {
                ty: ty.to_string(),
                owner: owner.to_string(),
                field: name.to_string(),
            })?;
        obj.insert(key, value);
        Ok(())
    }

    /// Read the slot `name` resolves to. `None` when it is uninitialized.
    pub fn field(&self, obj: &ObjectRef, name: &str) -> Result<Option<Value>> {
        let ty = obj.type_name();
        let layout = self.types.instance_layout(ty.as_str())?;
        match layout.iter().find(|k| k.name == name) {
            Some(key) => Ok(obj.get(key)),
            None => Err(Error::UnknownField {
                ty: ty.to_string(),
                owner: ty.to_string(),
                field: name.to_string(),
            }),
        }
    }

    fn static_key(&self, ty: &str, name: &str) -> Result<FieldKey> {
        let owner = self.resolve(ty)?.clone();
        if self.types.owned_statics(ty)?.iter().any(|s| s == name) {
            Ok(FieldKey::new(owner, name))
        } else {
            Err(Error::UnknownStatic { ty: ty.to_string(), name: name.to_string() })
        }
    }

    pub fn set_static(&mut self, ty: &str, name: &str, value: Value) -> Result<()> {
        let key = self.static_key(ty, name)?;
        self.statics.insert(key, value);
        Ok(())
    }

    /// `None` when the slot exists but is uninitialized.
    pub fn static_value(&self, ty: &str, name: &str) -> Result<Option<&Value>> {
        let key = self.static_key(ty, name)?;
        Ok(self.statics.get(&key))
    }

    pub fn clear_static(&mut self, ty: &str, name: &str) -> Result<Option<Value>> {
        let key = self.static_key(ty, name)?;
        Ok(self.statics.shift_remove(&key))
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn remove_global(&mut self, name: &str) -> Option<Value> {
        self.globals.shift_remove(name)
    }

    pub fn globals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.globals.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn enum_member(&self, ty: &str, variant: &str) -> Result<Value> {
        let found = self.types.variant(ty, variant)?;
        Ok(Value::Enum(EnumMember {
            ty: self.resolve(ty)?.clone(),
            variant: found.name.clone(),
            backing: found.backing.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::TypeDescriptor;

    fn runtime() -> Runtime {
        let mut types = TypeRegistry::new();
        types.register(TypeDescriptor::mixin("app.Tagged").field("tag")).unwrap();
        types
            .register(
                TypeDescriptor::class("app.Base")
                    .private_field("id")
                    .field("name")
                    .static_slot("count"),
            )
            .unwrap();
        types
            .register(
                TypeDescriptor::class("app.User")
                    .extends("app.Base")
                    .uses("app.Tagged")
                    .private_field("id"),
            )
            .unwrap();
        types.register(TypeDescriptor::enumeration("app.Role").variant("Admin")).unwrap();
        Runtime::new(types)
    }

    #[test]
    fn instantiate_rejects_mixins_enums_and_unknown_types() {
        let rt = runtime();
        assert!(rt.instantiate("app.User").is_ok());
        assert!(matches!(rt.instantiate("app.Tagged"), Err(Error::NotInstantiable(_))));
        assert!(matches!(rt.instantiate("app.Role"), Err(Error::NotInstantiable(_))));
        assert!(matches!(rt.instantiate("app.Nope"), Err(Error::UnknownType(_))));
    }

    #[test]
    fn private_slots_at_each_level_are_separate() {
        let rt = runtime();
        let user = rt.instantiate("app.User").unwrap();
        rt.set_field(&user, "id", Value::Int(1)).unwrap();
        rt.set_field_of(&user, "app.Base", "id", Value::Int(2)).unwrap();
        rt.set_field(&user, "tag", Value::str("x")).unwrap();

        assert_eq!(rt.field(&user, "id").unwrap(), Some(Value::Int(1)));
        let base_id = FieldKey::new(TypeName::parse("app.Base").unwrap(), "id");
        assert_eq!(user.get(&base_id), Some(Value::Int(2)));
        assert_eq!(rt.field(&user, "name").unwrap(), None);
        assert!(rt.set_field(&user, "missing", Value::Null).is_err());
    }

    #[test]
    fn statics_are_validated_against_ownership() {
        let mut rt = runtime();
        rt.set_static("app.Base", "count", Value::Int(3)).unwrap();
        assert_eq!(rt.static_value("app.Base", "count").unwrap(), Some(&Value::Int(3)));
        assert!(matches!(
            rt.set_static("app.User", "count", Value::Int(1)),
            Err(Error::UnknownStatic { .. })
        ));
        rt.clear_static("app.Base", "count").unwrap();
        assert_eq!(rt.static_value("app.Base", "count").unwrap(), None);
    }

    #[test]
    fn globals_keep_insertion_order() {
        let mut rt = runtime();
        rt.set_global("b", Value::Int(1));
        rt.set_global("a", Value::Int(2));
        let names: Vec<_> = rt.globals().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(rt.remove_global("b"), Some(Value::Int(1)));
        assert!(rt.global("b").is_none());
        assert!(rt.enum_member("app.Role", "Admin").is_ok());
    }
}
