//! Type descriptors: the registered stand-in for runtime reflection.
//!
//! Every composite, static slot and enum the engine can walk is described here
//! up front. Field enumeration, static ownership and enum resolution are all
//! answered from these tables, never from the values themselves.
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::value::{FieldKey, Key};
use crate::error::{Error, Result};

static TYPE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("type name pattern")
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

pub(crate) fn is_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

fn check_identifier(what: &'static str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::InvalidName { what, name: name.to_string() })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TYPE NAMES
// ————————————————————————————————————————————————————————————————————————————

/// Dotted type identifier, e.g. `app.cache.Pool`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeName(String);

impl TypeName {
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if TYPE_NAME.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(Error::InvalidName { what: "type name", name })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TypeName {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<TypeName> for String {
    fn from(value: TypeName) -> Self {
        value.0
    }
}

impl FromStr for TypeName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Borrow<str> for TypeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// DESCRIPTORS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    /// Reusable storage unit; its members are copied into each consumer.
    Mixin,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    /// Private slots never merge with a same-named slot at another level.
    Private,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub name: String,
    pub backing: Option<Key>,
}

/// Builder-style description of one type, validated by [`TypeRegistry::register`].
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    parent: Option<String>,
    mixins: Vec<String>,
    opaque: bool,
    fields: Vec<FieldDecl>,
    statics: Vec<String>,
    variants: Vec<Variant>,
}

impl TypeDescriptor {
    fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: None,
            mixins: Vec::new(),
            opaque: false,
            fields: Vec::new(),
            statics: Vec::new(),
            variants: Vec::new(),
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Class)
    }

    pub fn mixin(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Mixin)
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Enum)
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn uses(mut self, mixin: impl Into<String>) -> Self {
        self.mixins.push(mixin.into());
        self
    }

    /// Internal type: instances can be allocated but their fields cannot be
    /// introspected, and its static state is never walked.
    pub fn opaque(mut self) -> Self {
        self.opaque = true;
        self
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        self.field_with(name, Visibility::Public)
    }

    pub fn protected_field(self, name: impl Into<String>) -> Self {
        self.field_with(name, Visibility::Protected)
    }

    pub fn private_field(self, name: impl Into<String>) -> Self {
        self.field_with(name, Visibility::Private)
    }

    fn field_with(mut self, name: impl Into<String>, visibility: Visibility) -> Self {
        self.fields.push(FieldDecl { name: name.into(), visibility });
        self
    }

    pub fn static_slot(mut self, name: impl Into<String>) -> Self {
        self.statics.push(name.into());
        self
    }

    pub fn variant(mut self, name: impl Into<String>) -> Self {
        self.variants.push(Variant { name: name.into(), backing: None });
        self
    }

    pub fn backed_variant(mut self, name: impl Into<String>, backing: impl Into<Key>) -> Self {
        self.variants.push(Variant { name: name.into(), backing: Some(backing.into()) });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> TypeKind {
        self.kind
    }
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }
    pub fn mixins(&self) -> &[String] {
        &self.mixins
    }
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }
    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }
    pub fn statics(&self) -> &[String] {
        &self.statics
    }
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }
}

// ————————————————————————————————————————————————————————————————————————————
// REGISTRY
// ————————————————————————————————————————————————————————————————————————————

/// All types known to one runtime, in registration order.
///
/// Capture and restore must run against registries with the same contents.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<TypeName, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a descriptor. Parents and mixins must be registered first.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<TypeName> {
        let name = TypeName::parse(descriptor.name.clone())?;
        if self.types.contains_key(&name) {
            return Err(Error::DuplicateType(name.to_string()));
        }
        if let Some(parent) = &descriptor.parent {
            match self.types.get(parent.as_str()) {
                Some(p) if p.kind == TypeKind::Class && descriptor.kind == TypeKind::Class => {}
                _ => {
                    return Err(Error::InvalidReference {
                        ty: name.to_string(),
                        target: parent.clone(),
                        expected: "class",
                    });
                }
            }
        }
        for mixin in &descriptor.mixins {
            match self.types.get(mixin.as_str()) {
                Some(m) if m.kind == TypeKind::Mixin => {}
                _ => {
                    return Err(Error::InvalidReference {
                        ty: name.to_string(),
                        target: mixin.clone(),
                        expected: "mixin",
                    });
                }
            }
        }
        for field in &descriptor.fields {
            check_identifier("field name", &field.name)?;
        }
        for slot in &descriptor.statics {
            check_identifier("static slot name", slot)?;
        }
        for variant in &descriptor.variants {
            check_identifier("variant name", &variant.name)?;
        }
        self.types.insert(name.clone(), descriptor);
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    /// The registered (validated) name for `name`.
    pub fn type_name(&self, name: &str) -> Option<&TypeName> {
        self.types.get_key_value(name).map(|(k, _)| k)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TypeName, &TypeDescriptor)> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<(&TypeName, &TypeDescriptor)> {
        self.types
            .get_key_value(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// Storage slots of a `ty` instance in introspection order.
    ///
    /// Walks from `ty` up to its root ancestor. Each level lists its own
    /// fields, then the fields of the mixins it uses, all owned by that level.
    /// A non-private name already claimed by a more-derived level is skipped.
    pub fn instance_layout(&self, ty: &str) -> Result<Vec<FieldKey>> {
        let mut layout: Vec<FieldKey> = Vec::new();
        let mut shared: HashSet<&str> = HashSet::new();
        let mut current = Some(ty);

        while let Some(name) = current {
            let (owner, desc) = self.lookup(name)?;
            let mut level = Vec::new();
            self.level_members(desc, |d| d.fields.as_slice(), &mut level);

            for field in level {
                let key = FieldKey::new(owner.clone(), field.name.as_str());
                match field.visibility {
                    Visibility::Private => {
                        if !layout.contains(&key) {
                            layout.push(key);
                        }
                    }
                    Visibility::Public | Visibility::Protected => {
                        if shared.insert(field.name.as_str()) {
                            layout.push(key);
                        }
                    }
                }
            }
            current = desc.parent.as_deref();
        }

        Ok(layout)
    }

    /// Static slots whose storage belongs to `ty`: its own plus those copied in
    /// from mixins. Slots inherited from an ancestor belong to the ancestor.
    pub fn owned_statics(&self, ty: &str) -> Result<Vec<String>> {
        let (_, desc) = self.lookup(ty)?;
        let mut level = Vec::new();
        self.level_members(desc, |d| d.statics.as_slice(), &mut level);

        let mut out: Vec<String> = Vec::with_capacity(level.len());
        for slot in level {
            if !out.iter().any(|s| s == slot) {
                out.push(slot.clone());
            }
        }
        Ok(out)
    }

    // own members first, then each mixin's (transitively) in `uses` order
    fn level_members<'a, T>(
        &'a self,
        desc: &'a TypeDescriptor,
        pick: fn(&TypeDescriptor) -> &[T],
        out: &mut Vec<&'a T>,
    ) {
        out.extend(pick(desc).iter());
        for mixin in &desc.mixins {
            if let Some(m) = self.types.get(mixin.as_str()) {
                self.level_members(m, pick, out);
            }
        }
    }

    fn enum_descriptor(&self, ty: &str) -> Result<&TypeDescriptor> {
        let (_, desc) = self.lookup(ty)?;
        if desc.kind == TypeKind::Enum {
            Ok(desc)
        } else {
            Err(Error::NotAnEnum(ty.to_string()))
        }
    }

    pub fn variant(&self, ty: &str, variant: &str) -> Result<&Variant> {
        self.enum_descriptor(ty)?
            .variants
            .iter()
            .find(|v| v.name == variant)
            .ok_or_else(|| Error::UnknownVariant { ty: ty.to_string(), variant: variant.to_string() })
    }

    pub fn variant_by_backing(&self, ty: &str, backing: &Key) -> Result<&Variant> {
        self.enum_descriptor(ty)?
            .variants
            .iter()
            .find(|v| v.backing.as_ref() == Some(backing))
            .ok_or_else(|| Error::UnmatchedBacking { ty: ty.to_string(), backing: backing.to_string() })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
