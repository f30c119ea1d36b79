//! Live values of the host runtime.
use std::cell::{Ref, RefCell};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use super::types::TypeName;

// ————————————————————————————————————————————————————————————————————————————
// KEYS
// ————————————————————————————————————————————————————————————————————————————

/// Sequence key. `Int(1)` and `Str("1")` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Str(Vec<u8>),
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value.into_bytes())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
        }
    }
}

/// One physical instance slot: the declaring level plus the field name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub owner: TypeName,
    pub name: String,
}

impl FieldKey {
    pub fn new(owner: TypeName, name: impl Into<String>) -> Self {
        Self { owner, name: name.into() }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// VALUES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub ty: TypeName,
    pub variant: String,
    pub backing: Option<Key>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Callable {
    pub name: String,
}

/// A value kind the engine has no rule for.
#[derive(Debug, Clone, PartialEq)]
pub struct Foreign {
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Vec<u8>),
    Sequence(Vec<(Key, Value)>),
    Enum(EnumMember),
    Object(ObjectRef),
    Handle(HandleRef),
    Callable(Callable),
    Foreign(Foreign),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::String(s.as_bytes().to_vec())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::String(b.into())
    }

    /// A list: a sequence keyed `0..n`.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Sequence(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::Int(i as i64), v))
                .collect(),
        )
    }

    pub fn seq<K: Into<Key>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Sequence(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn callable(name: impl Into<String>) -> Self {
        Value::Callable(Callable { name: name.into() })
    }

    pub fn foreign(kind: impl Into<String>) -> Self {
        Value::Foreign(Foreign { kind: kind.into() })
    }

    pub fn kind_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Enum(_) => "enum",
            Value::Object(_) => "object",
            Value::Handle(_) => "handle",
            Value::Callable(_) => "callable",
            Value::Foreign(f) => &f.kind,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&HandleRef> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[(Key, Value)]> {
        match self {
            Value::Sequence(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl From<HandleRef> for Value {
    fn from(value: HandleRef) -> Self {
        Value::Handle(value)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// IDENTITY
// ————————————————————————————————————————————————————————————————————————————

/// Address of a shared allocation. Only meaningful while the value is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey(usize);

// ————————————————————————————————————————————————————————————————————————————
// COMPOSITES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug)]
pub struct Object {
    pub ty: TypeName,
    /// Absent keys are uninitialized slots.
    pub fields: IndexMap<FieldKey, Value>,
}

/// Shared handle to a composite. Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

impl ObjectRef {
    pub(crate) fn new(ty: TypeName) -> Self {
        Self(Rc::new(RefCell::new(Object { ty, fields: IndexMap::new() })))
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey(Rc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn type_name(&self) -> TypeName {
        self.0.borrow().ty.clone()
    }

    pub fn get(&self, key: &FieldKey) -> Option<Value> {
        self.0.borrow().fields.get(key).cloned()
    }

    pub fn unset(&self, key: &FieldKey) -> Option<Value> {
        self.0.borrow_mut().fields.shift_remove(key)
    }

    pub(crate) fn insert(&self, key: FieldKey, value: Value) {
        self.0.borrow_mut().fields.insert(key, value);
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    // identity only; fields may point back at this object
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(obj) => write!(f, "ObjectRef({} @ {:#x})", obj.ty, self.identity().0),
            Err(_) => write!(f, "ObjectRef(<borrowed> @ {:#x})", self.identity().0),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// HANDLES
// ————————————————————————————————————————————————————————————————————————————

pub const STREAM_KIND: &str = "stream";

/// External resource. Streams own their open file; its offset is the position.
#[derive(Debug)]
pub struct Handle {
    kind: String,
    path: Option<PathBuf>,
    mode: String,
    file: RefCell<Option<File>>,
}

impl Handle {
    pub fn open(path: impl AsRef<Path>, mode: &str) -> io::Result<HandleRef> {
        let path = path.as_ref();
        let file = open_options(mode)?.open(path)?;
        Ok(HandleRef(Rc::new(Handle {
            kind: STREAM_KIND.to_string(),
            path: Some(path.to_path_buf()),
            mode: mode.to_string(),
            file: RefCell::new(Some(file)),
        })))
    }

    /// A handle with no backing path (e.g. a socket or an anonymous pipe).
    pub fn detached(kind: impl Into<String>) -> HandleRef {
        HandleRef(Rc::new(Handle {
            kind: kind.into(),
            path: None,
            mode: String::new(),
            file: RefCell::new(None),
        }))
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The backing path as text. `None` when there is no path or it is not UTF-8.
    pub fn uri(&self) -> Option<&str> {
        self.path.as_deref().and_then(Path::to_str)
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Current offset of the underlying file, or 0 if there is none.
    pub fn position(&self) -> io::Result<u64> {
        match self.file.borrow_mut().as_mut() {
            Some(file) => file.stream_position(),
            None => Ok(0),
        }
    }

    pub fn seek(&self, position: u64) -> io::Result<u64> {
        match self.file.borrow_mut().as_mut() {
            Some(file) => file.seek(SeekFrom::Start(position)),
            None => Err(io::Error::new(io::ErrorKind::Unsupported, "handle has no file")),
        }
    }

    pub fn with_file<R>(&self, f: impl FnOnce(&mut File) -> io::Result<R>) -> io::Result<R> {
        match self.file.borrow_mut().as_mut() {
            Some(file) => f(file),
            None => Err(io::Error::new(io::ErrorKind::Unsupported, "handle has no file")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandleRef(Rc<Handle>);

impl HandleRef {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey(Rc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &HandleRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::ops::Deref for HandleRef {
    type Target = Handle;
    fn deref(&self) -> &Handle {
        &self.0
    }
}

impl PartialEq for HandleRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

fn open_options(mode: &str) -> io::Result<OpenOptions> {
    let base: String = mode.chars().filter(|c| *c != 'b').collect();
    let mut options = OpenOptions::new();
    match base.as_str() {
        "r" => options.read(true),
        "r+" => options.read(true).write(true),
        "w" => options.write(true).create(true).truncate(true),
        "w+" => options.read(true).write(true).create(true).truncate(true),
        "a" => options.append(true).create(true),
        "a+" => options.read(true).append(true).create(true),
        "x" => options.write(true).create_new(true),
        "x+" => options.read(true).write(true).create_new(true),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported open mode `{mode}`"),
            ));
        }
    };
    Ok(options)
}
