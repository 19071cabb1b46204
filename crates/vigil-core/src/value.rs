#![forbid(unsafe_code)]

//! Raw value model.
//!
//! Observed data is a graph of [`Obj`] containers holding [`Value`]s. An
//! `Obj` has reference identity: cloning it yields another handle to the same
//! container, and two handles compare equal only if they point at the same
//! allocation. Mutation through the raw accessors on `Obj` is invisible to
//! the engine; observed mutation goes through a [`Wrapper`](crate::Wrapper).
//!
//! # Equality
//!
//! [`Value`] equality is SameValue: scalars compare by value (with `NaN`
//! equal to itself) and objects compare by identity. Writes of a SameValue
//! value are no-ops, and the default derivation equality uses the same rule.

use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};

use crate::error::{Result, VigilError};
use crate::key::Key;

pub type FieldMap = IndexMap<Rc<str>, Value, ahash::RandomState>;
pub type EntryMap = IndexMap<Key, Value, ahash::RandomState>;
pub type MemberSet = IndexSet<Key, ahash::RandomState>;

/// A user-defined container shape.
///
/// Implementors expose their members through a keyed interface so the generic
/// custom factory can intercept them. A dedicated
/// [`WrapperFactory`](crate::WrapperFactory) may use
/// [`as_any`](CustomData::as_any) to reach richer structure.
pub trait CustomData: Any + fmt::Debug {
    fn get(&self, key: &Key) -> Option<Value>;

    /// Store `value` under `key`, returning the previous value.
    fn set(&mut self, key: Key, value: Value) -> Result<Option<Value>>;

    fn remove(&mut self, _key: &Key) -> Option<Value> {
        None
    }

    fn keys(&self) -> Vec<Key>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn shape_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Storage of an [`Obj`].
#[derive(Debug)]
pub enum Data {
    Record(FieldMap),
    List(Vec<Value>),
    Map(EntryMap),
    Set(MemberSet),
    Custom(Box<dyn CustomData>),
}

/// Registry key for wrapper factories.
#[derive(Debug, Clone, Copy)]
pub enum ShapeKind {
    Record,
    List,
    Map,
    Set,
    Custom { type_id: TypeId, name: &'static str },
}

impl ShapeKind {
    /// Shape key for a custom data type.
    #[must_use]
    pub fn custom<T: CustomData>() -> Self {
        Self::Custom {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::List => "list",
            Self::Map => "map",
            Self::Set => "set",
            Self::Custom { name, .. } => name,
        }
    }
}

impl PartialEq for ShapeKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Custom { type_id: a, .. }, Self::Custom { type_id: b, .. }) => a == b,
            (Self::Record, Self::Record)
            | (Self::List, Self::List)
            | (Self::Map, Self::Map)
            | (Self::Set, Self::Set) => true,
            _ => false,
        }
    }
}

impl Eq for ShapeKind {}

impl Hash for ShapeKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        if let Self::Custom { type_id, .. } = self {
            type_id.hash(state);
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Data {
    #[must_use]
    pub fn shape(&self) -> ShapeKind {
        match self {
            Self::Record(_) => ShapeKind::Record,
            Self::List(_) => ShapeKind::List,
            Self::Map(_) => ShapeKind::Map,
            Self::Set(_) => ShapeKind::Set,
            Self::Custom(c) => ShapeKind::Custom {
                type_id: c.as_any().type_id(),
                name: c.shape_name(),
            },
        }
    }

    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Value> {
        match self {
            Self::Record(fields) => key.as_name().and_then(|n| fields.get(n).cloned()),
            Self::List(items) => key.as_index().and_then(|i| items.get(i).cloned()),
            Self::Map(entries) => entries.get(key).cloned(),
            Self::Set(members) => members.contains(key).then_some(Value::Bool(true)),
            Self::Custom(c) => c.get(key),
        }
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        match self {
            Self::Record(fields) => key.as_name().is_some_and(|n| fields.contains_key(n)),
            Self::List(items) => key.as_index().is_some_and(|i| i < items.len()),
            Self::Map(entries) => entries.contains_key(key),
            Self::Set(members) => members.contains(key),
            Self::Custom(c) => c.get(key).is_some(),
        }
    }

    /// Store `value` under `key`, returning the previous value.
    ///
    /// Lists accept an index equal to their length as an append. Sets ignore
    /// `value` and add `key` as a member.
    pub fn insert(&mut self, key: Key, value: Value) -> Result<Option<Value>> {
        if key == Key::Structure {
            return Err(VigilError::unsupported(self.shape().name(), "structure write"));
        }
        match self {
            Self::Record(fields) => match key {
                Key::Name(name) => Ok(fields.insert(name, value)),
                _ => Err(VigilError::unsupported("record", "non-name key")),
            },
            Self::List(items) => {
                let Some(index) = key.as_index() else {
                    return Err(VigilError::unsupported("list", "non-index key"));
                };
                let len = items.len();
                match index.cmp(&len) {
                    std::cmp::Ordering::Less => Ok(Some(std::mem::replace(&mut items[index], value))),
                    std::cmp::Ordering::Equal => {
                        items.push(value);
                        Ok(None)
                    }
                    std::cmp::Ordering::Greater => Err(VigilError::IndexOutOfBounds { index, len }),
                }
            }
            Self::Map(entries) => Ok(entries.insert(key, value)),
            Self::Set(members) => {
                let existed = !members.insert(key);
                Ok(existed.then_some(Value::Bool(true)))
            }
            Self::Custom(c) => c.set(key, value),
        }
    }

    /// Remove `key`, returning its value. List removal shifts later items.
    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        match self {
            Self::Record(fields) => key.as_name().and_then(|n| fields.shift_remove(n)),
            Self::List(items) => match key.as_index() {
                Some(i) if i < items.len() => Some(items.remove(i)),
                _ => None,
            },
            Self::Map(entries) => entries.shift_remove(key),
            Self::Set(members) => members.shift_remove(key).then_some(Value::Bool(true)),
            Self::Custom(c) => c.remove(key),
        }
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Self::Record(fields) => fields.keys().map(|n| Key::Name(Rc::clone(n))).collect(),
            Self::List(items) => (0..items.len()).map(Key::Index).collect(),
            Self::Map(entries) => entries.keys().cloned().collect(),
            Self::Set(members) => members.iter().cloned().collect(),
            Self::Custom(c) => c.keys(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Record(fields) => fields.len(),
            Self::List(items) => items.len(),
            Self::Map(entries) => entries.len(),
            Self::Set(members) => members.len(),
            Self::Custom(c) => c.keys().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) struct ObjCell {
    data: RefCell<Data>,
    /// One-way opacity marker set by [`Obj::mark_ref`].
    opaque: Cell<bool>,
}

/// A shared, identity-compared, interior-mutable container.
#[derive(Clone)]
pub struct Obj {
    inner: Rc<ObjCell>,
}

impl Obj {
    #[must_use]
    pub fn new(data: Data) -> Self {
        Self {
            inner: Rc::new(ObjCell {
                data: RefCell::new(data),
                opaque: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn record() -> Self {
        Self::new(Data::Record(FieldMap::default()))
    }

    #[must_use]
    pub fn list() -> Self {
        Self::new(Data::List(Vec::new()))
    }

    #[must_use]
    pub fn map() -> Self {
        Self::new(Data::Map(EntryMap::default()))
    }

    #[must_use]
    pub fn set() -> Self {
        Self::new(Data::Set(MemberSet::default()))
    }

    #[must_use]
    pub fn custom(data: impl CustomData) -> Self {
        Self::new(Data::Custom(Box::new(data)))
    }

    /// Build a record from `(name, value)` pairs.
    pub fn from_fields<N, V>(fields: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: AsRef<str>,
        V: Into<Value>,
    {
        Self::new(Data::Record(
            fields
                .into_iter()
                .map(|(n, v)| (Rc::from(n.as_ref()), v.into()))
                .collect(),
        ))
    }

    /// Build a list from items.
    pub fn from_items<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::new(Data::List(items.into_iter().map(Into::into).collect()))
    }

    /// Build a map from `(key, value)` pairs.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        Self::new(Data::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Build a set from members.
    pub fn from_members<K: Into<Key>>(members: impl IntoIterator<Item = K>) -> Self {
        Self::new(Data::Set(members.into_iter().map(Into::into).collect()))
    }

    #[must_use]
    pub fn shape(&self) -> ShapeKind {
        self.inner.data.borrow().shape()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Allocation address, stable while any handle or weak handle exists.
    #[must_use]
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<ObjCell> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_cell(inner: Rc<ObjCell>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn is_ref(&self) -> bool {
        self.inner.opaque.get()
    }

    /// Mark this container as opaque. It is never wrapped or tracked again.
    pub fn mark_ref(&self) {
        self.inner.opaque.set(true);
    }

    /// Borrow the storage immutably.
    ///
    /// # Panics
    ///
    /// Panics if called while the same container is mutably borrowed.
    pub fn data(&self) -> Ref<'_, Data> {
        self.inner.data.borrow()
    }

    /// Access the storage by reference.
    pub fn with<R>(&self, f: impl FnOnce(&Data) -> R) -> R {
        f(&self.inner.data.borrow())
    }

    /// Mutate the storage in place. Untracked.
    pub fn update<R>(&self, f: impl FnOnce(&mut Data) -> R) -> R {
        f(&mut self.inner.data.borrow_mut())
    }

    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.data.borrow().get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.data.borrow().contains(key)
    }

    /// Untracked write. See [`Data::insert`].
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Option<Value>> {
        self.inner.data.borrow_mut().insert(key.into(), value.into())
    }

    /// Untracked removal. See [`Data::remove`].
    pub fn remove(&self, key: &Key) -> Option<Value> {
        self.inner.data.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.inner.data.borrow().keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Containers may reference themselves, so members are not printed.
        match self.inner.data.try_borrow() {
            Ok(data) => f
                .debug_struct("Obj")
                .field("shape", &data.shape().name())
                .field("len", &data.len())
                .field("is_ref", &self.is_ref())
                .finish(),
            Err(_) => f.debug_struct("Obj").finish_non_exhaustive(),
        }
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Obj {}

/// A raw value stored in a container.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Obj(Obj),
}

impl Value {
    /// SameValue comparison.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Obj(a), Self::Obj(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Self::Obj(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Shape name for error messages.
    #[must_use]
    pub fn kind_name(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(_) => "bool".into(),
            Self::Int(_) => "int".into(),
            Self::Float(_) => "float".into(),
            Self::Str(_) => "string".into(),
            Self::Obj(o) => o.shape().name().into(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<Obj> for Value {
    fn from(v: Obj) -> Self {
        Self::Obj(v)
    }
}

impl From<&Obj> for Value {
    fn from(v: &Obj) -> Self {
        Self::Obj(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
