#![forbid(unsafe_code)]

//! Wrappers: tracked handles standing in for observable values.
//!
//! A [`Wrapper`] pairs a [`WrapperContext`] with the [`Interceptor`] of its
//! shape. Its accessors read and write the raw value exactly like the raw
//! accessors on [`Obj`] do, and additionally report each access to the
//! context. Two wrappers for the same path are the same allocation until a
//! write invalidates that path ([`Wrapper::ptr_eq`]).

use std::fmt;
use std::rc::{Rc, Weak};

use crate::context::WrapperContext;
use crate::error::{Result, VigilError};
use crate::escape;
use crate::key::{Key, format_path};
use crate::observer::ObserverId;
use crate::value::{Obj, ShapeKind, Value};

/// Per-shape member access.
///
/// Implementations call [`WrapperContext::observe_read`] (or
/// [`WrapperContext::track`]) for every visible read and
/// [`WrapperContext::notify_write`] after every visible write or delete.
pub trait Interceptor {
    fn get(&self, ctx: &Rc<WrapperContext>, key: &Key) -> Read;

    fn has(&self, ctx: &Rc<WrapperContext>, key: &Key) -> bool;

    fn keys(&self, ctx: &Rc<WrapperContext>) -> Vec<Key>;

    fn len(&self, ctx: &Rc<WrapperContext>) -> usize;

    fn set(&self, ctx: &Rc<WrapperContext>, key: Key, value: Value) -> Result<()>;

    fn remove(&self, ctx: &Rc<WrapperContext>, key: &Key) -> Result<Option<Value>>;

    fn push(&self, ctx: &Rc<WrapperContext>, _value: Value) -> Result<()> {
        Err(VigilError::unsupported(ctx.value().shape().name(), "push"))
    }

    fn pop(&self, ctx: &Rc<WrapperContext>) -> Result<Option<Value>> {
        Err(VigilError::unsupported(ctx.value().shape().name(), "pop"))
    }

    /// Add a member; returns whether it was new.
    fn insert(&self, ctx: &Rc<WrapperContext>, _member: Key) -> Result<bool> {
        Err(VigilError::unsupported(ctx.value().shape().name(), "insert"))
    }

    fn clear(&self, ctx: &Rc<WrapperContext>) -> Result<()> {
        Err(VigilError::unsupported(ctx.value().shape().name(), "clear"))
    }
}

/// Builds wrappers for one shape.
pub trait WrapperFactory {
    fn make_observable(&self, ctx: Rc<WrapperContext>) -> Wrapper;
}

pub(crate) struct WrapperInner {
    ctx: Rc<WrapperContext>,
    interceptor: Rc<dyn Interceptor>,
}

/// Tracked handle for an observable value. Cloning is cheap and preserves
/// identity.
#[derive(Clone)]
pub struct Wrapper {
    inner: Rc<WrapperInner>,
}

impl Wrapper {
    /// Build a wrapper; called by [`WrapperFactory`] implementations.
    #[must_use]
    pub fn new(ctx: Rc<WrapperContext>, interceptor: Rc<dyn Interceptor>) -> Self {
        Self {
            inner: Rc::new(WrapperInner { ctx, interceptor }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<WrapperInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<WrapperInner> {
        Rc::downgrade(&self.inner)
    }

    /// Whether both handles are the same wrapper.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn context(&self) -> &Rc<WrapperContext> {
        &self.inner.ctx
    }

    fn interceptor(&self) -> &dyn Interceptor {
        self.inner.interceptor.as_ref()
    }

    /// Run `f` against the wrapper that currently stands for this path:
    /// `self` while valid, otherwise the one [`refresh`](Self::refresh)
    /// resolves.
    fn with_current<R>(&self, f: impl FnOnce(&Wrapper) -> R) -> Result<R> {
        if !self.is_stale() {
            return Ok(f(self));
        }
        let current = self.refresh()?;
        Ok(f(&current))
    }

    // ── Reads ────────────────────────────────────────────────────────
    //
    // A stale wrapper whose path no longer resolves to an observable value
    // reads as empty.

    /// Tracked read of a member.
    pub fn get(&self, key: impl Into<Key>) -> Read {
        let key = key.into();
        self.with_current(|w| w.interceptor().get(w.context(), &key))
            .unwrap_or(Read::Plain(Value::Null))
    }

    /// Tracked read of a member that is expected to be observable.
    pub fn child(&self, key: impl Into<Key>) -> Option<Wrapper> {
        self.get(key).into_wrapper()
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        self.with_current(|w| w.interceptor().has(w.context(), &key))
            .unwrap_or(false)
    }

    /// Member keys, tracked as a read of [`Key::Structure`].
    pub fn keys(&self) -> Vec<Key> {
        self.with_current(|w| w.interceptor().keys(w.context()))
            .unwrap_or_default()
    }

    /// Member count, tracked as a read of [`Key::Structure`].
    pub fn len(&self) -> usize {
        self.with_current(|w| w.interceptor().len(w.context()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Writes ───────────────────────────────────────────────────────
    //
    // Writes through a stale wrapper whose path no longer resolves fail with
    // `StaleReference`; nothing is mutated or notified.

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        self.with_current(|w| w.interceptor().set(w.context(), key, value))?
    }

    pub fn remove(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        self.with_current(|w| w.interceptor().remove(w.context(), &key))?
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_current(|w| w.interceptor().push(w.context(), value))?
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        self.with_current(|w| w.interceptor().pop(w.context()))?
    }

    pub fn insert(&self, member: impl Into<Key>) -> Result<bool> {
        let member = member.into();
        self.with_current(|w| w.interceptor().insert(w.context(), member))?
    }

    pub fn clear(&self) -> Result<()> {
        self.with_current(|w| w.interceptor().clear(w.context()))?
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// The raw value this wrapper was created for, untracked.
    #[must_use]
    pub fn raw(&self) -> Value {
        Value::Obj(self.context().value().clone())
    }

    #[must_use]
    pub fn raw_obj(&self) -> &Obj {
        self.context().value()
    }

    #[must_use]
    pub fn shape(&self) -> ShapeKind {
        self.context().value().shape()
    }

    #[must_use]
    pub fn path(&self) -> Vec<Key> {
        self.context().path()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.context().is_root()
    }

    #[must_use]
    pub fn observer_id(&self) -> ObserverId {
        self.context().observer_id()
    }

    /// Whether a write invalidated this wrapper. Accessors on a stale
    /// wrapper act on the current value at its path (see [`refresh`](Self::refresh));
    /// [`raw`](Self::raw) still returns the value it was created for.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        !self.context().is_valid()
    }

    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_stale() {
            return Err(self.stale_error());
        }
        Ok(())
    }

    /// The current wrapper for this wrapper's path, resolved from its
    /// observer's root without recording observations.
    pub fn refresh(&self) -> Result<Wrapper> {
        if !self.is_stale() {
            return Ok(self.clone());
        }
        let ctx = self.context();
        let root = ctx
            .observer()
            .root_wrapper()
            .ok_or_else(|| self.stale_error())?;
        let path = ctx.path();
        tracing::trace!(message = "wrapper.refresh", path = %format_path(&path));
        escape::peek(|| {
            path.iter().try_fold(root, |current, key| {
                current
                    .child(key.clone())
                    .ok_or_else(|| self.stale_error())
            })
        })
    }

    fn stale_error(&self) -> VigilError {
        VigilError::StaleReference {
            path: format_path(&self.path()),
        }
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("path", &format_path(&self.path()))
            .field("shape", &self.shape())
            .field("observer", &self.observer_id())
            .field("stale", &self.is_stale())
            .finish()
    }
}

/// Result of a tracked read.
#[derive(Debug, Clone)]
pub enum Read {
    /// An observable member, wrapped.
    Wrapped(Wrapper),
    /// A scalar, a ref, an unobservable object or `Null` for a missing member.
    Plain(Value),
}

impl Read {
    #[must_use]
    pub fn wrapper(&self) -> Option<&Wrapper> {
        match self {
            Self::Wrapped(w) => Some(w),
            Self::Plain(_) => None,
        }
    }

    #[must_use]
    pub fn into_wrapper(self) -> Option<Wrapper> {
        match self {
            Self::Wrapped(w) => Some(w),
            Self::Plain(_) => None,
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Plain(v) => Some(v),
            Self::Wrapped(_) => None,
        }
    }

    /// The raw value; a wrapper yields the value it stands for.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Wrapped(w) => w.raw(),
            Self::Plain(v) => v,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.value().is_some_and(Value::is_null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        self.value().and_then(Value::as_int)
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        self.value().and_then(Value::as_float)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.value().and_then(Value::as_bool)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }
}

impl From<Wrapper> for Value {
    fn from(wrapper: Wrapper) -> Self {
        wrapper.raw()
    }
}

impl From<&Wrapper> for Value {
    fn from(wrapper: &Wrapper) -> Self {
        wrapper.raw()
    }
}

impl From<Read> for Value {
    fn from(read: Read) -> Self {
        read.into_value()
    }
}
