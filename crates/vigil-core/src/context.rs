#![forbid(unsafe_code)]

//! Wrapper contexts: the per-(path, observer) authority for tracking.
//!
//! Every interception strategy funnels member access through two calls:
//! [`WrapperContext::observe_read`] for reads and
//! [`WrapperContext::notify_write`] after writes. Nothing else in a
//! [`WrapperFactory`] needs to know about observers, focus or batching.
//!
//! # Invariants
//!
//! 1. At most one valid context exists per (path entry, observer); the
//!    entry's cache points at it.
//! 2. A write at `P.k` invalidates the contexts at every ancestor of `P.k`
//!    and in the subtree below it, for every observer of the root. Siblings
//!    keep their contexts, so their wrappers stay reference-stable.
//! 3. An invalidated context is never handed out again. Wrappers holding
//!    it route their accessors through the context currently valid for the
//!    same path, so no read or write reaches a detached value.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::batch::{self, Submission};
use crate::derive;
use crate::escape;
use crate::key::Key;
use crate::observer::{FocusState, ObserverId, ObserverInner};
use crate::path_index::{Collect, PathEntry};
use crate::shapes;
use crate::value::{Obj, Value};
use crate::wrapper::{Read, Wrapper, WrapperFactory, WrapperInner};

pub struct WrapperContext {
    entry: Rc<PathEntry>,
    observer: Rc<ObserverInner>,
    value: Obj,
    factory: Rc<dyn WrapperFactory>,
    valid: Cell<bool>,
    wrapper: RefCell<Weak<WrapperInner>>,
}

impl WrapperContext {
    /// Create a context and make it the cached one for its entry.
    pub(crate) fn create(
        entry: Rc<PathEntry>,
        observer: Rc<ObserverInner>,
        value: Obj,
        factory: Rc<dyn WrapperFactory>,
    ) -> Rc<Self> {
        let ctx = Rc::new(Self {
            entry,
            observer,
            value,
            factory,
            valid: Cell::new(true),
            wrapper: RefCell::new(Weak::new()),
        });
        ctx.entry.cache_context(ctx.observer.id(), &ctx);
        ctx
    }

    /// Raw value this context was created for.
    #[must_use]
    pub fn value(&self) -> &Obj {
        &self.value
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    pub(crate) fn invalidate(&self) {
        self.valid.set(false);
    }

    #[must_use]
    pub fn path(&self) -> Vec<Key> {
        self.entry.path()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.entry.is_root()
    }

    #[must_use]
    pub fn observer_id(&self) -> ObserverId {
        self.observer.id()
    }

    pub(crate) fn observer(&self) -> &Rc<ObserverInner> {
        &self.observer
    }

    /// The wrapper for this context, built by its factory on first use and
    /// reused while any clone of it is alive.
    pub fn wrapper(self: &Rc<Self>) -> Wrapper {
        let existing = self.wrapper.borrow().upgrade();
        if let Some(inner) = existing {
            return Wrapper::from_inner(inner);
        }
        let wrapper = self.factory.make_observable(Rc::clone(self));
        *self.wrapper.borrow_mut() = wrapper.downgrade();
        wrapper
    }

    /// Tracked read of member `key` whose raw value is `child`.
    ///
    /// Returns a wrapper when `child` is an observable, non-ref object, and
    /// the value itself otherwise (`Null` for a missing member). With
    /// `force`, the read is recorded whatever the focus state.
    pub fn observe_read(self: &Rc<Self>, key: &Key, child: Option<Value>, force: bool) -> Read {
        let entry = self.entry.child(key);
        let wrapped = match &child {
            Some(Value::Obj(obj)) => self.wrap_child(&entry, obj),
            _ => None,
        };
        let observable = wrapped.is_some();
        self.track_entry(&entry, observable, force);
        match wrapped {
            Some(wrapper) => Read::Wrapped(wrapper),
            None => Read::Plain(child.unwrap_or_default()),
        }
    }

    /// Record a read of `key` without materializing a child, e.g. a
    /// membership test or a [`Key::Structure`] read.
    pub fn track(self: &Rc<Self>, key: &Key, force: bool) {
        let entry = self.entry.child(key);
        self.track_entry(&entry, false, force);
    }

    /// Record a read of this context's own path, covering its subtree.
    pub(crate) fn track_self(&self, force: bool) {
        self.track_entry(&self.entry, true, force);
    }

    fn wrap_child(&self, entry: &Rc<PathEntry>, obj: &Obj) -> Option<Wrapper> {
        if obj.is_ref() {
            return None;
        }
        let factory = shapes::factory_for(&obj.shape())?;
        let observer = self.observer.id();
        if let Some(cached) = entry.cached_context(observer) {
            if cached.value.ptr_eq(obj) {
                return Some(cached.wrapper());
            }
            // The raw member changed behind the engine's back.
            cached.invalidate();
        }
        let ctx = Self::create(
            Rc::clone(entry),
            Rc::clone(&self.observer),
            obj.clone(),
            factory,
        );
        Some(ctx.wrapper())
    }

    fn track_entry(&self, entry: &Rc<PathEntry>, observable: bool, force: bool) {
        if escape::is_peeking() {
            return;
        }
        let derivation = derive::active();
        let focusing = self.observer.focus() == FocusState::Focusing;
        let record = force
            || derivation.is_some()
            || (focusing && (!observable || self.observer.records_intermediates()));
        if record {
            self.observer.record_at(entry, derivation);
        }
    }

    /// Report a write of member `key` that has already been applied to the
    /// raw value.
    ///
    /// Invalidates the affected contexts, then submits every enabled
    /// observer with a valid record at the written path, an ancestor or a
    /// descendant. Under [`silent`](crate::silent) only the invalidation
    /// happens.
    pub fn notify_write(&self, key: &Key) {
        let mut path = self.entry.path();
        path.push(key.clone());
        let entries = self.observer.root_entry().collect(&path, Collect::Both);

        let invalidated: usize = entries.iter().map(|e| e.invalidate_contexts()).sum();
        tracing::trace!(
            message = "context.invalidate",
            path = %crate::key::format_path(&path),
            entries = entries.len(),
            contexts = invalidated,
        );

        if escape::is_silent() {
            return;
        }

        let target = Value::Obj(self.value.clone());
        let mut submissions = Vec::new();
        for entry in &entries {
            for (observer_id, record) in entry.records() {
                match record.observer() {
                    Some(observer) if observer.is_valid(record.id()) => {
                        if observer.is_enabled() {
                            submissions.push(Submission {
                                observer,
                                condition: record.condition(),
                                target: target.clone(),
                                key: key.clone(),
                            });
                        }
                    }
                    _ => entry.remove_record(observer_id, record.id()),
                }
            }
        }
        batch::submit(submissions);
    }
}

impl fmt::Debug for WrapperContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperContext")
            .field("path", &crate::key::format_path(&self.entry.path()))
            .field("observer", &self.observer.id())
            .field("shape", &self.value.shape())
            .field("valid", &self.valid.get())
            .finish()
    }
}
