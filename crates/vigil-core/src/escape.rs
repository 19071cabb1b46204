#![forbid(unsafe_code)]

//! Escape hatches: `peek`, `silent`, `ref` and `unwrap`.
//!
//! `peek` and `silent` toggle thread-local depth counters through scoped
//! guards, so nested calls compose and a panic inside the closure restores
//! the previous state.

use std::cell::Cell;

use crate::value::Value;
use crate::wrapper::Read;

thread_local! {
    static PEEK_DEPTH: Cell<u32> = const { Cell::new(0) };
    static SILENT_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct DepthGuard {
    counter: &'static std::thread::LocalKey<Cell<u32>>,
}

impl DepthGuard {
    fn enter(counter: &'static std::thread::LocalKey<Cell<u32>>) -> Self {
        counter.with(|depth| depth.set(depth.get() + 1));
        Self { counter }
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.counter
            .with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f` without recording any observation, whatever the focus state.
pub fn peek<R>(f: impl FnOnce() -> R) -> R {
    let _guard = DepthGuard::enter(&PEEK_DEPTH);
    f()
}

/// Run `f` without dispatching callbacks for its writes.
///
/// Mutations and wrapper invalidation still happen.
pub fn silent<R>(f: impl FnOnce() -> R) -> R {
    let _guard = DepthGuard::enter(&SILENT_DEPTH);
    f()
}

#[must_use]
pub fn is_peeking() -> bool {
    PEEK_DEPTH.with(Cell::get) > 0
}

#[must_use]
pub fn is_silent() -> bool {
    SILENT_DEPTH.with(Cell::get) > 0
}

/// Mark a value as opaque: it is never wrapped or path-indexed, so mutation
/// inside it is invisible to observers. Scalars are returned unchanged.
#[must_use]
pub fn into_ref(value: impl Into<Value>) -> Value {
    let value = value.into();
    if let Value::Obj(obj) = &value {
        obj.mark_ref();
    }
    value
}

/// Whether `value` was marked with [`into_ref`].
#[must_use]
pub fn is_ref(value: &Value) -> bool {
    value.as_obj().is_some_and(|obj| obj.is_ref())
}

/// Raw value behind a read. With `deep`, a wrapper additionally registers a
/// forced observation of its whole subtree.
#[must_use]
pub fn unwrap(read: &Read, deep: bool) -> Value {
    match read {
        Read::Wrapped(wrapper) => {
            if deep {
                wrapper.context().track_self(true);
            }
            wrapper.raw()
        }
        Read::Plain(value) => value.clone(),
    }
}
