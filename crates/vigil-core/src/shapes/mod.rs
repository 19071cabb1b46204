#![forbid(unsafe_code)]

//! Wrapper factories for the built-in shapes and the factory registry.
//!
//! A shape is observable when a factory is registered for its
//! [`ShapeKind`]. Records, lists, maps and sets are registered by default;
//! custom shapes are added with [`register_observable_class`].
//!
//! All built-in interceptors share the write discipline implemented here:
//!
//! - writing a value that is [`Value::same`] as the current one is a no-op,
//! - adding or removing a member also notifies [`Key::Structure`],
//! - edits touching several keys run inside one [`atomic`] batch.

mod custom;
mod list;
mod map;
mod record;
mod set;

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

pub use custom::CustomFactory;
pub use list::ListFactory;
pub use map::MapFactory;
pub use record::RecordFactory;
pub use set::SetFactory;

use crate::batch::atomic;
use crate::context::WrapperContext;
use crate::error::Result;
use crate::key::Key;
use crate::value::{CustomData, ShapeKind, Value};
use crate::wrapper::{Read, WrapperFactory};

thread_local! {
    static FACTORIES: RefCell<AHashMap<ShapeKind, Rc<dyn WrapperFactory>>> =
        RefCell::new(builtin_factories());
}

fn builtin_factories() -> AHashMap<ShapeKind, Rc<dyn WrapperFactory>> {
    let mut factories: AHashMap<ShapeKind, Rc<dyn WrapperFactory>> = AHashMap::new();
    factories.insert(ShapeKind::Record, Rc::new(RecordFactory));
    factories.insert(ShapeKind::List, Rc::new(ListFactory));
    factories.insert(ShapeKind::Map, Rc::new(MapFactory));
    factories.insert(ShapeKind::Set, Rc::new(SetFactory));
    factories
}

/// The factory registered for `shape`.
pub(crate) fn factory_for(shape: &ShapeKind) -> Option<Rc<dyn WrapperFactory>> {
    FACTORIES.with(|factories| factories.borrow().get(shape).cloned())
}

/// Whether values of `shape` are wrapped when read.
#[must_use]
pub fn is_observable_shape(shape: &ShapeKind) -> bool {
    FACTORIES.with(|factories| factories.borrow().contains_key(shape))
}

/// Install `factory` for `shape`, replacing and returning any previous one.
///
/// Registration is per thread, like every other piece of engine state.
pub fn register_observable_shape(
    shape: ShapeKind,
    factory: Rc<dyn WrapperFactory>,
) -> Option<Rc<dyn WrapperFactory>> {
    tracing::debug!(message = "shapes.register", shape = shape.name());
    FACTORIES.with(|factories| factories.borrow_mut().insert(shape, factory))
}

/// Make the custom data type `T` observable.
///
/// Without a dedicated factory, `T` is wrapped by [`CustomFactory`], which
/// intercepts the [`CustomData`] member API.
pub fn register_observable_class<T: CustomData>(factory: Option<Rc<dyn WrapperFactory>>) {
    let factory = factory.unwrap_or_else(|| Rc::new(CustomFactory));
    register_observable_shape(ShapeKind::custom::<T>(), factory);
}

// ── Shared interception helpers ──────────────────────────────────────

pub(crate) fn read_member(ctx: &Rc<WrapperContext>, key: &Key) -> Read {
    let raw = ctx.value().get(key);
    ctx.observe_read(key, raw, false)
}

pub(crate) fn has_member(ctx: &Rc<WrapperContext>, key: &Key) -> bool {
    ctx.track(key, false);
    ctx.value().contains(key)
}

pub(crate) fn member_keys(ctx: &Rc<WrapperContext>) -> Vec<Key> {
    ctx.track(&Key::Structure, false);
    ctx.value().keys()
}

pub(crate) fn member_count(ctx: &Rc<WrapperContext>) -> usize {
    ctx.track(&Key::Structure, false);
    ctx.value().len()
}

/// Store `value` under `key` and notify, unless nothing changes.
pub(crate) fn write_member(ctx: &Rc<WrapperContext>, key: Key, value: Value) -> Result<()> {
    let raw = ctx.value();
    let existed = raw.contains(&key);
    if existed && raw.get(&key).is_some_and(|previous| previous.same(&value)) {
        return Ok(());
    }
    raw.insert(key.clone(), value)?;
    if existed {
        ctx.notify_write(&key);
    } else {
        atomic(|| {
            ctx.notify_write(&key);
            ctx.notify_write(&Key::Structure);
        });
    }
    Ok(())
}

pub(crate) fn remove_member(ctx: &Rc<WrapperContext>, key: &Key) -> Result<Option<Value>> {
    let removed = ctx.value().remove(key);
    if removed.is_some() {
        atomic(|| {
            ctx.notify_write(key);
            ctx.notify_write(&Key::Structure);
        });
    }
    Ok(removed)
}

/// Remove every member, last first so list indices stay in range.
pub(crate) fn clear_members(ctx: &Rc<WrapperContext>) -> Result<()> {
    let raw = ctx.value();
    let keys = raw.keys();
    if keys.is_empty() {
        return Ok(());
    }
    for key in keys.iter().rev() {
        raw.remove(key);
    }
    notify_all(ctx, &keys);
    Ok(())
}

/// Notify `keys` and the structure key as one batch.
pub(crate) fn notify_all(ctx: &Rc<WrapperContext>, keys: &[Key]) {
    atomic(|| {
        for key in keys {
            ctx.notify_write(key);
        }
        ctx.notify_write(&Key::Structure);
    });
}
