#![forbid(unsafe_code)]

//! Public observer operations.

use std::cell::OnceCell;
use std::rc::Rc;

use crate::derive::DerivationContext;
use crate::error::{Result, VigilError};
use crate::key::{Key, format_path};
use crate::observer::{FocusState, ObserveOptions, ObserverInner};
use crate::registry;
use crate::shapes;
use crate::value::Value;
use crate::wrapper::Wrapper;

/// Observe `value` and return its root wrapper.
///
/// `callback` receives the raw container that was written (not necessarily
/// the root) and the key that changed; see [`Callback`](crate::Callback).
/// The observer starts `Coarse`: any write anywhere below the root calls it.
///
/// # Errors
///
/// [`VigilError::NotObservable`] when `value` is a scalar, a ref or an
/// object whose shape has no registered factory.
pub fn observe<F>(value: impl Into<Value>, callback: F) -> Result<Wrapper>
where
    F: Fn(&Value, &Key) + 'static,
{
    observe_with(value, ObserveOptions::default(), callback)
}

/// [`observe`] with explicit [`ObserveOptions`].
pub fn observe_with<F>(
    value: impl Into<Value>,
    options: ObserveOptions,
    callback: F,
) -> Result<Wrapper>
where
    F: Fn(&Value, &Key) + 'static,
{
    let value = value.into();
    let Value::Obj(obj) = value else {
        return Err(VigilError::not_observable(value.kind_name()));
    };
    if obj.is_ref() {
        return Err(VigilError::not_observable(format!("ref {}", obj.shape())));
    }
    if !shapes::is_observable_shape(&obj.shape()) {
        return Err(VigilError::not_observable(obj.shape().name()));
    }
    let entry = registry::resolve(&obj);
    let observer = ObserverInner::new(obj.clone(), entry, Box::new(callback), &options);
    if let Some(enable) = options.initial_focus {
        observer.set_focus(enable);
    }
    observer
        .root_wrapper()
        .ok_or_else(|| VigilError::not_observable(obj.shape().name()))
}

/// Observe `value` through a derivation: `action` runs with the new result
/// whenever a write changes what `derive_fn` returns (`PartialEq`).
///
/// The observer only tracks what `derive_fn` reads; it has no coarse
/// catch-all.
pub fn observe_derived<T, D, A>(value: impl Into<Value>, derive_fn: D, action: A) -> Result<Wrapper>
where
    T: Clone + PartialEq + 'static,
    D: Fn(&Wrapper) -> T + 'static,
    A: Fn(&T) + 'static,
{
    observe_derived_with(value, derive_fn, action, |a: &T, b: &T| a == b)
}

/// [`observe_derived`] with a custom equality; `equal` returns `true` when
/// two results are equal.
pub fn observe_derived_with<T, D, A, E>(
    value: impl Into<Value>,
    derive_fn: D,
    action: A,
    equal: E,
) -> Result<Wrapper>
where
    T: Clone + 'static,
    D: Fn(&Wrapper) -> T + 'static,
    A: Fn(&T) + 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    let slot: Rc<OnceCell<Rc<DerivationContext>>> = Rc::new(OnceCell::new());
    let callback_slot = Rc::clone(&slot);
    let root = observe(value, move |_, _| {
        let result = callback_slot.get().and_then(|d| d.last::<T>());
        if let Some(result) = result {
            action(&result);
        }
    })?;

    let observer = Rc::downgrade(root.context().observer());
    let derivation = DerivationContext::new(
        move || {
            let root = observer.upgrade()?.root_wrapper()?;
            Some(derive_fn(&root))
        },
        equal,
    );
    let _ = slot.set(Rc::clone(&derivation));

    let inner = root.context().observer();
    inner.set_focus(true);
    derivation.reevaluate();
    inner.set_focus(false);
    Ok(root)
}

fn root_observer(wrapper: &Wrapper) -> Result<&Rc<ObserverInner>> {
    if !wrapper.is_root() {
        return Err(VigilError::NotRootObservable {
            path: format_path(&wrapper.path()),
        });
    }
    Ok(wrapper.context().observer())
}

/// `focus(true)` starts fine-grained recording of reads; from `Coarse` it
/// first drops every existing observation. `focus(false)` pauses recording
/// while existing observations stay live.
///
/// # Errors
///
/// [`VigilError::NotRootObservable`] for a non-root wrapper.
pub fn focus(wrapper: &Wrapper, enable: bool) -> Result<()> {
    root_observer(wrapper)?.set_focus(enable);
    Ok(())
}

/// Drop every observation. With `into_focus` the observer keeps focusing;
/// otherwise it returns to `Coarse` with its root catch-all.
///
/// # Errors
///
/// [`VigilError::NotRootObservable`] for a non-root wrapper,
/// [`VigilError::InvalidStateTransition`] while `Coarse`.
pub fn reset(wrapper: &Wrapper, into_focus: bool) -> Result<()> {
    root_observer(wrapper)?.reset(into_focus)
}

/// Stop calling the observer of `wrapper`. Observations are kept.
pub fn disable(wrapper: &Wrapper) {
    wrapper.context().observer().set_enabled(false);
}

/// Resume calling the observer of `wrapper` after [`disable`].
pub fn enable(wrapper: &Wrapper) {
    wrapper.context().observer().set_enabled(true);
}

/// Record an observation covering everything below `wrapper`, whatever the
/// focus state.
pub fn deep(wrapper: &Wrapper) -> Wrapper {
    wrapper.context().track_self(true);
    wrapper.clone()
}

/// Focus state of the observer behind `wrapper`.
#[must_use]
pub fn focus_state(wrapper: &Wrapper) -> FocusState {
    wrapper.context().observer().focus()
}

#[must_use]
pub fn is_enabled(wrapper: &Wrapper) -> bool {
    wrapper.context().observer().is_enabled()
}

/// Drop every observation and disable the observer for good.
///
/// # Errors
///
/// [`VigilError::NotRootObservable`] for a non-root wrapper.
pub fn dispose(wrapper: &Wrapper) -> Result<()> {
    let observer = root_observer(wrapper)?;
    observer.discard_observations();
    observer.set_enabled(false);
    tracing::debug!(
        message = "observer.dispose",
        observer = observer.id().raw(),
        label = observer.label().unwrap_or(""),
    );
    Ok(())
}
