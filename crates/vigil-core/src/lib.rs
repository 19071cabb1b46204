#![forbid(unsafe_code)]

//! Core: path-indexed dependency tracking and change notification.
//!
//! Observing a value yields a [`Wrapper`]. Reads through wrappers are
//! recorded per observer in a path index shared by every observer of the
//! same root; writes through wrappers notify exactly the observers whose
//! recorded reads they affect.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use vigil_core::{Obj, focus, observe};
//!
//! let data = Obj::from_fields([("count", 1)]);
//! let calls = Rc::new(Cell::new(0));
//! let calls_in_callback = Rc::clone(&calls);
//! let state = observe(&data, move |_, _| {
//!     calls_in_callback.set(calls_in_callback.get() + 1)
//! })
//! .unwrap();
//!
//! focus(&state, true).unwrap();
//! assert_eq!(state.get("count").as_int(), Some(1));
//! focus(&state, false).unwrap();
//!
//! state.set("count", 2).unwrap();
//! state.set("count", 2).unwrap();
//! assert_eq!(calls.get(), 1);
//! ```
//!
//! All engine state is thread-local and built on `Rc`, so wrappers are
//! neither `Send` nor `Sync`.

mod api;
pub mod batch;
pub mod context;
pub mod derive;
pub mod error;
pub mod escape;
pub mod key;
pub mod observer;
mod path_index;
pub mod registry;
pub mod shapes;
pub mod value;
pub mod wrapper;

#[cfg(feature = "json")]
mod json;

pub use api::{
    deep, disable, dispose, enable, focus, focus_state, is_enabled, observe, observe_derived,
    observe_derived_with, observe_with, reset,
};
pub use batch::{atomic, in_batch};
pub use context::WrapperContext;
pub use derive::{derive, derive_with, is_deriving};
pub use error::{Result, VigilError};
pub use escape::{into_ref, is_peeking, is_ref, is_silent, peek, silent, unwrap};
pub use key::{Key, format_path};
pub use observer::{Callback, FocusState, ObserveOptions, ObserverId};
pub use registry::root_count;
pub use shapes::{
    CustomFactory, ListFactory, MapFactory, RecordFactory, SetFactory, is_observable_shape,
    register_observable_class, register_observable_shape,
};
pub use value::{CustomData, Data, EntryMap, FieldMap, MemberSet, Obj, ShapeKind, Value};
pub use wrapper::{Interceptor, Read, Wrapper, WrapperFactory};
