#![forbid(unsafe_code)]

//! Vigil public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use vigil_core::*;

pub mod prelude {
    pub use vigil_core as core;
    pub use vigil_core::{
        Key, Obj, ObserveOptions, Read, Value, VigilError, Wrapper, atomic, deep, derive,
        disable, enable, focus, into_ref, is_ref, observe, observe_derived, observe_with, peek,
        reset, silent, unwrap,
    };
}
