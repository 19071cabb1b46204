#![forbid(unsafe_code)]

//! Root registry: one path index per raw root value.
//!
//! Slots are keyed by the root's allocation address and hold both the root
//! and its index weakly. A slot whose root or index died is treated as
//! absent and pruned, so an address reused by a new allocation never
//! resolves to a stale graph.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::path_index::PathEntry;
use crate::value::{Obj, ObjCell};

struct RootSlot {
    value: Weak<ObjCell>,
    node: Weak<PathEntry>,
}

impl RootSlot {
    fn resolve(&self) -> Option<Rc<PathEntry>> {
        if self.value.strong_count() == 0 {
            return None;
        }
        self.node.upgrade()
    }
}

thread_local! {
    static ROOTS: RefCell<AHashMap<usize, RootSlot>> = RefCell::new(AHashMap::new());
}

/// The path index root shared by every observer of `value`.
pub(crate) fn resolve(value: &Obj) -> Rc<PathEntry> {
    ROOTS.with(|roots| {
        let mut roots = roots.borrow_mut();
        roots.retain(|_, slot| slot.resolve().is_some());
        if let Some(node) = roots.get(&value.addr()).and_then(RootSlot::resolve) {
            return node;
        }
        let node = PathEntry::root();
        roots.insert(
            value.addr(),
            RootSlot {
                value: value.downgrade(),
                node: Rc::downgrade(&node),
            },
        );
        tracing::trace!(message = "registry.root", live = roots.len());
        node
    })
}

/// Number of root values that currently have a live dependency graph.
#[must_use]
pub fn root_count() -> usize {
    ROOTS.with(|roots| {
        roots
            .borrow()
            .values()
            .filter(|slot| slot.resolve().is_some())
            .count()
    })
}
