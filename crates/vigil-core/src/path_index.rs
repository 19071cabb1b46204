#![forbid(unsafe_code)]

//! Path-indexed prefix tree shared by every observer of one root value.
//!
//! # Design
//!
//! Each [`PathEntry`] is a node of a trie keyed by [`Key`]. Entries are created
//! lazily the first time a path is read or written and are never deleted
//! explicitly; their per-observer state is held weakly and pruned lazily.
//!
//! An entry stores two things:
//!
//! - a wrapper-context cache keyed by observer (weak, so it never keeps an
//!   observer alive),
//! - the observation records of the observers that watch this path.
//!
//! # Collection
//!
//! [`PathEntry::collect`] walks from the root along a path and returns the
//! entries a write at that path can affect. Ancestors let a coarse
//! observation fire from any finer write below it; descendants let a
//! replaced subtree reach observers of its leaves.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::context::WrapperContext;
use crate::key::Key;
use crate::observer::{ObservationRecord, ObserverId};

/// Which entries [`PathEntry::collect`] returns besides the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collect {
    Ancestors,
    Descendants,
    Both,
}

pub(crate) struct PathEntry {
    key: Option<Key>,
    parent: Weak<PathEntry>,
    children: RefCell<AHashMap<Key, Rc<PathEntry>>>,
    contexts: RefCell<AHashMap<ObserverId, Weak<WrapperContext>>>,
    observations: RefCell<AHashMap<ObserverId, Rc<ObservationRecord>>>,
}

impl PathEntry {
    /// Create the root of a new index.
    pub(crate) fn root() -> Rc<Self> {
        Rc::new(Self {
            key: None,
            parent: Weak::new(),
            children: RefCell::new(AHashMap::new()),
            contexts: RefCell::new(AHashMap::new()),
            observations: RefCell::new(AHashMap::new()),
        })
    }

    pub(crate) fn is_root(&self) -> bool {
        self.key.is_none()
    }

    pub(crate) fn parent(&self) -> Option<Rc<Self>> {
        self.parent.upgrade()
    }

    /// Get or create the child entry for `key`.
    pub(crate) fn child(self: &Rc<Self>, key: &Key) -> Rc<Self> {
        if let Some(existing) = self.children.borrow().get(key) {
            return Rc::clone(existing);
        }
        let child = Rc::new(Self {
            key: Some(key.clone()),
            parent: Rc::downgrade(self),
            children: RefCell::new(AHashMap::new()),
            contexts: RefCell::new(AHashMap::new()),
            observations: RefCell::new(AHashMap::new()),
        });
        self.children
            .borrow_mut()
            .insert(key.clone(), Rc::clone(&child));
        child
    }

    pub(crate) fn existing_child(&self, key: &Key) -> Option<Rc<Self>> {
        self.children.borrow().get(key).cloned()
    }

    /// Get or create the entry at `path` below this one. Idempotent.
    pub(crate) fn get_or_create(self: &Rc<Self>, path: &[Key]) -> Rc<Self> {
        path.iter()
            .fold(Rc::clone(self), |entry, key| entry.child(key))
    }

    /// Path from the index root to this entry.
    pub(crate) fn path(&self) -> Vec<Key> {
        let mut path: Vec<Key> = self.key.iter().cloned().collect();
        let mut cursor = self.parent();
        while let Some(entry) = cursor {
            if let Some(key) = &entry.key {
                path.push(key.clone());
            }
            cursor = entry.parent();
        }
        path.reverse();
        path
    }

    /// Entries affected by `path`: the target plus its ancestors and/or
    /// descendants. Stops at the first missing segment, returning the
    /// ancestors found so far.
    pub(crate) fn collect(self: &Rc<Self>, path: &[Key], mode: Collect) -> Vec<Rc<Self>> {
        let want_ancestors = matches!(mode, Collect::Ancestors | Collect::Both);
        let mut out = Vec::new();
        let mut cursor = Rc::clone(self);
        for key in path {
            let Some(next) = cursor.existing_child(key) else {
                if want_ancestors {
                    out.push(cursor);
                }
                return out;
            };
            if want_ancestors {
                out.push(cursor);
            }
            cursor = next;
        }
        if matches!(mode, Collect::Descendants | Collect::Both) {
            cursor.push_subtree(&mut out);
        } else {
            out.push(cursor);
        }
        out
    }

    /// Push this entry and every entry below it.
    fn push_subtree(self: Rc<Self>, out: &mut Vec<Rc<Self>>) {
        let mut stack = vec![self];
        while let Some(entry) = stack.pop() {
            stack.extend(entry.children.borrow().values().cloned());
            out.push(entry);
        }
    }

    // ── Wrapper-context cache ────────────────────────────────────────

    /// The live, valid context cached for `observer`.
    pub(crate) fn cached_context(&self, observer: ObserverId) -> Option<Rc<WrapperContext>> {
        self.contexts
            .borrow()
            .get(&observer)
            .and_then(Weak::upgrade)
            .filter(|ctx| ctx.is_valid())
    }

    pub(crate) fn cache_context(&self, observer: ObserverId, ctx: &Rc<WrapperContext>) {
        let mut contexts = self.contexts.borrow_mut();
        contexts.retain(|_, weak| weak.strong_count() > 0);
        contexts.insert(observer, Rc::downgrade(ctx));
    }

    /// Revoke every cached context at this entry. Returns how many were live.
    pub(crate) fn invalidate_contexts(&self) -> usize {
        let live: Vec<Rc<WrapperContext>> = {
            let mut contexts = self.contexts.borrow_mut();
            contexts.retain(|_, weak| weak.strong_count() > 0);
            contexts.values().filter_map(Weak::upgrade).collect()
        };
        for ctx in &live {
            ctx.invalidate();
        }
        live.len()
    }

    // ── Observation records ──────────────────────────────────────────

    pub(crate) fn record_for(&self, observer: ObserverId) -> Option<Rc<ObservationRecord>> {
        self.observations.borrow().get(&observer).cloned()
    }

    pub(crate) fn insert_record(&self, observer: ObserverId, record: Rc<ObservationRecord>) {
        self.observations.borrow_mut().insert(observer, record);
    }

    /// Remove the record of `observer` if it is still `record_id`.
    ///
    /// Tolerates being called while the map is borrowed (observer teardown
    /// during dispatch); the record is then pruned lazily instead.
    pub(crate) fn remove_record(&self, observer: ObserverId, record_id: u64) {
        let Ok(mut observations) = self.observations.try_borrow_mut() else {
            return;
        };
        if observations
            .get(&observer)
            .is_some_and(|r| r.id() == record_id)
        {
            observations.remove(&observer);
        }
    }

    pub(crate) fn records(&self) -> Vec<(ObserverId, Rc<ObservationRecord>)> {
        self.observations
            .borrow()
            .iter()
            .map(|(id, record)| (*id, Rc::clone(record)))
            .collect()
    }

    pub(crate) fn record_count(&self) -> usize {
        self.observations.borrow().len()
    }
}

impl std::fmt::Debug for PathEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathEntry")
            .field("path", &crate::key::format_path(&self.path()))
            .field("children", &self.children.borrow().len())
            .field("records", &self.record_count())
            .finish()
    }
}
