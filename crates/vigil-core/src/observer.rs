#![forbid(unsafe_code)]

//! Observers, their focus state machine and their observation records.
//!
//! # States
//!
//! | State      | Focus flag | Read-time recording                          |
//! |------------|------------|----------------------------------------------|
//! | `Coarse`   | unset      | none; a root catch-all record covers writes  |
//! | `Focusing` | `true`     | leaf reads (and intermediates if requested)  |
//! | `Paused`   | `false`    | none; existing records stay live             |
//!
//! Forced reads and reads inside a derivation record in every state.
//!
//! # Validity
//!
//! Every record an observer creates is listed in its valid set. Resetting or
//! refocusing from `Coarse` clears that set and runs the observer's
//! disposers, which remove its records from the path index. A record found
//! during a write whose id is no longer valid is deleted lazily.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::context::WrapperContext;
use crate::derive::DerivationContext;
use crate::error::{Result, VigilError};
use crate::key::Key;
use crate::path_index::PathEntry;
use crate::shapes;
use crate::value::{Obj, Value};
use crate::wrapper::Wrapper;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked with the raw container that was written and the key
/// that changed.
///
/// The first argument is the container holding the changed key. It is the
/// observed root only for writes made directly on the root.
pub type Callback = dyn Fn(&Value, &Key);

/// Identity of one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Selective-observation mode of an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "lowercase"))]
pub enum FocusState {
    /// Whole-tree observation through the root catch-all record.
    #[default]
    Coarse,
    /// Fine-grained recording of reads.
    Focusing,
    /// Existing records stay live, no new ones are created.
    Paused,
}

impl FocusState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Coarse => "coarse",
            Self::Focusing => "focusing",
            Self::Paused => "paused",
        }
    }
}

/// Options for [`observe_with`](crate::observe_with).
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "json", serde(default))]
pub struct ObserveOptions {
    /// While focusing, also record reads of observable intermediates.
    pub record_intermediates: bool,
    /// Diagnostic label carried in log events.
    pub label: Option<String>,
    /// Apply `focus(enable)` right after creation.
    pub initial_focus: Option<bool>,
}

impl ObserveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record_intermediates(mut self, enabled: bool) -> Self {
        self.record_intermediates = enabled;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_initial_focus(mut self, enable: bool) -> Self {
        self.initial_focus = Some(enable);
        self
    }
}

/// When a record triggers its observer.
#[derive(Debug, Clone)]
pub(crate) enum Condition {
    Always,
    /// Only if one of these derivations changed.
    Derived(SmallVec<[Rc<DerivationContext>; 2]>),
}

impl Condition {
    fn merge(&mut self, derivation: Option<Rc<DerivationContext>>) {
        let Some(d) = derivation else {
            *self = Self::Always;
            return;
        };
        if let Self::Derived(list) = self {
            if !list.iter().any(|existing| Rc::ptr_eq(existing, &d)) {
                list.push(d);
            }
        }
    }
}

/// Marks an observer for notification on writes at one path.
pub(crate) struct ObservationRecord {
    id: u64,
    observer: Weak<ObserverInner>,
    condition: RefCell<Condition>,
}

impl ObservationRecord {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn observer(&self) -> Option<Rc<ObserverInner>> {
        self.observer.upgrade()
    }

    pub(crate) fn condition(&self) -> Condition {
        self.condition.borrow().clone()
    }
}

/// Cleanup action removing one record from the path index.
struct Disposer {
    entry: Weak<PathEntry>,
    record_id: u64,
}

pub(crate) struct ObserverInner {
    id: ObserverId,
    label: Option<String>,
    callback: Box<Callback>,
    focus: Cell<FocusState>,
    enabled: Cell<bool>,
    record_intermediates: bool,
    valid: RefCell<AHashSet<u64>>,
    disposers: RefCell<Vec<Disposer>>,
    root_entry: Rc<PathEntry>,
    root_value: Obj,
}

impl ObserverInner {
    /// Create an observer in `Coarse` state with its root catch-all record.
    pub(crate) fn new(
        root_value: Obj,
        root_entry: Rc<PathEntry>,
        callback: Box<Callback>,
        options: &ObserveOptions,
    ) -> Rc<Self> {
        let observer = Rc::new(Self {
            id: ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed)),
            label: options.label.clone(),
            callback,
            focus: Cell::new(FocusState::Coarse),
            enabled: Cell::new(true),
            record_intermediates: options.record_intermediates,
            valid: RefCell::new(AHashSet::new()),
            disposers: RefCell::new(Vec::new()),
            root_entry,
            root_value,
        });
        observer.establish_root_record();
        tracing::debug!(
            message = "observer.create",
            observer = observer.id.raw(),
            label = observer.label.as_deref().unwrap_or(""),
            shape = observer.root_value.shape().name(),
        );
        observer
    }

    pub(crate) fn id(&self) -> ObserverId {
        self.id
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn focus(&self) -> FocusState {
        self.focus.get()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub(crate) fn records_intermediates(&self) -> bool {
        self.record_intermediates
    }

    pub(crate) fn root_entry(&self) -> &Rc<PathEntry> {
        &self.root_entry
    }

    pub(crate) fn root_value(&self) -> &Obj {
        &self.root_value
    }

    pub(crate) fn notify(&self, target: &Value, key: &Key) {
        (self.callback)(target, key);
    }

    pub(crate) fn is_valid(&self, record_id: u64) -> bool {
        self.valid.borrow().contains(&record_id)
    }

    pub(crate) fn valid_count(&self) -> usize {
        self.valid.borrow().len()
    }

    /// Create or extend this observer's record at `entry`.
    ///
    /// `None` makes the record unconditional; a derivation adds a condition
    /// unless the record is already unconditional.
    pub(crate) fn record_at(
        self: &Rc<Self>,
        entry: &Rc<PathEntry>,
        derivation: Option<Rc<DerivationContext>>,
    ) {
        if let Some(existing) = entry.record_for(self.id) {
            if self.is_valid(existing.id) {
                existing.condition.borrow_mut().merge(derivation);
                return;
            }
        }
        let condition = match derivation {
            Some(d) => Condition::Derived(SmallVec::from_elem(d, 1)),
            None => Condition::Always,
        };
        let record = Rc::new(ObservationRecord {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            observer: Rc::downgrade(self),
            condition: RefCell::new(condition),
        });
        self.valid.borrow_mut().insert(record.id);
        self.disposers.borrow_mut().push(Disposer {
            entry: Rc::downgrade(entry),
            record_id: record.id,
        });
        entry.insert_record(self.id, record);
    }

    fn establish_root_record(self: &Rc<Self>) {
        let root = Rc::clone(&self.root_entry);
        self.record_at(&root, None);
    }

    /// Forget every record: clear the valid set and run the disposers.
    pub(crate) fn discard_observations(&self) {
        self.valid.borrow_mut().clear();
        let disposers = std::mem::take(&mut *self.disposers.borrow_mut());
        for disposer in disposers {
            if let Some(entry) = disposer.entry.upgrade() {
                entry.remove_record(self.id, disposer.record_id);
            }
        }
    }

    /// Apply `focus(enable)`.
    pub(crate) fn set_focus(&self, enable: bool) {
        let from = self.focus.get();
        let to = if enable {
            FocusState::Focusing
        } else {
            FocusState::Paused
        };
        if enable && from == FocusState::Coarse {
            self.discard_observations();
        }
        self.focus.set(to);
        tracing::debug!(
            message = "observer.focus",
            observer = self.id.raw(),
            from = from.name(),
            to = to.name(),
        );
    }

    /// Apply `reset(into_focus)`. Fails from `Coarse`.
    pub(crate) fn reset(self: &Rc<Self>, into_focus: bool) -> Result<()> {
        let from = self.focus.get();
        if from == FocusState::Coarse {
            return Err(VigilError::InvalidStateTransition {
                operation: "reset",
                state: from.name(),
            });
        }
        self.discard_observations();
        if into_focus {
            self.focus.set(FocusState::Focusing);
        } else {
            self.focus.set(FocusState::Coarse);
            self.establish_root_record();
        }
        tracing::debug!(
            message = "observer.reset",
            observer = self.id.raw(),
            from = from.name(),
            to = self.focus.get().name(),
        );
        Ok(())
    }

    /// Valid context at the root entry, created if needed.
    pub(crate) fn root_context(self: &Rc<Self>) -> Option<Rc<WrapperContext>> {
        if let Some(ctx) = self.root_entry.cached_context(self.id) {
            return Some(ctx);
        }
        let factory = shapes::factory_for(&self.root_value.shape())?;
        Some(WrapperContext::create(
            Rc::clone(&self.root_entry),
            Rc::clone(self),
            self.root_value.clone(),
            factory,
        ))
    }

    /// Current root wrapper of this observer.
    pub(crate) fn root_wrapper(self: &Rc<Self>) -> Option<Wrapper> {
        self.root_context().map(|ctx| ctx.wrapper())
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        for disposer in self.disposers.get_mut().drain(..) {
            if let Some(entry) = disposer.entry.upgrade() {
                entry.remove_record(self.id, disposer.record_id);
            }
        }
        tracing::debug!(message = "observer.drop", observer = self.id.raw());
    }
}

impl fmt::Debug for ObserverInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("focus", &self.focus.get())
            .field("enabled", &self.enabled.get())
            .field("records", &self.valid.borrow().len())
            .finish()
    }
}
