#![forbid(unsafe_code)]

//! Batch coordinator: deduplicated, derivation-gated callback dispatch.
//!
//! Writes produce [`Submission`]s. Outside a batch they are dispatched
//! immediately; inside [`atomic`] they accumulate until the outermost call
//! returns. Dispatch groups submissions by observer so each callback fires at
//! most once per pass, and re-evaluates each referenced derivation at most
//! once per pass.
//!
//! # Failure Modes
//!
//! A panicking callback does not stop the pass: the remaining due observers
//! are still called, then the first panic payload is resumed. A panic inside
//! the closure given to [`atomic`] discards the pending submissions of the
//! outermost batch.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::derive::DerivationContext;
use crate::key::Key;
use crate::observer::{Condition, ObserverId, ObserverInner};
use crate::value::Value;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
    static PENDING: RefCell<Vec<Submission>> = const { RefCell::new(Vec::new()) };
}

/// One observer found due by one write.
pub(crate) struct Submission {
    pub(crate) observer: Rc<ObserverInner>,
    pub(crate) condition: Condition,
    pub(crate) target: Value,
    pub(crate) key: Key,
}

/// Whether an [`atomic`] call is in progress on this thread.
#[must_use]
pub fn in_batch() -> bool {
    DEPTH.with(Cell::get) > 0
}

/// Dispatch now, or defer to the enclosing batch.
pub(crate) fn submit(submissions: Vec<Submission>) {
    if submissions.is_empty() {
        return;
    }
    if in_batch() {
        PENDING.with(|pending| pending.borrow_mut().extend(submissions));
        return;
    }
    dispatch(submissions);
}

struct BatchGuard {
    finished: bool,
}

impl BatchGuard {
    fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { finished: false }
    }

    /// Leave the batch; the outermost exit takes the accumulated submissions.
    fn finish(mut self) -> Option<Vec<Submission>> {
        self.finished = true;
        leave()
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if !self.finished {
            let discarded = leave().map_or(0, |pending| pending.len());
            if discarded > 0 {
                tracing::debug!(message = "batch.discard", submissions = discarded);
            }
        }
    }
}

fn leave() -> Option<Vec<Submission>> {
    let depth = DEPTH.with(|depth| {
        let next = depth.get().saturating_sub(1);
        depth.set(next);
        next
    });
    (depth == 0).then(|| PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut())))
}

/// Run `f` as one batch: every observer affected by the writes inside it is
/// called once, after the outermost `atomic` returns.
///
/// Nested calls join the outer batch.
pub fn atomic<R>(f: impl FnOnce() -> R) -> R {
    let guard = BatchGuard::enter();
    let result = f();
    if let Some(pending) = guard.finish() {
        dispatch(pending);
    }
    result
}

/// Submissions merged per observer.
struct Due {
    observer: Rc<ObserverInner>,
    always: bool,
    derivations: SmallVec<[Rc<DerivationContext>; 4]>,
    target: Value,
    key: Key,
}

impl Due {
    fn new(submission: Submission) -> Self {
        let mut due = Self {
            observer: submission.observer,
            always: false,
            derivations: SmallVec::new(),
            target: submission.target,
            key: submission.key,
        };
        due.absorb(submission.condition);
        due
    }

    fn absorb(&mut self, condition: Condition) {
        match condition {
            Condition::Always => self.always = true,
            Condition::Derived(list) => {
                for d in list {
                    if !self.derivations.iter().any(|known| Rc::ptr_eq(known, &d)) {
                        self.derivations.push(d);
                    }
                }
            }
        }
    }

    /// Re-evaluate every referenced derivation (once per pass through
    /// `memo`) and decide whether the callback fires.
    fn is_triggered(&self, memo: &mut AHashMap<u64, bool>) -> bool {
        let mut changed = false;
        for d in &self.derivations {
            let result = match memo.get(&d.id()) {
                Some(&known) => known,
                None => {
                    let fresh = d.reevaluate();
                    memo.insert(d.id(), fresh);
                    fresh
                }
            };
            changed |= result;
        }
        self.always || changed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn dispatch(submissions: Vec<Submission>) {
    let total = submissions.len();
    let mut order: Vec<Due> = Vec::new();
    let mut slots: AHashMap<ObserverId, usize> = AHashMap::new();
    for submission in submissions {
        let id = submission.observer.id();
        match slots.get(&id) {
            Some(&slot) => order[slot].absorb(submission.condition),
            None => {
                slots.insert(id, order.len());
                order.push(Due::new(submission));
            }
        }
    }

    let mut memo = AHashMap::new();
    let due: Vec<Due> = order
        .into_iter()
        .filter(|due| due.is_triggered(&mut memo))
        .collect();

    let mut first_panic = None;
    let mut notified = 0usize;
    for due in &due {
        // A callback earlier in this pass may have disabled this observer.
        if !due.observer.is_enabled() {
            continue;
        }
        notified += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            due.observer.notify(&due.target, &due.key);
        }));
        if let Err(payload) = outcome {
            tracing::warn!(
                message = "batch.callback_panic",
                observer = due.observer.id().raw(),
                label = due.observer.label().unwrap_or(""),
                panic = panic_message(payload.as_ref()),
            );
            first_panic.get_or_insert(payload);
        }
    }

    tracing::debug!(
        message = "batch.flush",
        observers = notified,
        submissions = total,
        derivations = memo.len(),
    );

    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserveOptions;
    use crate::path_index::PathEntry;
    use crate::value::Obj;

    fn counting_observer(counter: &Rc<Cell<u32>>) -> Rc<ObserverInner> {
        let counter = Rc::clone(counter);
        ObserverInner::new(
            Obj::record(),
            PathEntry::root(),
            Box::new(move |_, _| counter.set(counter.get() + 1)),
            &ObserveOptions::default(),
        )
    }

    fn submission(observer: &Rc<ObserverInner>, condition: Condition) -> Submission {
        Submission {
            observer: Rc::clone(observer),
            condition,
            target: Value::Null,
            key: Key::name("k"),
        }
    }

    #[test]
    fn immediate_dispatch_outside_batch() {
        let count = Rc::new(Cell::new(0));
        let obs = counting_observer(&count);
        submit(vec![submission(&obs, Condition::Always)]);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn duplicate_submissions_call_once() {
        let count = Rc::new(Cell::new(0));
        let obs = counting_observer(&count);
        submit(vec![
            submission(&obs, Condition::Always),
            submission(&obs, Condition::Always),
        ]);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn atomic_defers_until_outermost() {
        let count = Rc::new(Cell::new(0));
        let obs = counting_observer(&count);
        atomic(|| {
            submit(vec![submission(&obs, Condition::Always)]);
            atomic(|| submit(vec![submission(&obs, Condition::Always)]));
            assert_eq!(count.get(), 0);
            assert!(in_batch());
        });
        assert!(!in_batch());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn atomic_returns_closure_value() {
        assert_eq!(atomic(|| 5), 5);
    }

    #[test]
    fn panicking_batch_discards_pending() {
        let count = Rc::new(Cell::new(0));
        let obs = counting_observer(&count);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            atomic(|| {
                submit(vec![submission(&obs, Condition::Always)]);
                panic!("abort batch");
            })
        }));
        assert!(result.is_err());
        assert!(!in_batch());
        submit(vec![submission(&obs, Condition::Always)]);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn unchanged_derivation_suppresses_callback() {
        let count = Rc::new(Cell::new(0));
        let obs = counting_observer(&count);
        let d = DerivationContext::new(|| Some(1), |a: &i32, b: &i32| a == b);
        d.reevaluate();
        submit(vec![submission(
            &obs,
            Condition::Derived(SmallVec::from_elem(Rc::clone(&d), 1)),
        )]);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn derivation_evaluated_once_per_pass() {
        let evals = Rc::new(Cell::new(0u32));
        let evals_clone = Rc::clone(&evals);
        let d = DerivationContext::new(
            move || {
                evals_clone.set(evals_clone.get() + 1);
                Some(evals_clone.get())
            },
            |a: &u32, b: &u32| a == b,
        );
        let count_a = Rc::new(Cell::new(0));
        let count_b = Rc::new(Cell::new(0));
        let a = counting_observer(&count_a);
        let b = counting_observer(&count_b);
        let cond = || Condition::Derived(SmallVec::from_elem(Rc::clone(&d), 1));
        submit(vec![submission(&a, cond()), submission(&b, cond())]);
        assert_eq!(evals.get(), 1);
        assert_eq!(count_a.get(), 1);
        assert_eq!(count_b.get(), 1);
    }

    #[test]
    fn callback_panic_still_notifies_others() {
        let count = Rc::new(Cell::new(0));
        let panicking = ObserverInner::new(
            Obj::record(),
            PathEntry::root(),
            Box::new(|_, _| panic!("callback failure")),
            &ObserveOptions::default(),
        );
        let healthy = counting_observer(&count);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            submit(vec![
                submission(&panicking, Condition::Always),
                submission(&healthy, Condition::Always),
            ]);
        }));
        assert!(result.is_err());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn disabled_observer_is_skipped() {
        let count = Rc::new(Cell::new(0));
        let obs = counting_observer(&count);
        obs.set_enabled(false);
        submit(vec![submission(&obs, Condition::Always)]);
        assert_eq!(count.get(), 0);
    }
}
