#![forbid(unsafe_code)]

//! End-to-end observation scenarios.
//!
//! Validates that:
//! 1. Reads are idempotent: the same path yields the same wrapper.
//! 2. A write changes the wrappers of the written path and its ancestors
//!    but not of siblings.
//! 3. Notification is minimal across observers sharing one root.
//! 4. Derivations gate callbacks on result changes.
//! 5. `atomic` coalesces writes into one callback per observer.
//! 6. Refs are opaque; `peek` and `silent` suppress tracking and dispatch.
//! 7. The focus state machine behaves as documented.
//! 8. Log events are emitted for the main transitions.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use vigil_core::{
    FocusState, Key, Obj, ObserveOptions, Value, VigilError, Wrapper, atomic, deep, derive,
    disable, dispose, enable, focus, focus_state, into_ref, is_ref, observe, observe_derived,
    observe_with, peek, reset, root_count, silent, unwrap,
};

// ============================================================================
// Helpers
// ============================================================================

fn counter() -> (Rc<Cell<u32>>, impl Fn(&Value, &Key) + 'static) {
    let calls = Rc::new(Cell::new(0u32));
    let calls_clone = Rc::clone(&calls);
    (calls, move |_: &Value, _: &Key| {
        calls_clone.set(calls_clone.get() + 1)
    })
}

fn observe_counting(data: &Obj) -> (Wrapper, Rc<Cell<u32>>) {
    let (calls, callback) = counter();
    let state = observe(data, callback).expect("observable root");
    (state, calls)
}

/// Record, nested two levels: `{a: {b: 1, value1: 1, value2: 2}, c: {d: 1}}`.
fn nested() -> Obj {
    Obj::from_fields([
        (
            "a",
            Obj::from_fields([("b", 1), ("value1", 1), ("value2", 2)]),
        ),
        ("c", Obj::from_fields([("d", 1)])),
    ])
}

// ============================================================================
// Identity
// ============================================================================

#[test]
fn repeated_reads_return_identical_wrapper() {
    let (state, _) = observe_counting(&nested());
    let first = state.child("a").unwrap();
    let second = state.child("a").unwrap();
    assert!(first.ptr_eq(&second));
    assert!(first.child("b").is_none(), "scalars are not wrapped");
}

#[test]
fn write_replaces_wrappers_on_written_path_only() {
    let data = nested();
    let (root_before, _) = observe_counting(&data);
    let a_before = root_before.child("a").unwrap();
    let c_before = root_before.child("c").unwrap();

    a_before.set("b", 2).unwrap();

    assert!(root_before.is_stale());
    assert!(a_before.is_stale());
    assert!(!c_before.is_stale());

    let root_after = root_before.refresh().unwrap();
    let a_after = root_after.child("a").unwrap();
    let c_after = root_after.child("c").unwrap();
    assert!(!root_after.ptr_eq(&root_before));
    assert!(!a_after.ptr_eq(&a_before));
    assert!(c_after.ptr_eq(&c_before));
    assert_eq!(a_after.get("b").as_int(), Some(2));
}

#[test]
fn stale_root_wrapper_acts_on_current_value() {
    let data = nested();
    let (state, calls) = observe_counting(&data);
    state.set("x", 1).unwrap();
    assert!(state.is_stale());
    assert!(matches!(
        state.ensure_valid(),
        Err(VigilError::StaleReference { .. })
    ));
    state.set("x", 2).unwrap();
    assert_eq!(calls.get(), 2);
    assert_eq!(state.get("x").as_int(), Some(2));
}

#[test]
fn kept_child_follows_replaced_parent_member() {
    let data = nested();
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    let a = state.child("a").unwrap();
    assert_eq!(a.get("value1").as_int(), Some(1));
    focus(&state, false).unwrap();

    let replacement = Obj::from_fields([("value1", 1)]);
    state.set("a", &replacement).unwrap();
    assert_eq!(calls.get(), 1);
    assert!(a.is_stale());

    // Unchanged value at the live path: nothing to notify.
    a.set("value1", 1).unwrap();
    assert_eq!(calls.get(), 1);

    a.set("value1", 99).unwrap();
    assert_eq!(calls.get(), 2);
    assert_eq!(replacement.get(&Key::name("value1")), Some(Value::Int(99)));
    assert_eq!(a.get("value1").as_int(), Some(99));

    // The detached object is never touched.
    let detached = a.raw_obj().clone();
    assert_eq!(detached.get(&Key::name("value1")), Some(Value::Int(1)));
}

#[test]
fn kept_child_of_vanished_path_reads_empty_and_rejects_writes() {
    let data = nested();
    let (state, calls) = observe_counting(&data);
    let a = state.child("a").unwrap();
    let detached = a.raw_obj().clone();
    state.set("a", 5).unwrap();
    assert_eq!(calls.get(), 1);

    assert!(a.get("b").is_null());
    assert!(!a.has("b"));
    assert!(a.keys().is_empty());
    assert_eq!(
        a.set("b", 2).unwrap_err(),
        VigilError::StaleReference {
            path: "root.a".into()
        }
    );
    assert!(a.remove("b").is_err());
    assert_eq!(calls.get(), 1);
    assert_eq!(detached.get(&Key::name("b")), Some(Value::Int(1)));
}

#[test]
fn refresh_fails_when_path_no_longer_observable() {
    let data = nested();
    let (state, _) = observe_counting(&data);
    let a = state.child("a").unwrap();
    state.set("a", 5).unwrap();
    assert_eq!(
        a.refresh().unwrap_err(),
        VigilError::StaleReference {
            path: "root.a".into()
        }
    );
}

// ============================================================================
// Notification
// ============================================================================

#[test]
fn coarse_observer_sees_every_write_once() {
    let data = nested();
    let (state, calls) = observe_counting(&data);
    state.child("a").unwrap().set("b", 10).unwrap();
    assert_eq!(calls.get(), 1);
    state.child("c").unwrap().set("d", 10).unwrap();
    assert_eq!(calls.get(), 2);
    state.set("e", 1).unwrap();
    assert_eq!(calls.get(), 3);
}

#[test]
fn callback_receives_written_container_and_key() {
    let data = nested();
    let seen: Rc<RefCell<Vec<(Value, Key)>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let state = observe(&data, move |target, key| {
        seen_clone.borrow_mut().push((target.clone(), key.clone()));
    })
    .unwrap();
    let a = state.child("a").unwrap();
    a.set("b", 3).unwrap();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, a.raw());
    assert_ne!(seen[0].0, Value::from(&data), "nested writes report their container");
    assert_eq!(seen[0].1, Key::name("b"));
}

#[test]
fn notification_is_minimal_across_observers() {
    let data = nested();
    let (watcher_a, calls_a) = observe_counting(&data);
    let (watcher_b, calls_b) = observe_counting(&data);

    focus(&watcher_a, true).unwrap();
    assert_eq!(
        watcher_a.child("a").unwrap().get("value1").as_int(),
        Some(1)
    );
    focus(&watcher_a, false).unwrap();

    focus(&watcher_b, true).unwrap();
    deep(&watcher_b.child("a").unwrap());
    focus(&watcher_b, false).unwrap();

    watcher_a.child("a").unwrap().set("value2", 20).unwrap();
    assert_eq!(calls_a.get(), 0);
    assert_eq!(calls_b.get(), 1);

    watcher_b.child("a").unwrap().set("value1", 10).unwrap();
    assert_eq!(calls_a.get(), 1);
    assert_eq!(calls_b.get(), 2);
}

#[test]
fn replacing_subtree_reaches_leaf_observers() {
    let data = nested();
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    assert_eq!(state.child("a").unwrap().get("b").as_int(), Some(1));
    focus(&state, false).unwrap();

    state.set("a", Obj::from_fields([("b", 2)])).unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn observers_of_one_value_share_a_graph() {
    let data = nested();
    let before = root_count();
    let (first, calls_first) = observe_counting(&data);
    let (_second, calls_second) = observe_counting(&data);
    assert_eq!(root_count(), before + 1);

    first.set("z", 1).unwrap();
    assert_eq!(calls_first.get(), 1);
    assert_eq!(calls_second.get(), 1);
}

#[test]
fn dropping_every_wrapper_ends_the_observer() {
    let data = nested();
    let (calls, callback) = counter();
    let state = observe(&data, callback).unwrap();
    let writer = observe(&data, |_, _| {}).unwrap();
    drop(state);
    writer.set("x", 1).unwrap();
    assert_eq!(calls.get(), 0);
}

// ============================================================================
// Derivations
// ============================================================================

#[test]
fn derivation_gates_on_parity() {
    let data = Obj::from_fields([("x", 2)]);
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    let reader = state.clone();
    let is_even = Rc::new(move || reader.get("x").as_int().unwrap_or(0) % 2 == 0);
    assert!(derive(&is_even));
    focus(&state, false).unwrap();

    state.set("x", 4).unwrap();
    assert_eq!(calls.get(), 0);
    state.set("x", 3).unwrap();
    assert_eq!(calls.get(), 1);
    state.set("x", 5).unwrap();
    assert_eq!(calls.get(), 1);
    dispose(&state).unwrap();
}

#[test]
fn observe_derived_action_receives_new_result() {
    let data = Obj::from_fields([("items", Obj::from_items([1, 2, 3]))]);
    let totals = Rc::new(RefCell::new(Vec::new()));
    let totals_clone = Rc::clone(&totals);
    let state = observe_derived(
        &data,
        |root: &Wrapper| {
            let items = root.child("items").expect("items list");
            (0..items.len())
                .filter_map(|i| items.get(i).as_int())
                .sum::<i64>()
        },
        move |total: &i64| totals_clone.borrow_mut().push(*total),
    )
    .unwrap();
    assert_eq!(focus_state(&state), FocusState::Paused);

    let items = state.child("items").unwrap();
    items.push(4).unwrap();
    // Swapping two items keeps the sum.
    atomic(|| {
        items.set(0usize, 2).unwrap();
        items.set(1usize, 1).unwrap();
    });
    state.set("unrelated", true).unwrap();
    assert_eq!(*totals.borrow(), vec![10]);
}

// ============================================================================
// Batching
// ============================================================================

#[test]
fn atomic_coalesces_distinct_writes() {
    let data = Obj::from_fields([("a", 1), ("b", 2), ("c", 3)]);
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    for key in ["a", "b", "c"] {
        assert!(state.get(key).as_int().is_some());
    }
    focus(&state, false).unwrap();

    atomic(|| {
        state.set("a", 10).unwrap();
        state.set("b", 20).unwrap();
        atomic(|| state.set("c", 30).unwrap());
        assert_eq!(calls.get(), 0);
    });
    assert_eq!(calls.get(), 1);
}

#[test]
fn callback_panic_does_not_starve_other_observers() {
    let data = nested();
    let _failing = observe(&data, |_, _| panic!("observer failure")).unwrap();
    let (state, calls) = observe_counting(&data);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| state.set("x", 1)));
    assert!(outcome.is_err());
    assert_eq!(calls.get(), 1);
    assert_eq!(data.get(&Key::name("x")), Some(Value::Int(1)));
}

// ============================================================================
// Escape hatches
// ============================================================================

#[test]
fn ref_values_are_opaque() {
    let data = Obj::record();
    let (state, calls) = observe_counting(&data);
    let inner = Obj::record();
    state.set("x", into_ref(&inner)).unwrap();
    assert_eq!(calls.get(), 1);

    let read = state.get("x");
    assert!(read.wrapper().is_none());
    assert!(is_ref(&read.clone().into_value()));
    read.value()
        .and_then(Value::as_obj)
        .expect("raw object")
        .insert("y", 5)
        .unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(unwrap(&read, false), Value::from(&inner));
}

#[test]
fn peeked_reads_register_nothing() {
    let data = Obj::from_fields([("x", 1)]);
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    assert_eq!(peek(|| state.get("x").as_int()), Some(1));
    focus(&state, false).unwrap();
    state.set("x", 2).unwrap();
    assert_eq!(calls.get(), 0);
}

#[test]
fn silent_writes_apply_without_callbacks() {
    let data = Obj::from_fields([("x", 1)]);
    let (state, calls) = observe_counting(&data);
    silent(|| state.set("x", 5)).unwrap();
    assert_eq!(data.get(&Key::name("x")), Some(Value::Int(5)));
    assert_eq!(calls.get(), 0);
    assert!(state.is_stale(), "invalidation still happens");
}

#[test]
fn deep_unwrap_observes_whole_subtree() {
    let data = nested();
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    let a = state.get("a");
    let raw = unwrap(&a, true);
    assert_eq!(raw, Value::from(data.get(&Key::name("a"))));
    focus(&state, false).unwrap();

    state.child("a").unwrap().set("value2", 0).unwrap();
    assert_eq!(calls.get(), 1);
    state.child("c").unwrap().set("d", 0).unwrap();
    assert_eq!(calls.get(), 1);
}

// ============================================================================
// Focus state machine
// ============================================================================

#[test]
fn focus_count_scenario() {
    let data = Obj::from_fields([("count", 1)]);
    let (state, counter) = observe_counting(&data);
    focus(&state, true).unwrap();
    assert_eq!(state.get("count").as_int(), Some(1));
    focus(&state, false).unwrap();

    state.set("count", 2).unwrap();
    assert_eq!(counter.get(), 1);
    state.set("count", 2).unwrap();
    assert_eq!(counter.get(), 1);
}

#[test]
fn paused_observer_records_nothing_new() {
    let data = Obj::from_fields([("x", 1), ("y", 1)]);
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    let _ = state.get("x");
    focus(&state, false).unwrap();
    let _ = state.get("y");
    state.set("y", 2).unwrap();
    assert_eq!(calls.get(), 0);
}

#[test]
fn reset_returns_to_coarse() {
    let data = Obj::from_fields([("x", 1), ("y", 1)]);
    let (state, calls) = observe_counting(&data);
    assert_eq!(
        reset(&state, false).unwrap_err(),
        VigilError::InvalidStateTransition {
            operation: "reset",
            state: "coarse"
        }
    );
    focus(&state, true).unwrap();
    let _ = state.get("x");
    reset(&state, false).unwrap();
    assert_eq!(focus_state(&state), FocusState::Coarse);
    state.set("y", 2).unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn reset_into_focus_forgets_old_reads() {
    let data = Obj::from_fields([("x", 1)]);
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    let _ = state.get("x");
    reset(&state, true).unwrap();
    focus(&state, false).unwrap();
    state.set("x", 2).unwrap();
    assert_eq!(calls.get(), 0);
}

#[test]
fn disabled_observer_is_skipped_until_enabled() {
    let data = Obj::record();
    let (state, calls) = observe_counting(&data);
    disable(&state);
    state.set("x", 1).unwrap();
    assert_eq!(calls.get(), 0);
    enable(&state);
    state.set("x", 2).unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn intermediates_recorded_on_request() {
    let data = nested();
    let (calls, callback) = counter();
    let state = observe_with(
        &data,
        ObserveOptions::new()
            .with_record_intermediates(true)
            .with_initial_focus(true),
        callback,
    )
    .unwrap();
    let _ = state.get("a");
    focus(&state, false).unwrap();
    state.child("a").unwrap().set("value1", 9).unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn structure_reads_see_new_keys() {
    let data = Obj::record();
    let (state, calls) = observe_counting(&data);
    focus(&state, true).unwrap();
    assert!(state.keys().is_empty());
    focus(&state, false).unwrap();
    state.set("fresh", 1).unwrap();
    assert_eq!(calls.get(), 1);
    state.set("fresh", 2).unwrap();
    assert_eq!(calls.get(), 1, "existing key leaves structure alone");
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Default)]
struct EventLog {
    messages: Vec<String>,
}

struct EventCapture {
    log: Arc<Mutex<EventLog>>,
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Msg {
            message: Option<String>,
        }
        impl tracing::field::Visit for Msg {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                }
            }
        }
        let mut msg = Msg { message: None };
        event.record(&mut msg);
        if let Some(message) = msg.message {
            self.log.lock().expect("event log lock").messages.push(message);
        }
    }
}

#[test]
fn lifecycle_events_are_logged() {
    let log = Arc::new(Mutex::new(EventLog::default()));
    let subscriber = tracing_subscriber::registry().with(EventCapture {
        log: Arc::clone(&log),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let data = Obj::from_fields([("x", 1)]);
    let state = observe_with(&data, ObserveOptions::new().with_label("panel"), |_, _| {}).unwrap();
    focus(&state, true).unwrap();
    focus(&state, false).unwrap();
    reset(&state, false).unwrap();
    state.set("x", 2).unwrap();

    let messages = log.lock().expect("event log lock").messages.clone();
    for expected in [
        "observer.create",
        "observer.focus",
        "observer.reset",
        "batch.flush",
    ] {
        assert!(
            messages.iter().any(|m| m == expected),
            "missing {expected} in {messages:?}"
        );
    }
}
