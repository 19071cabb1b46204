#![forbid(unsafe_code)]

//! Memoized derivations whose result equality gates notification.
//!
//! # Design
//!
//! A [`DerivationContext`] owns a type-erased read function, an equality
//! function and the last result. Reads through wrappers performed while a
//! derivation is active record *conditional* observations referencing it;
//! a write then triggers the owning observer only if re-evaluating the
//! derivation yields a result that is not equal to the previous one.
//!
//! Contexts created through [`derive`] are memoized per
//! `(read function, equality function)` identity, taken from the `Rc`
//! allocation addresses. The memo holds contexts weakly; observation records
//! keep them alive.
//!
//! # Invariants
//!
//! 1. At most one derivation is active at a time. A nested [`derive`] runs
//!    its function inside the outer frame and does not touch its own memo.
//! 2. During one dispatch pass each context is re-evaluated at most once.
//! 3. A context with no previous result always reports a change.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

static NEXT_DERIVATION_ID: AtomicU64 = AtomicU64::new(1);

type ErasedEval = Box<dyn Fn() -> Option<Box<dyn Any>>>;
type ErasedEq = Box<dyn Fn(&dyn Any, &dyn Any) -> bool>;

thread_local! {
    static ACTIVE: RefCell<Option<Rc<DerivationContext>>> = const { RefCell::new(None) };
    static MEMO: RefCell<AHashMap<(usize, usize), Weak<DerivationContext>>> =
        RefCell::new(AHashMap::new());
}

pub(crate) struct DerivationContext {
    id: u64,
    eval: ErasedEval,
    equal: ErasedEq,
    last: RefCell<Option<Box<dyn Any>>>,
}

impl DerivationContext {
    /// Build a context from a read function that may report that its source
    /// is gone by returning `None`.
    pub(crate) fn new<T, F, E>(read: F, equal: E) -> Rc<Self>
    where
        T: 'static,
        F: Fn() -> Option<T> + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        Rc::new(Self {
            id: NEXT_DERIVATION_ID.fetch_add(1, Ordering::Relaxed),
            eval: Box::new(move || read().map(|v| Box::new(v) as Box<dyn Any>)),
            equal: Box::new(move |a: &dyn Any, b: &dyn Any| {
                match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
                    (Some(a), Some(b)) => equal(a, b),
                    _ => false,
                }
            }),
            last: RefCell::new(None),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Clone of the last stored result.
    pub(crate) fn last<T: Clone + 'static>(&self) -> Option<T> {
        self.last
            .borrow()
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    fn store(&self, value: Box<dyn Any>) {
        *self.last.borrow_mut() = Some(value);
    }

    /// Evaluate inside a frame, store the result and report whether it
    /// differs from the previous one.
    pub(crate) fn reevaluate(self: &Rc<Self>) -> bool {
        let next = {
            let _frame = Frame::enter(self);
            (self.eval)()
        };
        let Some(next) = next else {
            return false;
        };
        let changed = match self.last.borrow().as_ref() {
            Some(prev) => !(self.equal)(prev.as_ref(), next.as_ref()),
            None => true,
        };
        self.store(next);
        tracing::trace!(message = "derive.reevaluate", derivation = self.id, changed);
        changed
    }
}

impl std::fmt::Debug for DerivationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivationContext")
            .field("id", &self.id)
            .field("has_result", &self.last.borrow().is_some())
            .finish()
    }
}

/// Marks a derivation as the active one for its lifetime.
///
/// Entering while another derivation is active leaves the outer frame in
/// place.
struct Frame {
    opened: bool,
}

impl Frame {
    fn enter(ctx: &Rc<DerivationContext>) -> Self {
        let opened = ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active.is_some() {
                false
            } else {
                *active = Some(Rc::clone(ctx));
                true
            }
        });
        Self { opened }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if self.opened {
            ACTIVE.with(|active| active.borrow_mut().take());
        }
    }
}

/// The derivation currently being evaluated, if any.
pub(crate) fn active() -> Option<Rc<DerivationContext>> {
    ACTIVE.with(|active| active.borrow().clone())
}

/// Whether a derivation is currently being evaluated.
#[must_use]
pub fn is_deriving() -> bool {
    ACTIVE.with(|active| active.borrow().is_some())
}

fn fn_addr<F: ?Sized>(f: &Rc<F>) -> usize {
    Rc::as_ptr(f) as *const () as usize
}

fn memoized(key: (usize, usize), create: impl FnOnce() -> Rc<DerivationContext>) -> Rc<DerivationContext> {
    MEMO.with(|memo| {
        let mut memo = memo.borrow_mut();
        if let Some(ctx) = memo.get(&key).and_then(Weak::upgrade) {
            return ctx;
        }
        memo.retain(|_, weak| weak.strong_count() > 0);
        let ctx = create();
        memo.insert(key, Rc::downgrade(&ctx));
        ctx
    })
}

fn run_memoized<T: Clone + 'static>(ctx: &Rc<DerivationContext>, read: impl Fn() -> T) -> T {
    let value = {
        let _frame = Frame::enter(ctx);
        read()
    };
    ctx.store(Box::new(value.clone()));
    value
}

/// Evaluate `read` as a derivation and return its result.
///
/// Wrapper reads inside `read` record observations that only trigger their
/// observer when a later re-evaluation returns a different result
/// (`PartialEq`, which for [`Value`](crate::Value) is identity for objects).
///
/// The derivation is memoized per `Rc` allocation of `read`, so keep the
/// same `Rc` to reuse it across calls.
pub fn derive<T, F>(read: &Rc<F>) -> T
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    if is_deriving() {
        return read();
    }
    let key = (fn_addr(read), 0);
    let ctx = memoized(key, || {
        let f = Rc::clone(read);
        DerivationContext::new(move || Some(f()), |a: &T, b: &T| a == b)
    });
    run_memoized(&ctx, || read())
}

/// [`derive`] with a custom equality. `equal` returns `true` when two
/// results are equal.
pub fn derive_with<T, F, E>(read: &Rc<F>, equal: &Rc<E>) -> T
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    if is_deriving() {
        return read();
    }
    let key = (fn_addr(read), fn_addr(equal));
    let ctx = memoized(key, || {
        let f = Rc::clone(read);
        let eq = Rc::clone(equal);
        DerivationContext::new(move || Some(f()), move |a: &T, b: &T| eq(a, b))
    });
    run_memoized(&ctx, || read())
}
