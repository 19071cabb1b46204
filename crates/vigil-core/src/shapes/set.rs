#![forbid(unsafe_code)]

use std::rc::Rc;

use crate::context::WrapperContext;
use crate::error::{Result, VigilError};
use crate::key::Key;
use crate::value::{Data, Value};
use crate::wrapper::{Interceptor, Read, Wrapper, WrapperFactory};

/// Wraps unordered collections of keys. Membership of each key is tracked
/// individually, so `has(k)` is only disturbed by adding or removing `k`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetFactory;

impl WrapperFactory for SetFactory {
    fn make_observable(&self, ctx: Rc<WrapperContext>) -> Wrapper {
        Wrapper::new(ctx, Rc::new(SetInterceptor))
    }
}

struct SetInterceptor;

impl Interceptor for SetInterceptor {
    fn get(&self, ctx: &Rc<WrapperContext>, key: &Key) -> Read {
        Read::Plain(Value::Bool(super::has_member(ctx, key)))
    }

    fn has(&self, ctx: &Rc<WrapperContext>, key: &Key) -> bool {
        super::has_member(ctx, key)
    }

    fn keys(&self, ctx: &Rc<WrapperContext>) -> Vec<Key> {
        super::member_keys(ctx)
    }

    fn len(&self, ctx: &Rc<WrapperContext>) -> usize {
        super::member_count(ctx)
    }

    /// Members carry no value; use [`Wrapper::insert`].
    fn set(&self, ctx: &Rc<WrapperContext>, _key: Key, _value: Value) -> Result<()> {
        Err(VigilError::unsupported(ctx.value().shape().name(), "set"))
    }

    fn remove(&self, ctx: &Rc<WrapperContext>, key: &Key) -> Result<Option<Value>> {
        super::remove_member(ctx, key)
    }

    fn insert(&self, ctx: &Rc<WrapperContext>, member: Key) -> Result<bool> {
        let added = ctx.value().update(|data| match data {
            Data::Set(members) => Ok(members.insert(member.clone())),
            other => Err(VigilError::unsupported(other.shape().name(), "insert")),
        })?;
        if added {
            super::notify_all(ctx, std::slice::from_ref(&member));
        }
        Ok(added)
    }

    fn clear(&self, ctx: &Rc<WrapperContext>) -> Result<()> {
        super::clear_members(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::{Obj, focus, observe};

    use super::*;

    #[test]
    fn membership_is_tracked_per_member() {
        let data = Obj::from_members(["red", "green"]);
        let calls = Rc::new(Cell::new(0u32));
        let calls_clone = Rc::clone(&calls);
        let state = observe(&data, move |_, _| calls_clone.set(calls_clone.get() + 1)).unwrap();
        focus(&state, true).unwrap();
        assert!(!state.has("blue"));
        focus(&state, false).unwrap();

        assert!(state.insert("yellow").unwrap());
        assert_eq!(calls.get(), 0);
        assert!(state.insert("blue").unwrap());
        assert_eq!(calls.get(), 1);
        assert!(!state.insert("blue").unwrap());
        assert_eq!(calls.get(), 1);
        assert_eq!(state.remove("blue").unwrap(), Some(Value::Bool(true)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn set_is_unsupported() {
        let state = observe(Obj::set(), |_, _| {}).unwrap();
        assert!(matches!(
            state.set("a", 1).unwrap_err(),
            VigilError::UnsupportedOperation { operation: "set", .. }
        ));
        assert_eq!(state.get("a").as_bool(), Some(false));
    }
}
