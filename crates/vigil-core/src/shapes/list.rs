#![forbid(unsafe_code)]

use std::rc::Rc;

use crate::context::WrapperContext;
use crate::error::{Result, VigilError};
use crate::key::Key;
use crate::value::{Data, Value};
use crate::wrapper::{Interceptor, Read, Wrapper, WrapperFactory};

/// Wraps lists addressed by [`Key::Index`].
///
/// Removing an item shifts every later index, so removal notifies each
/// shifted index and the structure key as one batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListFactory;

impl WrapperFactory for ListFactory {
    fn make_observable(&self, ctx: Rc<WrapperContext>) -> Wrapper {
        Wrapper::new(ctx, Rc::new(ListInterceptor))
    }
}

struct ListInterceptor;

fn shifted_keys(from: usize, to: usize) -> Vec<Key> {
    (from..to).map(Key::Index).collect()
}

impl Interceptor for ListInterceptor {
    fn get(&self, ctx: &Rc<WrapperContext>, key: &Key) -> Read {
        super::read_member(ctx, key)
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

    fn set(&self, ctx: &Rc<WrapperContext>, key: Key, value: Value) -> Result<()> {
        super::write_member(ctx, key, value)
    }

    fn remove(&self, ctx: &Rc<WrapperContext>, key: &Key) -> Result<Option<Value>> {
        let len = ctx.value().len();
        let Some(index) = key.as_index().filter(|&i| i < len) else {
            return Ok(None);
        };
        let removed = ctx.value().remove(key);
        super::notify_all(ctx, &shifted_keys(index, len));
        Ok(removed)
    }

    fn push(&self, ctx: &Rc<WrapperContext>, value: Value) -> Result<()> {
        let index = ctx.value().len();
        super::write_member(ctx, Key::Index(index), value)
    }

    fn pop(&self, ctx: &Rc<WrapperContext>) -> Result<Option<Value>> {
        let popped = ctx.value().update(|data| match data {
            Data::List(items) => Ok(items.pop().map(|v| (items.len(), v))),
            other => Err(VigilError::unsupported(other.shape().name(), "pop")),
        })?;
        let Some((index, value)) = popped else {
            return Ok(None);
        };
        super::notify_all(ctx, &[Key::Index(index)]);
        Ok(Some(value))
    }

    fn clear(&self, ctx: &Rc<WrapperContext>) -> Result<()> {
        super::clear_members(ctx)
    }
}
