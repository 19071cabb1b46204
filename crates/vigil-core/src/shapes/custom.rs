#![forbid(unsafe_code)]

use std::rc::Rc;

use crate::context::WrapperContext;
use crate::error::Result;
use crate::key::Key;
use crate::value::Value;
use crate::wrapper::{Interceptor, Read, Wrapper, WrapperFactory};

/// Generic factory for [`CustomData`](crate::CustomData) shapes, driving
/// their keyed member API.
#[derive(Debug, Default, Clone, Copy)]
pub struct CustomFactory;

impl WrapperFactory for CustomFactory {
    fn make_observable(&self, ctx: Rc<WrapperContext>) -> Wrapper {
        Wrapper::new(ctx, Rc::new(CustomInterceptor))
    }
}

struct CustomInterceptor;

impl Interceptor for CustomInterceptor {
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
        super::remove_member(ctx, key)
    }
}
