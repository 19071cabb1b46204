#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vigil_core::{
    Obj, Value, Wrapper, atomic, deep, disable, enable, focus, into_ref, observe, peek, reset,
    silent,
};

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Arbitrary, Debug)]
enum Op {
    Read { observer: u8, path: Vec<u8> },
    Write { observer: u8, path: Vec<u8>, value: i8 },
    Nest { observer: u8, path: Vec<u8> },
    WriteRef { observer: u8, key: u8 },
    Remove { observer: u8, key: u8 },
    Push { observer: u8, value: i8 },
    Focus { observer: u8, enable: bool },
    Reset { observer: u8, into_focus: bool },
    Deep { observer: u8, path: Vec<u8> },
    Toggle { observer: u8, enabled: bool },
    Peek { observer: u8, path: Vec<u8> },
    Silent { observer: u8, key: u8, value: i8 },
    Atomic(Vec<(u8, u8, i8)>),
}

fn name(byte: u8) -> &'static str {
    NAMES[usize::from(byte) % NAMES.len()]
}

/// Walk `path` through nested wrappers, stopping at the first leaf.
fn walk(root: &Wrapper, path: &[u8]) -> Wrapper {
    let mut cursor = root.clone();
    for byte in path.iter().take(6) {
        match cursor.child(name(*byte)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    cursor
}

fuzz_target!(|ops: Vec<Op>| {
    let data = Obj::from_fields([
        ("a", Value::Int(0)),
        ("b", Value::from(Obj::from_fields([("c", 1)]))),
        ("list", Value::from(Obj::from_items([1, 2, 3]))),
    ]);
    let calls = Rc::new(Cell::new(0u64));
    let roots: Vec<Wrapper> = (0..3)
        .map(|_| {
            let calls = Rc::clone(&calls);
            observe(&data, move |_, _| calls.set(calls.get() + 1)).expect("record root")
        })
        .collect();
    let pick = |i: u8| &roots[usize::from(i) % roots.len()];

    for op in ops.into_iter().take(256) {
        match op {
            Op::Read { observer, path } => {
                let _ = walk(pick(observer), &path).len();
            }
            Op::Write { observer, path, value } => {
                let target = walk(pick(observer), &path);
                let _ = target.set(name(value as u8), i64::from(value));
            }
            Op::Nest { observer, path } => {
                let target = walk(pick(observer), &path);
                let _ = target.set(name(path.len() as u8), Obj::from_fields([("c", 0)]));
            }
            Op::WriteRef { observer, key } => {
                let _ = pick(observer).set(name(key), into_ref(Obj::record()));
            }
            Op::Remove { observer, key } => {
                let _ = pick(observer).remove(name(key));
            }
            Op::Push { observer, value } => {
                if let Some(list) = pick(observer).child("list") {
                    let _ = list.push(i64::from(value));
                }
            }
            Op::Focus { observer, enable } => {
                let _ = focus(pick(observer), enable);
            }
            Op::Reset { observer, into_focus } => {
                let _ = reset(pick(observer), into_focus);
            }
            Op::Deep { observer, path } => {
                deep(&walk(pick(observer), &path));
            }
            Op::Toggle { observer, enabled } => {
                if enabled {
                    enable(pick(observer));
                } else {
                    disable(pick(observer));
                }
            }
            Op::Peek { observer, path } => {
                peek(|| walk(pick(observer), &path).keys());
            }
            Op::Silent { observer, key, value } => {
                let _ = silent(|| pick(observer).set(name(key), i64::from(value)));
            }
            Op::Atomic(writes) => {
                let before = calls.get();
                atomic(|| {
                    for (observer, key, value) in writes.iter().take(32) {
                        let _ = pick(*observer).set(name(*key), i64::from(*value));
                    }
                });
                assert!(calls.get() - before <= roots.len() as u64);
            }
        }
    }
});
