#![forbid(unsafe_code)]

//! Conversion between value trees and `serde_json` values.
//!
//! JSON objects become records and arrays become lists. Snapshots render
//! maps as objects keyed by the display form of their keys and sets as
//! arrays. A cycle in the graph is cut with `null`.

use ahash::AHashSet;
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::key::Key;
use crate::value::{Data, Obj, ShapeKind, Value};

impl Value {
    /// Build a value tree from JSON. Integers that fit `i64` stay integral.
    #[must_use]
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Self::Str(s.as_str().into()),
            Json::Array(items) => Self::Obj(Obj::from_items(items.iter().map(Self::from_json))),
            Json::Object(fields) => Self::Obj(Obj::from_fields(
                fields.iter().map(|(name, v)| (name.as_str(), Self::from_json(v))),
            )),
        }
    }

    /// Snapshot this value tree as JSON. Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut visiting = AHashSet::new();
        snapshot(self, &mut visiting)
    }
}

fn key_json(key: &Key) -> Json {
    match key {
        Key::Name(n) => Json::String(n.to_string()),
        Key::Index(i) => Json::from(*i),
        Key::Int(i) => Json::from(*i),
        Key::Bool(b) => Json::Bool(*b),
        Key::Structure => Json::Null,
    }
}

fn snapshot(value: &Value, visiting: &mut AHashSet<usize>) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Obj(obj) => {
            if !visiting.insert(obj.addr()) {
                return Json::Null;
            }
            let json = snapshot_obj(obj, visiting);
            visiting.remove(&obj.addr());
            json
        }
    }
}

fn snapshot_obj(obj: &Obj, visiting: &mut AHashSet<usize>) -> Json {
    // Collect children first so no borrow of `obj` is held while recursing.
    let (is_object, members): (bool, Vec<(Key, Value)>) = obj.with(|data| match data {
        Data::List(items) => (
            false,
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::Index(i), v.clone()))
                .collect(),
        ),
        Data::Set(members) => (
            false,
            members.iter().map(|k| (k.clone(), Value::Null)).collect(),
        ),
        other => (
            true,
            other
                .keys()
                .into_iter()
                .filter_map(|k| other.get(&k).map(|v| (k, v)))
                .collect(),
        ),
    });
    let is_set = obj.shape() == ShapeKind::Set;
    if is_object {
        let fields: JsonMap<String, Json> = members
            .iter()
            .map(|(k, v)| (k.to_string(), snapshot(v, visiting)))
            .collect();
        Json::Object(fields)
    } else if is_set {
        Json::Array(members.iter().map(|(k, _)| key_json(k)).collect())
    } else {
        Json::Array(members.iter().map(|(_, v)| snapshot(v, visiting)).collect())
    }
}
