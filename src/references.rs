//! Server-side store for objects that are not carried by value.
//!
//! Entries are never evicted: a [`RemoteRef`] stays valid for the lifetime of
//! the server process.

use crate::{
    object::{ObjectRef, Value},
    types::{RemoteRef, TaggedValue},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("unknown remote reference '{0}'")]
pub struct UnknownReference(pub RemoteRef);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("'callable' is only valid as an attribute probe answer")]
pub struct CallableArgument;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    UnknownReference(#[from] UnknownReference),

    #[error(transparent)]
    Callable(#[from] CallableArgument),
}

#[derive(Default)]
struct Entries {
    counter: u64,
    objects: HashMap<String, ObjectRef>,
}

#[derive(Default)]
pub struct ReferenceTable {
    entries: Mutex<Entries>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, object: ObjectRef) -> RemoteRef {
        let mut entries = self.entries.lock();
        entries.counter += 1;
        let id = entries.counter.to_string();
        entries.objects.insert(id.clone(), object);
        RemoteRef::new(id)
    }

    pub fn resolve(&self, reference: &RemoteRef) -> Result<ObjectRef, UnknownReference> {
        self.entries
            .lock()
            .objects
            .get(reference.id())
            .cloned()
            .ok_or_else(|| UnknownReference(reference.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert a value for the client, storing every object it contains.
    pub fn export(&self, value: Value) -> TaggedValue {
        match value {
            Value::None => TaggedValue::None,
            Value::Bool(b) => TaggedValue::Bool(b),
            Value::Int(n) => TaggedValue::Int(n),
            Value::Float(x) => TaggedValue::Float(x),
            Value::Str(s) => TaggedValue::Str(s),
            Value::List(items) => {
                TaggedValue::List(items.into_iter().map(|v| self.export(v)).collect())
            }
            Value::Object(obj) => TaggedValue::Remote(self.store(obj)),
        }
    }

    /// Convert a value sent by the client, resolving its references.
    pub fn import(&self, value: TaggedValue) -> Result<Value, ImportError> {
        Ok(match value {
            TaggedValue::None => Value::None,
            TaggedValue::Bool(b) => Value::Bool(b),
            TaggedValue::Int(n) => Value::Int(n),
            TaggedValue::Float(x) => Value::Float(x),
            TaggedValue::Str(s) => Value::Str(s),
            TaggedValue::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|v| self.import(v))
                    .collect::<Result<_, _>>()?,
            ),
            TaggedValue::Remote(reference) => Value::Object(self.resolve(&reference)?),
            TaggedValue::Callable => return Err(CallableArgument.into()),
        })
    }
}
