//! Server-side view of served objects.
//!
//! A served target implements [`RemoteObject`]. Values it hands back are
//! [`Value`]s: primitives and lists go over the wire as they are, everything
//! wrapped in [`Value::Object`] stays in the reference table.

use crate::types::Tag;
use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    panic::Location,
    sync::Arc,
};
use thiserror::Error;

pub type ObjectRef = Arc<dyn RemoteObject>;

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An object or module that can be addressed through the proxy protocol.
pub trait RemoteObject: AsAny + Send + Sync + 'static {
    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Read a member. Methods answer [`Attribute::Method`].
    fn get_attribute(&self, name: &str) -> Result<Attribute, CallError>;

    fn call_method(&self, name: &str, args: Arguments) -> Result<Value, CallError>;
}

#[derive(Debug)]
pub enum Attribute {
    Value(Value),
    Method,
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(ObjectRef),
}

impl Value {
    pub fn object(obj: impl RemoteObject) -> Self {
        Value::Object(Arc::new(obj))
    }

    pub fn tag(&self) -> Tag {
        match self {
            Value::None => Tag::None,
            Value::Bool(_) => Tag::Bool,
            Value::Int(_) => Tag::Int,
            Value::Float(_) => Tag::Float,
            Value::Str(_) => Tag::Str,
            Value::List(_) => Tag::List,
            Value::Object(_) => Tag::RemoteVar,
        }
    }

    pub fn downcast_ref<T: RemoteObject>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => AsAny::as_any(obj.as_ref()).downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "{b:?}"),
            Value::Int(n) => write!(f, "{n:?}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Object(obj) => write!(f, "<{} object>", obj.type_name()),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::None, Into::into)
    }
}

/// Typed extraction of an argument.
pub trait FromValue: Sized {
    const EXPECTED: Tag;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($rust_type:ty, $tag:expr, $($arm:tt)*) => {
        impl FromValue for $rust_type {
            const EXPECTED: Tag = $tag;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    $($arm)*,
                    _ => None,
                }
            }
        }
    };
}

impl_from_value!(bool, Tag::Bool, Value::Bool(b) => Some(*b));
impl_from_value!(i64, Tag::Int, Value::Int(n) => Some(*n));
impl_from_value!(i32, Tag::Int, Value::Int(n) => i32::try_from(*n).ok());
impl_from_value!(f64, Tag::Float, Value::Float(x) => Some(*x));
impl_from_value!(String, Tag::Str, Value::Str(s) => Some(s.clone()));
impl_from_value!(ObjectRef, Tag::RemoteVar, Value::Object(obj) => Some(obj.clone()));

impl<T: FromValue> FromValue for Vec<T> {
    const EXPECTED: Tag = Tag::List;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: Tag = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::None => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Decoded arguments of one call.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn new(positional: Vec<Value>, keyword: BTreeMap<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The argument at position `index`, or the keyword argument `name`.
    pub fn value(&self, index: usize, name: &str) -> Result<&Value, CallError> {
        self.positional
            .get(index)
            .or_else(|| self.keyword.get(name))
            .ok_or_else(|| CallError::MissingArgument {
                index,
                name: name.to_owned(),
            })
    }

    pub fn arg<T: FromValue>(&self, index: usize, name: &str) -> Result<T, CallError> {
        let value = self.value(index, name)?;
        T::from_value(value).ok_or_else(|| CallError::ArgumentType {
            name: name.to_owned(),
            expected: T::EXPECTED,
            found: value.tag(),
        })
    }

    /// Like [`arg`](Self::arg), but absent and `None` arguments give `None`.
    pub fn opt<T: FromValue>(&self, index: usize, name: &str) -> Result<Option<T>, CallError> {
        match self.value(index, name) {
            Err(CallError::MissingArgument { .. }) | Ok(Value::None) => Ok(None),
            Err(e) => Err(e),
            Ok(_) => self.arg(index, name).map(Some),
        }
    }

    /// Borrow a referenced object argument as its concrete type.
    pub fn object<T: RemoteObject>(&self, index: usize, name: &str) -> Result<&T, CallError> {
        match self.value(index, name)? {
            Value::Object(obj) => AsAny::as_any(obj.as_ref())
                .downcast_ref::<T>()
                .ok_or_else(|| CallError::WrongObject {
                    name: name.to_owned(),
                    expected: std::any::type_name::<T>(),
                    found: obj.type_name().to_owned(),
                }),
            other => Err(CallError::ArgumentType {
                name: name.to_owned(),
                expected: Tag::RemoteVar,
                found: other.tag(),
            }),
        }
    }
}

/// A failure raised by served code.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("'{type_name}' object has no attribute '{member}'")]
    NoSuchMember { type_name: String, member: String },

    #[error("'{0}' is not callable")]
    NotCallable(String),

    #[error("missing required argument '{name}' (position {index})")]
    MissingArgument { index: usize, name: String },

    #[error("argument '{name}' must be {expected}, not {found}")]
    ArgumentType { name: String, expected: Tag, found: Tag },

    #[error("argument '{name}' must be a {expected} object, not {found}")]
    WrongObject {
        name: String,
        expected: &'static str,
        found: String,
    },

    #[error("{message}")]
    Failed {
        message: String,
        location: &'static Location<'static>,
    },
}

impl CallError {
    /// A failure raised from served code, remembering where it was raised.
    #[track_caller]
    pub fn failed(message: impl Into<String>) -> Self {
        CallError::Failed {
            message: message.into(),
            location: Location::caller(),
        }
    }

    pub fn no_such_member(obj: &(impl RemoteObject + ?Sized), member: &str) -> Self {
        CallError::NoSuchMember {
            type_name: obj.type_name().to_owned(),
            member: member.to_owned(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CallError::NoSuchMember { .. } => "NoSuchMember",
            CallError::NotCallable(_) => "NotCallable",
            CallError::MissingArgument { .. } => "MissingArgument",
            CallError::ArgumentType { .. } => "ArgumentType",
            CallError::WrongObject { .. } => "WrongObject",
            CallError::Failed { .. } => "Failed",
        }
    }

    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            CallError::Failed { location, .. } => Some(*location),
            _ => None,
        }
    }
}

type Function = Arc<dyn Fn(Arguments) -> Result<Value, CallError> + Send + Sync>;

#[derive(Clone)]
enum Member {
    Constant(Value),
    Function(Function),
}

/// A served namespace of constants and free functions.
///
/// ```
/// use interface_proxy::{CallError, Module};
///
/// let lib = Module::new("library")
///     .constant("PARAM1", 4)
///     .function("get_double", |args| Ok::<_, CallError>(args.arg::<i64>(0, "number")? * 2));
/// ```
#[derive(Clone)]
pub struct Module {
    name: String,
    members: BTreeMap<String, Member>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.members
            .insert(name.into(), Member::Constant(value.into()));
        self
    }

    pub fn function<F, R>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Arguments) -> Result<R, CallError> + Send + Sync + 'static,
        R: Into<Value>,
    {
        let function: Function = Arc::new(move |args| function(args).map(Into::into));
        self.members
            .insert(name.into(), Member::Function(function));
        self
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RemoteObject for Module {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get_attribute(&self, name: &str) -> Result<Attribute, CallError> {
        match self.members.get(name) {
            Some(Member::Constant(value)) => Ok(Attribute::Value(value.clone())),
            Some(Member::Function(_)) => Ok(Attribute::Method),
            None => Err(CallError::no_such_member(self, name)),
        }
    }

    fn call_method(&self, name: &str, args: Arguments) -> Result<Value, CallError> {
        match self.members.get(name) {
            Some(Member::Function(function)) => function(args),
            Some(Member::Constant(_)) => Err(CallError::NotCallable(name.to_owned())),
            None => Err(CallError::no_such_member(self, name)),
        }
    }
}
