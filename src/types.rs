use serde::{
    de,
    ser::{SerializeMap, SerializeSeq},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value as Json;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Wire tag of a [`TaggedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    None,
    Bool,
    Int,
    Float,
    Str,
    List,
    RemoteVar,
    Callable,
}

impl Tag {
    pub fn name(&self) -> &'static str {
        use Tag::*;
        match self {
            None => "NoneType",
            Bool => "bool",
            Int => "int",
            Float => "float",
            Str => "str",
            List => "list",
            RemoteVar => "RemoteVar",
            Callable => "callable",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown tag '{0}'")]
pub struct UnknownTag(pub String);

impl FromStr for Tag {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Tag::*;
        Ok(match s {
            "NoneType" => None,
            "bool" => Bool,
            "int" => Int,
            "float" => Float,
            "str" => Str,
            "list" => List,
            "RemoteVar" => RemoteVar,
            "callable" => Callable,
            other => return Err(UnknownTag(other.to_owned())),
        })
    }
}

/// Opaque handle to an object held by the server's reference table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteRef(String);

impl RemoteRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value as it crosses the process boundary.
///
/// Lists are the only container carried by value. Every other non-primitive
/// object stays on the server and travels as a [`RemoteRef`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<TaggedValue>),
    Remote(RemoteRef),
    /// Answer to an attribute probe on a method. Never carries a payload.
    Callable,
}

impl TaggedValue {
    pub fn tag(&self) -> Tag {
        match self {
            TaggedValue::None => Tag::None,
            TaggedValue::Bool(_) => Tag::Bool,
            TaggedValue::Int(_) => Tag::Int,
            TaggedValue::Float(_) => Tag::Float,
            TaggedValue::Str(_) => Tag::Str,
            TaggedValue::List(_) => Tag::List,
            TaggedValue::Remote(_) => Tag::RemoteVar,
            TaggedValue::Callable => Tag::Callable,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, TaggedValue::Callable)
    }

    fn from_json(json: Json) -> Result<Self, String> {
        let mut fields = match json {
            Json::Array(items) => {
                return items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()
                    .map(TaggedValue::List)
            }
            Json::Object(fields) => fields,
            other => return Err(format!("expected a tagged value, found {other}")),
        };
        let tag: Tag = match fields.remove("type") {
            Some(Json::String(tag)) => tag.parse().map_err(|e: UnknownTag| e.to_string())?,
            _ => return Err("tagged value has no string 'type' field".to_owned()),
        };
        let payload = fields.remove("value").unwrap_or(Json::Null);

        Ok(match (tag, payload) {
            (Tag::None, _) => TaggedValue::None,
            (Tag::Callable, _) => TaggedValue::Callable,
            (Tag::Bool, Json::Bool(b)) => TaggedValue::Bool(b),
            (Tag::Int, Json::Number(n)) if n.is_i64() => match n.as_i64() {
                Some(n) => TaggedValue::Int(n),
                None => return Err(format!("{n} is not a 64-bit integer")),
            },
            (Tag::Float, Json::Number(n)) => match n.as_f64() {
                Some(f) => TaggedValue::Float(f),
                None => return Err(format!("{n} is not a float")),
            },
            // JSON numbers cannot hold non-finite floats.
            (Tag::Float, Json::String(s)) => match s.as_str() {
                "inf" => TaggedValue::Float(f64::INFINITY),
                "-inf" => TaggedValue::Float(f64::NEG_INFINITY),
                "nan" => TaggedValue::Float(f64::NAN),
                _ => return Err(format!("'{s}' is not a float")),
            },
            (Tag::Str, Json::String(s)) => TaggedValue::Str(s),
            (Tag::RemoteVar, Json::String(id)) => TaggedValue::Remote(RemoteRef(id)),
            (Tag::List, _) => return Err("lists are encoded as plain arrays".to_owned()),
            (tag, payload) => return Err(format!("payload {payload} does not match tag '{tag}'")),
        })
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaggedValue::None => f.write_str("None"),
            TaggedValue::Bool(b) => write!(f, "{b}"),
            TaggedValue::Int(n) => write!(f, "{n}"),
            TaggedValue::Float(x) => write!(f, "{x:?}"),
            TaggedValue::Str(s) => write!(f, "{s:?}"),
            TaggedValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            TaggedValue::Remote(r) => write!(f, "<remote {r}>"),
            TaggedValue::Callable => f.write_str("<callable>"),
        }
    }
}

impl Serialize for TaggedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        fn tagged<S: Serializer, P: Serialize + ?Sized>(
            serializer: S,
            tag: Tag,
            payload: &P,
        ) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(2))?;
            map.serialize_entry("type", tag.name())?;
            map.serialize_entry("value", payload)?;
            map.end()
        }

        match self {
            TaggedValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TaggedValue::None | TaggedValue::Callable => tagged(serializer, self.tag(), &()),
            TaggedValue::Bool(b) => tagged(serializer, Tag::Bool, b),
            TaggedValue::Int(n) => tagged(serializer, Tag::Int, n),
            TaggedValue::Float(x) if x.is_nan() => tagged(serializer, Tag::Float, "nan"),
            TaggedValue::Float(x) if x.is_infinite() => {
                tagged(serializer, Tag::Float, if *x > 0.0 { "inf" } else { "-inf" })
            }
            TaggedValue::Float(x) => tagged(serializer, Tag::Float, x),
            TaggedValue::Str(s) => tagged(serializer, Tag::Str, s),
            TaggedValue::Remote(r) => tagged(serializer, Tag::RemoteVar, r.id()),
        }
    }
}

impl<'de> Deserialize<'de> for TaggedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        TaggedValue::from_json(json).map_err(de::Error::custom)
    }
}

pub trait Encode {
    fn encode(self) -> TaggedValue;
}

pub trait Decode: Sized {
    fn decode(val: TaggedValue) -> Result<Self, TypeMismatch>;
}

macro_rules! impl_encode_decode {
    ($rust_type:ty, $tag:expr, $encode_name:pat => $encode_expr:expr, $($decode_arm:tt)*) => {
        impl Encode for $rust_type {
            fn encode(self) -> TaggedValue {
                let $encode_name = self;
                $encode_expr
            }
        }

        impl Decode for $rust_type {
            fn decode(val: TaggedValue) -> Result<Self, TypeMismatch> {
                Ok(match val {
                    $($decode_arm)*,
                    _ => return Err(TypeMismatch::new(val, $tag))
                })
            }
        }

        impl From<$rust_type> for TaggedValue {
            fn from(val: $rust_type) -> TaggedValue {
                val.encode()
            }
        }
    };
}

impl_encode_decode!((), Tag::None, () => TaggedValue::None, TaggedValue::None => ());
impl_encode_decode!(bool, Tag::Bool, b => TaggedValue::Bool(b), TaggedValue::Bool(b) => b);
impl_encode_decode!(i64, Tag::Int, n => TaggedValue::Int(n), TaggedValue::Int(n) => n);
impl_encode_decode!(
    i32, Tag::Int, n => TaggedValue::Int(i64::from(n)),
    TaggedValue::Int(n) if i32::try_from(n).is_ok() => n as i32
);
impl_encode_decode!(f64, Tag::Float, x => TaggedValue::Float(x), TaggedValue::Float(x) => x);
impl_encode_decode!(String, Tag::Str, s => TaggedValue::Str(s), TaggedValue::Str(s) => s);
impl_encode_decode!(RemoteRef, Tag::RemoteVar, r => TaggedValue::Remote(r), TaggedValue::Remote(r) => r);

impl Encode for &str {
    fn encode(self) -> TaggedValue {
        TaggedValue::Str(self.to_owned())
    }
}

impl From<&str> for TaggedValue {
    fn from(s: &str) -> TaggedValue {
        s.encode()
    }
}

impl Encode for TaggedValue {
    fn encode(self) -> TaggedValue {
        self
    }
}

impl Decode for TaggedValue {
    fn decode(val: TaggedValue) -> Result<Self, TypeMismatch> {
        Ok(val)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(self) -> TaggedValue {
        self.map_or(TaggedValue::None, T::encode)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(val: TaggedValue) -> Result<Self, TypeMismatch> {
        match val {
            TaggedValue::None => Ok(None),
            other => T::decode(other).map(Some),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(self) -> TaggedValue {
        TaggedValue::List(self.into_iter().map(T::encode).collect())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(val: TaggedValue) -> Result<Self, TypeMismatch> {
        match val {
            TaggedValue::List(items) => items.into_iter().map(T::decode).collect(),
            other => Err(TypeMismatch::new(other, Tag::List)),
        }
    }
}

/// Positional arguments of a remote call.
pub trait IntoArgs {
    fn into_args(self) -> Vec<TaggedValue>;
}

impl IntoArgs for Vec<TaggedValue> {
    fn into_args(self) -> Vec<TaggedValue> {
        self
    }
}

macro_rules! impl_into_args {
    ($($name:ident),*) => {
        impl<$($name: Encode),*> IntoArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<TaggedValue> {
                let ($($name,)*) = self;
                vec![$($name.encode()),*]
            }
        }
    };
}

impl_into_args!();
impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);
impl_into_args!(A, B, C, D, E);
impl_into_args!(A, B, C, D, E, F);

#[derive(Debug, Clone)]
pub struct TypeMismatch {
    value: TaggedValue,
    expected: Tag,
}

impl TypeMismatch {
    pub fn new(value: TaggedValue, expected: Tag) -> Self {
        Self { value, expected }
    }

    pub fn value(&self) -> &TaggedValue {
        &self.value
    }

    pub fn expected(&self) -> Tag {
        self.expected
    }
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "type error: {} :/: {}", self.value, self.expected)
    }
}

impl std::error::Error for TypeMismatch {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn primitives_use_type_value_objects() {
        assert_eq!(
            serde_json::to_value(TaggedValue::Int(21)).unwrap(),
            json!({"type": "int", "value": 21})
        );
        assert_eq!(
            serde_json::to_value(TaggedValue::None).unwrap(),
            json!({"type": "NoneType", "value": null})
        );
        assert_eq!(
            serde_json::to_value(TaggedValue::Remote(RemoteRef::new("3"))).unwrap(),
            json!({"type": "RemoteVar", "value": "3"})
        );
        assert_eq!(
            serde_json::to_value(TaggedValue::Callable).unwrap(),
            json!({"type": "callable", "value": null})
        );
    }

    #[test]
    fn lists_are_plain_arrays_of_tagged_elements() {
        let list = TaggedValue::List(vec![TaggedValue::Bool(true), TaggedValue::Str("x".into())]);
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            json!([{"type": "bool", "value": true}, {"type": "str", "value": "x"}])
        );
    }

    #[test]
    fn float_accepts_integer_literal() {
        let v: TaggedValue = serde_json::from_value(json!({"type": "float", "value": 2})).unwrap();
        assert_eq!(v, TaggedValue::Float(2.0));
    }

    #[test]
    fn rejects_unknown_tags_and_mismatched_payloads() {
        assert!(serde_json::from_value::<TaggedValue>(json!({"type": "dict", "value": {}})).is_err());
        assert!(serde_json::from_value::<TaggedValue>(json!({"type": "int", "value": "4"})).is_err());
        assert!(serde_json::from_value::<TaggedValue>(json!({"type": "int", "value": 4.5})).is_err());
        assert!(serde_json::from_value::<TaggedValue>(json!({"value": 4})).is_err());
        assert!(serde_json::from_value::<TaggedValue>(json!(4)).is_err());
    }

    #[test]
    fn decode_reports_expected_tag() {
        let err = i64::decode(TaggedValue::Str("x".into())).unwrap_err();
        assert_eq!(err.expected(), Tag::Int);
        assert_eq!(err.value(), &TaggedValue::Str("x".into()));

        assert!(i32::decode(TaggedValue::Int(i64::MAX)).is_err());
        assert_eq!(i32::decode(TaggedValue::Int(-7)).unwrap(), -7);
        assert_eq!(Option::<i64>::decode(TaggedValue::None).unwrap(), None);
        assert_eq!(
            Vec::<String>::decode(vec!["a", "b"].encode()).unwrap(),
            vec!["a".to_owned(), "b".to_owned()]
        );
    }

    #[test]
    fn non_finite_floats_use_string_payloads() {
        for (x, payload) in [(f64::INFINITY, "inf"), (f64::NEG_INFINITY, "-inf"), (f64::NAN, "nan")] {
            let json = serde_json::to_value(TaggedValue::Float(x)).unwrap();
            assert_eq!(json, json!({"type": "float", "value": payload}));
            let back: f64 = f64::decode(serde_json::from_value(json).unwrap()).unwrap();
            assert_eq!(back.is_nan(), x.is_nan());
            if !x.is_nan() {
                assert_eq!(back, x);
            }
        }
        assert!(serde_json::from_value::<TaggedValue>(json!({"type": "float", "value": "1.5"})).is_err());
    }

    #[test]
    fn tuples_become_positional_args() {
        assert_eq!(
            (21, "x", ()).into_args(),
            vec![TaggedValue::Int(21), TaggedValue::Str("x".into()), TaggedValue::None]
        );
        assert!(().into_args().is_empty());
    }

    fn primitive() -> impl Strategy<Value = TaggedValue> {
        let leaf = prop_oneof![
            Just(TaggedValue::None),
            any::<bool>().prop_map(TaggedValue::Bool),
            any::<i64>().prop_map(TaggedValue::Int),
            any::<f64>().prop_map(TaggedValue::Float),
            prop_oneof![Just(f64::INFINITY), Just(f64::NEG_INFINITY), Just(f64::NAN)]
                .prop_map(TaggedValue::Float),
            ".*".prop_map(TaggedValue::Str),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop::collection::vec(inner, 0..6).prop_map(TaggedValue::List)
        })
    }

    proptest! {
        #[test]
        fn nested_primitives_survive_the_wire(value in primitive()) {
            let text = serde_json::to_string(&value).unwrap();
            let back: TaggedValue = serde_json::from_str(&text).unwrap();
            prop_assert!(same(&back, &value), "{:?} came back as {:?}", value, back);
        }
    }

    /// Equality where NaN matches NaN.
    fn same(a: &TaggedValue, b: &TaggedValue) -> bool {
        match (a, b) {
            (TaggedValue::Float(x), TaggedValue::Float(y)) => {
                (x.is_nan() && y.is_nan()) || x == y
            }
            (TaggedValue::List(xs), TaggedValue::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same(x, y))
            }
            _ => a == b,
        }
    }
}
