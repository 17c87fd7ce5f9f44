//! Payloads carried by ports and actions
//!
//! A trigger holds at most one `Value` per tag. Triggers that only signal
//! presence (startup, shutdown, timers) carry `Value::Unit`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload of a port write or an action event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Presence without a payload
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Opaque bytes, e.g. a message received from another federate
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Named fields in insertion order
    Record(ValueMap),
}

/// Fields of a `Value::Record`
pub type ValueMap = IndexMap<String, Value>;

macro_rules! view {
    ($(#[$doc:meta])* $name:ident -> $ty:ty { $($pat:pat => $out:expr),+ $(,)? }) => {
        $(#[$doc])*
        pub fn $name(&self) -> Option<$ty> {
            match self {
                $($pat => Some($out),)+
                _ => None,
            }
        }
    };
}

impl Value {
    /// Check if the value carries no payload
    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    view!(as_bool -> bool { Value::Bool(b) => *b });
    view!(as_int -> i64 { Value::Int(n) => *n });
    view!(
        /// Floats, and integers widened to floats
        as_float -> f64 { Value::Float(x) => *x, Value::Int(n) => *n as f64 }
    );
    view!(as_str -> &str { Value::Text(s) => s.as_str() });
    view!(as_bytes -> &[u8] { Value::Bytes(b) => b.as_slice() });
    view!(as_list -> &[Value] { Value::List(items) => items.as_slice() });
    view!(as_record -> &ValueMap { Value::Record(fields) => fields });

    /// Field of a record
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(name))
    }

    /// Short name of the payload kind, for log output
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }
}

fn write_joined<T>(
    f: &mut fmt::Formatter<'_>,
    (open, close): (&str, &str),
    items: impl Iterator<Item = T>,
    mut item: impl FnMut(&mut fmt::Formatter<'_>, T) -> fmt::Result,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, x) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item(f, x)?;
    }
    f.write_str(close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => write_joined(f, ("[", "]"), items.iter(), |f, v| write!(f, "{v}")),
            Value::Record(fields) => {
                write_joined(f, ("{", "}"), fields.iter(), |f, (k, v)| write!(f, "{k}: {v}"))
            }
        }
    }
}

macro_rules! from_payload {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

from_payload!(
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    &[u8] => Bytes,
    ValueMap => Record,
);

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_match_variant() {
        assert!(Value::Unit.is_unit());
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(42i64).as_int(), Some(42));
        assert_eq!(Value::from(42i64).as_float(), Some(42.0));
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert_eq!(Value::from(&b"\x01\x02"[..]).as_bytes(), Some(&[1u8, 2][..]));
        assert_eq!(Value::from("hello").as_int(), None);
    }

    #[test]
    fn test_record_fields() {
        let mut fields = ValueMap::new();
        fields.insert("count".into(), 3i64.into());
        fields.insert("label".into(), "beat".into());
        let record = Value::from(fields);
        assert_eq!(record.field("count"), Some(&Value::Int(3)));
        assert_eq!(record.field("missing"), None);
        assert_eq!(record.kind(), "record");
        assert_eq!(record.to_string(), "{count: 3, label: \"beat\"}");
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from(vec![1i64, 2, 3]).to_string(), "[1, 2, 3]");
        assert_eq!(Value::Unit.to_string(), "()");
        assert_eq!(Value::Bytes(vec![0; 4]).to_string(), "<4 bytes>");
    }
}
