use crate::{ast::NodeId, compiler::ScopeRef, number};
use itertools::Itertools;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use std::{
    fmt::{self, Debug, Display},
    rc::Rc,
};

/// A lambda value: its parameters, its body, the scope it closed over and any
/// arguments it has been partially applied to.
#[derive(Clone)]
pub struct Closure {
    pub lambda: NodeId,
    pub params: Vec<String>,
    pub body: NodeId,
    pub scope: ScopeRef,
    pub applied: Vec<Value>,
}

impl Closure {
    /// Parameters still waiting for an argument.
    pub fn unbound(&self) -> &[String] {
        &self.params[self.applied.len().min(self.params.len())..]
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.lambda == other.lambda && self.applied == other.applied
    }
}

impl Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<lambda {} {}>", self.lambda, self.unbound().join(" "))
    }
}

#[derive(Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Decimal),
    /// The result of failed arithmetic.
    NaN,
    String(Rc<String>),
    List(Rc<Vec<Value>>),
    Record(Rc<Vec<(String, Value)>>),
    Function(Rc<Closure>),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Number(value)
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Rc::new(value))
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Rc::new(value.to_string()))
    }
}
impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(Rc::new(value))
    }
}
impl From<Closure> for Value {
    fn from(value: Closure) -> Self {
        Value::Function(Rc::new(value))
    }
}

impl Value {
    pub fn record(fields: Vec<(String, Value)>) -> Self {
        Value::Record(Rc::new(fields))
    }

    pub fn empty_record() -> Self {
        Value::Record(Rc::new(Vec::new()))
    }

    pub fn empty_list() -> Self {
        Value::List(Rc::new(Vec::new()))
    }

    pub fn type_of(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Boolean,
            Value::Number(_) | Value::NaN => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Record(_) => ValueType::Record,
            Value::Function(_) => ValueType::Function,
        }
    }

    /// `null`, `false`, `0`, `""` and `NaN` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::NaN => false,
            Value::Bool(flag) => *flag,
            Value::Number(n) => !n.is_zero(),
            Value::String(s) => !s.is_empty(),
            Value::List(_) | Value::Record(_) | Value::Function(_) => true,
        }
    }

    /// Numbers, and strings that spell one.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => number::parse(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Looks up a record field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record()?
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// The text a value contributes when strings are joined; `null` contributes nothing.
    pub fn text(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(*flag),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Decimal::from)
                .or_else(|| n.as_u64().map(Decimal::from))
                .or_else(|| n.as_f64().and_then(Decimal::from_f64))
                .map_or(Value::NaN, Value::Number),
            serde_json::Value::String(s) => s.as_str().into(),
            serde_json::Value::Array(items) => {
                items.iter().map(Value::from_json).collect::<Vec<_>>().into()
            }
            serde_json::Value::Object(fields) => Value::record(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(string) => {
                f.write_str("\"")?;
                f.write_str(string.replace('\n', "\\n").replace('\"', "\\\"").as_str())?;
                f.write_str("\"")
            }
            Self::List(items) => {
                write!(f, "[{}]", items.iter().map(|v| format!("{:?}", v)).join(", "))
            }
            Self::Record(fields) => write!(
                f,
                "{{{}}}",
                fields
                    .iter()
                    .map(|(key, value)| format!("{:?}: {:?}", key, value))
                    .join(", ")
            ),
            Self::Function(closure) => Debug::fmt(closure.as_ref(), f),
            other => Display::fmt(other, f),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => match b {
                true => f.write_str("true"),
                false => f.write_str("false"),
            },
            Self::Number(n) => f.write_str(&number::format(*n)),
            Self::NaN => f.write_str("NaN"),
            Self::String(string) => f.write_str(string),
            Self::List(_) | Self::Record(_) | Self::Function(_) => Debug::fmt(self, f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Boolean,
    Number,
    String,
    List,
    Record,
    Function,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Record => "record",
            ValueType::Function => "function",
        })
    }
}

impl ValueType {
    pub fn fmt_a(&self) -> &str {
        match self {
            ValueType::Null => "null",
            ValueType::Boolean => "a boolean",
            ValueType::Number => "a number",
            ValueType::String => "a string",
            ValueType::List => "a list",
            ValueType::Record => "a record",
            ValueType::Function => "a function",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn falsy_values() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::NaN.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Number(Decimal::ZERO).is_truthy());
        assert!(Value::empty_list().is_truthy());
        assert!(Value::from("0").is_truthy());
    }

    #[test]
    fn numeric_strings_convert() {
        assert_eq!(Value::from("2.50").to_decimal(), number::parse("2.5"));
        assert_eq!(Value::from("two").to_decimal(), None);
        assert_eq!(Value::Bool(true).to_decimal(), None);
    }

    #[test]
    fn display_and_debug() {
        let value = Value::record(vec![
            ("a".into(), vec![Value::Number(Decimal::from(1)), "x".into()].into()),
            ("b".into(), Value::Null),
        ]);
        assert_eq!(value.to_string(), r#"{"a": [1, "x"], "b": null}"#);
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(format!("{:?}", Value::from("x")), r#""x""#);
        assert_eq!(Value::Null.text(), "");
    }

    #[test]
    fn json_numbers_become_decimals() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"n": 1.5, "m": [2, null]}"#).unwrap();
        let value = Value::from_json(&json);
        assert_eq!(value.get("n"), Some(&Value::Number(number::parse("1.5").unwrap())));
        assert_eq!(value.get("m").and_then(Value::as_list).map(<[Value]>::len), Some(2));
        assert_eq!(value.type_of().fmt_a(), "a record");
    }
}
