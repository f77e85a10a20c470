use crate::value::Value;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Map, Number};

/// Packages an evaluated value as JSON for the host.
pub struct Renderer;

impl Renderer {
    pub fn render(value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Number(n) if n.fract().is_zero() => match n.to_i64() {
                Some(whole) => whole.into(),
                None => Self::float(n.to_f64()),
            },
            Value::Number(n) => Self::float(n.to_f64()),
            Value::NaN => json!("NaN"),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::render).collect())
            }
            Value::Record(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::render(value)))
                    .collect::<Map<_, _>>(),
            ),
            Value::Function(closure) => json!({ "lambda": closure.unbound() }),
        }
    }

    fn float(n: Option<f64>) -> serde_json::Value {
        n.and_then(Number::from_f64)
            .map_or_else(|| json!("NaN"), serde_json::Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number;
    use pretty_assertions::assert_eq;

    fn num(text: &str) -> Value {
        Value::Number(number::parse(text).unwrap())
    }

    #[test]
    fn whole_numbers_render_as_integers() {
        assert_eq!(Renderer::render(&num("2.0")).to_string(), "2");
        assert_eq!(Renderer::render(&num("0.3")).to_string(), "0.3");
        assert_eq!(Renderer::render(&Value::NaN), json!("NaN"));
    }

    #[test]
    fn records_keep_their_field_order() {
        let value = Value::record(vec![
            ("b".into(), num("1")),
            ("a".into(), vec![Value::Null, "x".into()].into()),
        ]);
        assert_eq!(Renderer::render(&value).to_string(), r#"{"b":1,"a":[null,"x"]}"#);
    }
}
