use std::cmp::Ordering;
use std::sync::LazyLock;

use chrono::{NaiveDateTime, SecondsFormat};
use regex::Regex;
use serde_json::{Map, Number, Value};

static NUMERIC_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?$").expect("numeric text pattern"));

/// Runtime value inside the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDateTime),
    List(Vec<Value>),
    Object(Map<String, Value>),
}

impl Operand {
    /// Converts a context value, turning numeric-looking text into numbers.
    pub fn from_binding(value: &Value) -> Self {
        match value {
            Value::String(text) if NUMERIC_TEXT.is_match(text) => text
                .parse::<f64>()
                .map(Operand::Number)
                .unwrap_or_else(|_| Operand::Text(text.clone())),
            other => Self::from_value(other),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Operand::Null,
            Value::Bool(flag) => Operand::Bool(*flag),
            Value::Number(number) => Operand::Number(number.as_f64().unwrap_or(f64::NAN)),
            Value::String(text) => Operand::Text(text.clone()),
            Value::Array(items) => Operand::List(items.clone()),
            Value::Object(map) => Operand::Object(map.clone()),
        }
    }

    /// JSON form of the result. `undefined`, `null`, `NaN`, and infinities become `None`.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Operand::Undefined | Operand::Null => None,
            Operand::Bool(flag) => Some(Value::Bool(flag)),
            Operand::Number(number) => number_value(number),
            Operand::Text(text) => Some(Value::String(text)),
            Operand::Date(date) => Some(Value::String(format_date(&date))),
            Operand::List(items) => Some(Value::Array(items)),
            Operand::Object(map) => Some(Value::Object(map)),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Operand::Undefined | Operand::Null => false,
            Operand::Bool(flag) => *flag,
            Operand::Number(number) => *number != 0.0 && !number.is_nan(),
            Operand::Text(text) => !text.is_empty(),
            Operand::Date(_) | Operand::List(_) | Operand::Object(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Operand::Undefined => f64::NAN,
            Operand::Null => 0.0,
            Operand::Bool(flag) => f64::from(u8::from(*flag)),
            Operand::Number(number) => *number,
            Operand::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Operand::Date(date) => date.and_utc().timestamp_millis() as f64,
            Operand::List(items) => match items.as_slice() {
                [] => 0.0,
                [single] => Operand::from_value(single).to_number(),
                _ => f64::NAN,
            },
            Operand::Object(_) => f64::NAN,
        }
    }

    pub fn to_display(&self) -> String {
        match self {
            Operand::Undefined => "undefined".to_string(),
            Operand::Null => "null".to_string(),
            Operand::Bool(flag) => flag.to_string(),
            Operand::Number(number) => format_number(*number),
            Operand::Text(text) => text.clone(),
            Operand::Date(date) => format_date(date),
            Operand::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::Null => String::new(),
                    other => Operand::from_value(other).to_display(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Operand::Object(_) => "[object Object]".to_string(),
        }
    }

    fn is_textual(&self) -> bool {
        matches!(
            self,
            Operand::Text(_) | Operand::Date(_) | Operand::List(_) | Operand::Object(_)
        )
    }

    pub fn add(&self, other: &Operand) -> Operand {
        if self.is_textual() || other.is_textual() {
            Operand::Text(format!("{}{}", self.to_display(), other.to_display()))
        } else {
            Operand::Number(self.to_number() + other.to_number())
        }
    }

    /// `==` with the usual number/text coercions.
    pub fn loose_eq(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Undefined | Operand::Null, Operand::Undefined | Operand::Null) => true,
            (Operand::Undefined | Operand::Null, _) | (_, Operand::Undefined | Operand::Null) => {
                false
            }
            (Operand::Text(left), Operand::Text(right)) => left == right,
            (Operand::List(left), Operand::List(right)) => left == right,
            (Operand::Object(left), Operand::Object(right)) => left == right,
            (Operand::List(_) | Operand::Object(_), Operand::Text(text))
            | (Operand::Text(text), Operand::List(_) | Operand::Object(_)) => {
                let composite = if let Operand::Text(_) = self { other } else { self };
                composite.to_display() == *text
            }
            _ => self.to_number() == other.to_number(),
        }
    }

    /// `===`: same kind and same value.
    pub fn strict_eq(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Undefined, Operand::Undefined) | (Operand::Null, Operand::Null) => true,
            (Operand::Bool(left), Operand::Bool(right)) => left == right,
            (Operand::Number(left), Operand::Number(right)) => left == right,
            (Operand::Text(left), Operand::Text(right)) => left == right,
            (Operand::Date(left), Operand::Date(right)) => left == right,
            (Operand::List(left), Operand::List(right)) => left == right,
            (Operand::Object(left), Operand::Object(right)) => left == right,
            _ => false,
        }
    }

    /// Ordering for `<`-style operators; `None` when either side is not comparable.
    pub fn compare(&self, other: &Operand) -> Option<Ordering> {
        match (self, other) {
            (Operand::Text(left), Operand::Text(right)) => Some(left.cmp(right)),
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }

    /// `.length` of text and arrays.
    pub fn length(&self) -> Operand {
        match self {
            Operand::Text(text) => Operand::Number(text.chars().count() as f64),
            Operand::List(items) => Operand::Number(items.len() as f64),
            _ => Operand::Undefined,
        }
    }

    /// `.includes(needle)` of text and arrays; `None` for other receivers.
    pub fn includes(&self, needle: &Operand) -> Option<bool> {
        match self {
            Operand::Text(text) => Some(text.contains(&needle.to_display())),
            Operand::List(items) => Some(
                items
                    .iter()
                    .any(|item| Operand::from_value(item).strict_eq(needle)),
            ),
            _ => None,
        }
    }
}

/// JSON number for a result; integral values are emitted as integers.
pub fn number_value(number: f64) -> Option<Value> {
    if !number.is_finite() {
        return None;
    }
    if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
        return Some(Value::Number(Number::from(number as i64)));
    }
    Number::from_f64(number).map(Value::Number)
}

fn format_number(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_string()
    } else if number.is_infinite() {
        let label = if number > 0.0 { "Infinity" } else { "-Infinity" };
        label.to_string()
    } else {
        number.to_string()
    }
}

fn format_date(date: &NaiveDateTime) -> String {
    date.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_text_binds_as_number() {
        assert_eq!(Operand::from_binding(&json!("42")), Operand::Number(42.0));
        assert_eq!(Operand::from_binding(&json!("-1.5")), Operand::Number(-1.5));
        assert_eq!(
            Operand::from_binding(&json!("1e3")),
            Operand::Text("1e3".into())
        );
    }

    #[test]
    fn addition_concatenates_text() {
        let sum = Operand::Text("BMI: ".into()).add(&Operand::Number(22.0));
        assert_eq!(sum, Operand::Text("BMI: 22".into()));
    }

    #[test]
    fn loose_equality_coerces_numbers() {
        assert!(Operand::Text("5".into()).loose_eq(&Operand::Number(5.0)));
        assert!(Operand::Null.loose_eq(&Operand::Undefined));
        assert!(!Operand::Null.strict_eq(&Operand::Undefined));
        assert!(!Operand::Number(f64::NAN).loose_eq(&Operand::Number(f64::NAN)));
    }

    #[test]
    fn non_finite_results_are_null() {
        assert_eq!(Operand::Number(f64::INFINITY).into_value(), None);
        assert_eq!(Operand::Number(3.0).into_value(), Some(json!(3)));
    }
}
