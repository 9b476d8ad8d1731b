use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::answers::AnswerState;
use crate::expr::operand::number_value;
use crate::spec::form::FormDefinition;

static FUNCTION_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=>|function\s*\(").expect("function source pattern"));

/// Reduces a computed value that still looks like function source to its trailing literal.
///
/// The literal is whatever follows the last `}`: a number, then JSON, then the
/// raw text. When the text ends in `}` the literal may itself be an object, so
/// the first `{` that opens a valid JSON suffix wins. Nothing left means `null`.
/// Other values pass through unchanged.
pub fn sanitize_computed(value: &Value) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    if !FUNCTION_SOURCE.is_match(text) {
        return value.clone();
    }
    let tail = literal(
        text.rsplit_once('}')
            .map(|(_, tail)| tail)
            .unwrap_or(text.as_str()),
    );
    if tail.is_empty() {
        return trailing_object(text).unwrap_or(Value::Null);
    }
    if let Ok(number) = tail.parse::<f64>()
        && let Some(number) = number_value(number)
    {
        return number;
    }
    serde_json::from_str(tail).unwrap_or_else(|_| Value::String(tail.to_string()))
}

fn literal(text: &str) -> &str {
    text.trim().trim_end_matches(';').trim()
}

/// Finds a JSON object closing the text. Braces that open a function body are not candidates.
fn trailing_object(text: &str) -> Option<Value> {
    text.match_indices('{')
        .filter(|(start, _)| {
            let before = text[..*start].trim_end();
            !before.ends_with("=>") && !before.ends_with(')')
        })
        .find_map(|(start, _)| serde_json::from_str::<Value>(literal(&text[start..])).ok())
        .filter(Value::is_object)
}

/// Sanitizes every computed answer, single and per row. Returns how many values changed.
pub fn sanitize_answers(form: &FormDefinition, state: &mut AnswerState) -> usize {
    let mut changed = 0;
    for (question_id, value) in state.single.iter_mut() {
        if form.is_computed(question_id) {
            changed += replace(value);
        }
    }
    for rows in state.groups.values_mut() {
        for row in rows.iter_mut() {
            for (question_id, value) in row.iter_mut() {
                if form.is_computed(question_id) {
                    changed += replace(value);
                }
            }
        }
    }
    changed
}

fn replace(value: &mut Value) -> usize {
    let clean = sanitize_computed(value);
    if clean == *value {
        return 0;
    }
    *value = clean;
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_trailing_literal() {
        assert_eq!(
            sanitize_computed(&json!("(weight, height) => { return weight / height; } 42")),
            json!(42)
        );
        assert_eq!(
            sanitize_computed(&json!("function (a) { return a } 2.5")),
            json!(2.5)
        );
        assert_eq!(
            sanitize_computed(&json!("() => { return {\"a\":1} } {\"a\":1}")),
            json!({ "a": 1 })
        );
        assert_eq!(
            sanitize_computed(&json!("() => { return 1 } {\"a\":{\"b\":[1]}};")),
            json!({ "a": { "b": [1] } })
        );
        assert_eq!(
            sanitize_computed(&json!("() => { return 1 } [1,2]")),
            json!([1, 2])
        );
        assert_eq!(
            sanitize_computed(&json!("() => { return 1 } \"done\"")),
            json!("done")
        );
    }

    #[test]
    fn empty_remainder_is_null() {
        assert_eq!(sanitize_computed(&json!("x => { return x }")), Value::Null);
        assert_eq!(sanitize_computed(&json!("x => {}")), Value::Null);
        assert_eq!(sanitize_computed(&json!("function () { return {} }")), Value::Null);
    }

    #[test]
    fn ordinary_values_pass_through() {
        assert_eq!(sanitize_computed(&json!("22.5")), json!("22.5"));
        assert_eq!(sanitize_computed(&json!(7)), json!(7));
        assert_eq!(sanitize_computed(&json!("a >= b")), json!("a >= b"));
    }
}
