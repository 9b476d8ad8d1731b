use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Answers of one repeated row, keyed by question id.
pub type RowAnswers = Map<String, Value>;

/// Live answers of a fill session.
///
/// Non-repeated answers live in `single`; each repeatable section stores its rows
/// under its group key in `groups`. A group never has zero rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AnswerState {
    #[serde(default)]
    pub single: Map<String, Value>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<RowAnswers>>,
}

/// Errors raised by answer store operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnswerError {
    #[error("unknown question '{0}'")]
    UnknownQuestion(String),
    #[error("question '{0}' is computed and cannot be edited")]
    ComputedQuestion(String),
    #[error("question '{0}' belongs to a repeatable section")]
    RepeatedQuestion(String),
    #[error("question '{0}' does not belong to a repeatable section")]
    NotRepeated(String),
    #[error("unknown repeatable group '{0}'")]
    UnknownGroup(String),
    #[error("row {index} is out of range for group '{group}' ({len} rows)")]
    RowOutOfRange {
        group: String,
        index: usize,
        len: usize,
    },
    #[error("question '{question}' is read-only for this viewer")]
    ReadOnly { question: String },
    #[error("option {value} is not offered by question '{question}'")]
    UnknownOption { question: String, value: Value },
}

impl AnswerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits previously stored answers into single answers and repeatable groups.
    ///
    /// Accepts either an object map or a list of `{question_id, answer_value}` records.
    /// Arrays of objects are treated as repeatable rows; any other value, including
    /// checkbox selections, is a single answer.
    pub fn hydrate(existing: &Value) -> Self {
        let mut state = AnswerState::new();
        for (key, value) in normalize_stored(existing) {
            match value {
                Value::Array(items) if is_row_list(&items) => {
                    let rows = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(row) => Some(row),
                            _ => None,
                        })
                        .collect();
                    state.groups.insert(key, rows);
                }
                other => {
                    state.single.insert(key, other);
                }
            }
        }
        state
    }

    pub fn single(&self, question_id: &str) -> Option<&Value> {
        self.single.get(question_id)
    }

    /// Replaces a single answer. Returns whether the stored value changed.
    pub fn set_single(&mut self, question_id: &str, value: Value) -> bool {
        if self.single.get(question_id) == Some(&value) {
            return false;
        }
        self.single.insert(question_id.to_string(), value);
        true
    }

    pub fn clear_single(&mut self, question_id: &str) -> bool {
        self.single.remove(question_id).is_some()
    }

    pub fn rows(&self, group_key: &str) -> &[RowAnswers] {
        self.groups
            .get(group_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn row_value(&self, group_key: &str, row_index: usize, question_id: &str) -> Option<&Value> {
        self.rows(group_key)
            .get(row_index)
            .and_then(|row| row.get(question_id))
    }

    /// Replaces one answer inside a row. Returns whether the stored value changed.
    pub fn set_row(
        &mut self,
        group_key: &str,
        row_index: usize,
        question_id: &str,
        value: Value,
    ) -> Result<bool, AnswerError> {
        let rows = self
            .groups
            .get_mut(group_key)
            .ok_or_else(|| AnswerError::UnknownGroup(group_key.to_string()))?;
        let len = rows.len();
        let row = rows.get_mut(row_index).ok_or(AnswerError::RowOutOfRange {
            group: group_key.to_string(),
            index: row_index,
            len,
        })?;
        if row.get(question_id) == Some(&value) {
            return Ok(false);
        }
        row.insert(question_id.to_string(), value);
        Ok(true)
    }

    /// Appends an empty row and returns its index. A missing group starts with its implicit first row.
    pub fn add_row(&mut self, group_key: &str) -> usize {
        let rows = self.ensure_group(group_key);
        rows.push(RowAnswers::new());
        rows.len() - 1
    }

    /// Removes a row unless it is the last one. Returns whether a row was removed.
    pub fn remove_row(&mut self, group_key: &str, row_index: usize) -> bool {
        match self.groups.get_mut(group_key) {
            Some(rows) if rows.len() > 1 && row_index < rows.len() => {
                rows.remove(row_index);
                true
            }
            _ => false,
        }
    }

    /// Makes sure the group exists with at least one row.
    pub fn ensure_group(&mut self, group_key: &str) -> &mut Vec<RowAnswers> {
        let rows = self.groups.entry(group_key.to_string()).or_default();
        if rows.is_empty() {
            rows.push(RowAnswers::new());
        }
        rows
    }

    /// Flat answer tree as persisted: single answers plus each group as an array under its key.
    pub fn to_answer_tree(&self) -> Map<String, Value> {
        let mut tree = self.single.clone();
        for (key, rows) in &self.groups {
            let rows = rows.iter().cloned().map(Value::Object).collect();
            tree.insert(key.clone(), Value::Array(rows));
        }
        tree
    }
}

fn normalize_stored(existing: &Value) -> Map<String, Value> {
    match existing {
        Value::Object(map) => map.clone(),
        Value::Array(records) => records
            .iter()
            .filter_map(|record| {
                let question_id = record
                    .get("question_id")
                    .or_else(|| record.get("questionId"))
                    .and_then(Value::as_str)?;
                let value = record
                    .get("answer_value")
                    .or_else(|| record.get("answer"))
                    .or_else(|| record.get("value"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Some((question_id.to_string(), value))
            })
            .collect(),
        _ => Map::new(),
    }
}

fn is_row_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(Value::is_object)
}

/// Whether a value counts as answered: not null, not blank text, not an empty selection.
pub fn is_answered(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => match map.get("value") {
            Some(inner) if map.contains_key("score") => is_answered(Some(inner)),
            _ => !map.is_empty(),
        },
        Some(_) => true,
    }
}

/// Value exposed to formulas: scored choices `{value, score}` project to their `value`.
pub fn formula_value(value: &Value) -> &Value {
    match value {
        Value::Object(map) if map.contains_key("score") => map.get("value").unwrap_or(value),
        other => other,
    }
}

/// File answer in either of its shapes: inline (`dataUrl`) before upload, referenced (`url`) after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileAnswer {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileAnswer {
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        map.get("filename")?.as_str()?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Carries inline data that still has to be uploaded.
    pub fn is_inline(&self) -> bool {
        self.data_url
            .as_deref()
            .is_some_and(|data| !data.trim().is_empty())
    }

    /// Lowercased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        let (_, extension) = self.filename.rsplit_once('.')?;
        (!extension.is_empty()).then(|| extension.to_ascii_lowercase())
    }

    pub fn placeholder(&self) -> Value {
        serde_json::json!({ "filename": self.filename })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answered_rules() {
        assert!(!is_answered(None));
        assert!(!is_answered(Some(&json!(null))));
        assert!(!is_answered(Some(&json!("   "))));
        assert!(!is_answered(Some(&json!([]))));
        assert!(!is_answered(Some(&json!({ "value": "", "score": 1 }))));
        assert!(is_answered(Some(&json!(0))));
        assert!(is_answered(Some(&json!(["a"]))));
        assert!(is_answered(Some(&json!({ "filename": "x.png" }))));
    }

    #[test]
    fn file_answer_shapes() {
        let inline = FileAnswer::from_value(&json!({
            "filename": "Photo.PNG",
            "mimeType": "image/png",
            "dataUrl": "data:image/png;base64,AAAA"
        }))
        .expect("file answer");
        assert!(inline.is_inline());
        assert_eq!(inline.extension().as_deref(), Some("png"));
        assert_eq!(inline.placeholder(), json!({ "filename": "Photo.PNG" }));
        assert!(FileAnswer::from_value(&json!("x.png")).is_none());
    }

    #[test]
    fn scored_choices_project_to_value() {
        assert_eq!(formula_value(&json!({ "value": "yes", "score": 2 })), &json!("yes"));
        assert_eq!(formula_value(&json!({ "filename": "a" })), &json!({ "filename": "a" }));
    }
}
