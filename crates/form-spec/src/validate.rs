use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::answers::{AnswerState, FileAnswer, formula_value, is_answered};
use crate::context::{Context, build_context, row_context};
use crate::groups::GroupKeys;
use crate::spec::form::FormDefinition;
use crate::spec::question::{AnswerType, Question, option_matches};
use crate::visibility::Visibility;

/// One problem found in the answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Outcome of validating a whole answer set.
///
/// `missing_required` holds user-facing labels; repeated questions are listed
/// once per row as `"{label} (entry {n})"`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub missing_required: Vec<String>,
    pub unknown_fields: Vec<String>,
}

impl ValidationResult {
    /// Every problem as one message per line, in traversal order.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|error| error.message.clone()).collect()
    }
}

struct Slot<'a> {
    question: &'a Question,
    label: String,
    path: String,
}

/// Validates every question of every page, whatever tab the viewer is on.
///
/// Section permissions do not exempt a question. Questions hidden by `showIf`
/// and questions without input (computed, paragraph) are skipped. Unknown
/// answer keys are reported but do not make the result invalid.
pub fn validate(
    form: &FormDefinition,
    state: &AnswerState,
    keys: &GroupKeys,
    visibility: &Visibility<'_>,
) -> ValidationResult {
    let base = build_context(form, state);
    let mut errors = Vec::new();
    let mut missing_required = Vec::new();

    for entry in form.sections() {
        let mut check = |slot: Slot<'_>, value: Option<&Value>, ctx: &Context| {
            if !slot.question.answer_type.accepts_input()
                || !visibility.condition_holds(slot.question.show_if(), ctx)
            {
                return;
            }
            if !is_answered(value) {
                if slot.question.required {
                    errors.push(error(&slot, format!("{} is required", slot.label), "required"));
                    missing_required.push(slot.label);
                }
                return;
            }
            if let Some(value) = value
                && let Some(problem) = check_value(&slot, value)
            {
                errors.push(problem);
            }
        };

        match keys.section(entry.page_index, entry.section_index) {
            Some(group_key) => {
                for (row_index, row) in state.rows(group_key).iter().enumerate() {
                    let ctx = row_context(&base, entry.section, row);
                    for question in &entry.section.questions {
                        let slot = Slot {
                            question,
                            label: format!("{} (entry {})", question.label(), row_index + 1),
                            path: format!("/{}/{}/{}", group_key, row_index, question.id),
                        };
                        check(slot, row.get(&question.id), &ctx);
                    }
                }
            }
            None => {
                for question in &entry.section.questions {
                    let slot = Slot {
                        question,
                        label: question.label().to_string(),
                        path: format!("/{}", question.id),
                    };
                    check(slot, state.single(&question.id), &base);
                }
            }
        }
    }

    let unknown_fields = unknown_fields(form, state, keys);

    ValidationResult {
        valid: errors.is_empty() && missing_required.is_empty(),
        errors,
        missing_required,
        unknown_fields,
    }
}

fn unknown_fields(form: &FormDefinition, state: &AnswerState, keys: &GroupKeys) -> Vec<String> {
    let mut known: BTreeSet<String> = BTreeSet::new();
    for question in form.questions() {
        known.insert(question.id.clone());
        if let Some(key) = question.reviewer_comment_key() {
            known.insert(key);
        }
    }
    let mut unknown: Vec<String> = state
        .single
        .keys()
        .filter(|key| !known.contains(*key))
        .cloned()
        .collect();
    unknown.extend(
        state
            .groups
            .keys()
            .filter(|key| !keys.contains(key))
            .cloned(),
    );
    unknown
}

fn check_value(slot: &Slot<'_>, value: &Value) -> Option<ValidationError> {
    let question = slot.question;
    match question.answer_type {
        AnswerType::Number => {
            let numeric = match formula_value(value) {
                Value::Number(_) => true,
                Value::String(text) => text.trim().parse::<f64>().is_ok_and(f64::is_finite),
                _ => false,
            };
            (!numeric).then(|| {
                error(
                    slot,
                    format!("{} must be a number", slot.label),
                    "number_invalid",
                )
            })
        }
        AnswerType::Dropdown | AnswerType::Radio => {
            if question.options.is_empty() || question.find_option(formula_value(value)).is_some() {
                return None;
            }
            Some(error(
                slot,
                format!("{} has a value that is not one of its options", slot.label),
                "option_invalid",
            ))
        }
        AnswerType::Checkbox => {
            let selected = value.as_array()?;
            let offered = |item: &Value| {
                question
                    .options
                    .iter()
                    .any(|option| option_matches(&option.value, item))
            };
            if question.options.is_empty() || selected.iter().all(offered) {
                return None;
            }
            Some(error(
                slot,
                format!("{} has a selection that is not one of its options", slot.label),
                "option_invalid",
            ))
        }
        AnswerType::File => {
            let allowed = &question.metadata.allowed_file_types;
            let file = FileAnswer::from_value(value)?;
            if allowed.is_empty() || file_type_allowed(&file, allowed) {
                return None;
            }
            Some(error(
                slot,
                format!(
                    "{}: file '{}' is not an allowed type ({})",
                    slot.label,
                    file.filename,
                    allowed.join(", ")
                ),
                "file_type_invalid",
            ))
        }
        AnswerType::Text
        | AnswerType::Textarea
        | AnswerType::Date
        | AnswerType::Time
        | AnswerType::Computed
        | AnswerType::Paragraph
        | AnswerType::Location => None,
    }
}

/// Entries are extensions (`pdf`, `.pdf`), MIME types (`image/png`), or MIME families (`image/*`).
pub fn file_type_allowed(file: &FileAnswer, allowed: &[String]) -> bool {
    let extension = file.extension();
    let mime = file.mime_type.as_deref().map(str::to_ascii_lowercase);
    allowed.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        if let Some(family) = entry.strip_suffix("/*") {
            return mime
                .as_deref()
                .and_then(|mime| mime.split_once('/'))
                .is_some_and(|(kind, _)| kind == family);
        }
        if entry.contains('/') {
            return mime.as_deref() == Some(entry.as_str());
        }
        extension.as_deref() == Some(entry.trim_start_matches('.'))
    })
}

fn error(slot: &Slot<'_>, message: String, code: &str) -> ValidationError {
    ValidationError {
        question_id: Some(slot.question.id.clone()),
        path: Some(slot.path.clone()),
        message,
        code: Some(code.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_type_entries() {
        let file = FileAnswer {
            filename: "scan.PDF".into(),
            mime_type: Some("application/pdf".into()),
            data_url: None,
            url: None,
        };
        assert!(file_type_allowed(&file, &[".pdf".into()]));
        assert!(file_type_allowed(&file, &["application/pdf".into()]));
        assert!(file_type_allowed(&file, &["application/*".into()]));
        assert!(!file_type_allowed(&file, &["png".into(), "image/*".into()]));
    }

    #[test]
    fn checkbox_selection_must_be_offered() {
        let question: Question = serde_json::from_value(json!({
            "id": "q", "questionText": "Fruits", "answerType": "checkbox",
            "options": [{ "value": "a", "label": "A" }, { "value": 2, "label": "B" }]
        }))
        .expect("question");
        let slot = Slot {
            question: &question,
            label: "Fruits".into(),
            path: "/q".into(),
        };
        assert!(check_value(&slot, &json!(["a", "2"])).is_none());
        let problem = check_value(&slot, &json!(["a", "z"])).expect("error");
        assert_eq!(problem.code.as_deref(), Some("option_invalid"));
    }
}
