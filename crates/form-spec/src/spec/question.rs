use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Supported answer widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    #[serde(alias = "textbox")]
    Text,
    Textarea,
    Number,
    Date,
    Time,
    Dropdown,
    Radio,
    Checkbox,
    File,
    Computed,
    Paragraph,
    Location,
}

impl AnswerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerType::Text => "text",
            AnswerType::Textarea => "textarea",
            AnswerType::Number => "number",
            AnswerType::Date => "date",
            AnswerType::Time => "time",
            AnswerType::Dropdown => "dropdown",
            AnswerType::Radio => "radio",
            AnswerType::Checkbox => "checkbox",
            AnswerType::File => "file",
            AnswerType::Computed => "computed",
            AnswerType::Paragraph => "paragraph",
            AnswerType::Location => "location",
        }
    }

    /// Whether a user can type or pick a value for this type.
    pub fn accepts_input(&self) -> bool {
        match self {
            AnswerType::Computed | AnswerType::Paragraph => false,
            AnswerType::Text
            | AnswerType::Textarea
            | AnswerType::Number
            | AnswerType::Date
            | AnswerType::Time
            | AnswerType::Dropdown
            | AnswerType::Radio
            | AnswerType::Checkbox
            | AnswerType::File
            | AnswerType::Location => true,
        }
    }

    /// Whether the answer is picked from the question's options.
    pub fn uses_options(&self) -> bool {
        matches!(
            self,
            AnswerType::Dropdown | AnswerType::Radio | AnswerType::Checkbox
        )
    }
}

/// Grid width of a question on a 12-column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSize {
    Full,
    Half,
    Third,
    Quarter,
}

impl ColumnSize {
    /// Unknown widths fall back to a full row.
    pub fn from_span(span: u8) -> Self {
        match span {
            6 => ColumnSize::Half,
            4 => ColumnSize::Third,
            3 => ColumnSize::Quarter,
            _ => ColumnSize::Full,
        }
    }

    pub fn span(&self) -> u8 {
        match self {
            ColumnSize::Full => 12,
            ColumnSize::Half => 6,
            ColumnSize::Third => 4,
            ColumnSize::Quarter => 3,
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            ColumnSize::Full => "col-span-12",
            ColumnSize::Half => "md:col-span-6 col-span-12",
            ColumnSize::Third => "md:col-span-4 col-span-12",
            ColumnSize::Quarter => "md:col-span-3 col-span-12",
        }
    }
}

/// A selectable choice of a dropdown, radio, or checkbox question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuestionOption {
    pub value: Value,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub showif: Option<String>,
}

/// Configuration bag attached to a question.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_if: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_formula: Option<String>,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_file_types: Vec<String>,
    #[serde(default)]
    pub display_reviewers_comment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_comment_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const DEFAULT_REVIEWER_COMMENT_LABEL: &str = "Reviewer's Comment";

/// Definition of a single question inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default)]
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_helper: Option<String>,
    pub answer_type: AnswerType,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_column_span")]
    pub column_size: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub metadata: QuestionMetadata,
}

fn default_column_span() -> u8 {
    12
}

impl Question {
    /// Label shown to users; falls back to the id when the text is blank.
    pub fn label(&self) -> &str {
        let text = self.question_text.trim();
        if text.is_empty() { &self.id } else { text }
    }

    /// Variable name under which the answer is exposed to formulas.
    pub fn variable_name(&self) -> Option<&str> {
        self.field_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn column(&self) -> ColumnSize {
        ColumnSize::from_span(self.column_size)
    }

    pub fn is_computed(&self) -> bool {
        self.answer_type == AnswerType::Computed
    }

    /// Formula that derives the value of a computed question.
    pub fn computed_formula(&self) -> Option<&str> {
        if !self.is_computed() {
            return None;
        }
        self.metadata
            .computed_formula
            .as_deref()
            .filter(|formula| !formula.trim().is_empty())
    }

    pub fn show_if(&self) -> Option<&str> {
        self.metadata
            .show_if
            .as_deref()
            .filter(|formula| !formula.trim().is_empty())
    }

    /// Answer key of the reviewer comment companion field, if enabled.
    pub fn reviewer_comment_key(&self) -> Option<String> {
        self.metadata
            .display_reviewers_comment
            .then(|| format!("{}_reviewers_comment", self.id))
    }

    pub fn reviewer_comment_label(&self) -> &str {
        self.metadata
            .reviewer_comment_label
            .as_deref()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(DEFAULT_REVIEWER_COMMENT_LABEL)
    }

    pub fn find_option(&self, value: &Value) -> Option<&QuestionOption> {
        self.options
            .iter()
            .find(|option| option_matches(&option.value, value))
    }
}

/// Option values are compared loosely so `"1"` and `1` select the same option.
pub(crate) fn option_matches(option: &Value, value: &Value) -> bool {
    match (option, value) {
        (Value::String(left), Value::Number(right)) | (Value::Number(right), Value::String(left)) => {
            left.trim() == right.to_string()
        }
        _ => option == value,
    }
}
