use serde_json::{Map, Value, json};

use crate::answers::{FileAnswer, formula_value, is_answered};
use crate::context::{Context, row_context};
use crate::session::FormSession;
use crate::spec::page::{Page, Section};
use crate::spec::question::{AnswerType, Question};
use crate::submission::SubmissionStage;
use crate::template::{TemplateEngine, value_to_string};
use crate::visibility::{FormView, Visibility};

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// A visible required question is still unanswered.
    NeedInput,
    /// All visible required questions are answered.
    Complete,
    /// The viewer may see none of the form's pages.
    NoAccessiblePages,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
            RenderStatus::NoAccessiblePages => "no_accessible_pages",
        }
    }
}

/// Progress counters over visible questions that take input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderProgress {
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOption {
    pub value: Value,
    pub label: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderComment {
    pub key: String,
    pub label: String,
    pub value: Option<String>,
}

/// Describes a single visible question.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderQuestion {
    pub id: String,
    pub label: String,
    pub helper: Option<String>,
    pub kind: AnswerType,
    pub widget: &'static str,
    pub required: bool,
    pub editable: bool,
    pub column_class: &'static str,
    pub current_value: Option<Value>,
    pub display_value: Option<String>,
    pub options: Vec<RenderOption>,
    pub reviewer_comment: Option<RenderComment>,
    /// Rendered paragraph content.
    pub content: Option<String>,
}

/// One answer row; non-repeatable sections have exactly one row without index.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRow {
    pub index: Option<usize>,
    pub questions: Vec<RenderQuestion>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSection {
    pub id: String,
    pub title: String,
    pub group_key: Option<String>,
    pub editable: bool,
    pub rows: Vec<RenderRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPage {
    pub id: String,
    pub title: String,
    pub sections: Vec<RenderSection>,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPayload {
    pub activity_id: String,
    pub title: String,
    pub stage: SubmissionStage,
    pub status: RenderStatus,
    pub locked: bool,
    pub progress: RenderProgress,
    pub missing_required: Vec<String>,
    pub pages: Vec<RenderPage>,
}

struct Builder<'a> {
    session: &'a FormSession,
    visibility: Visibility<'a>,
    templates: TemplateEngine,
    editing: bool,
    progress: RenderProgress,
    missing_required: Vec<String>,
}

/// Builds the renderable tree of everything the viewer may currently see.
pub fn build_render_payload(session: &FormSession) -> RenderPayload {
    let visibility = session.visibility();
    let pages = match visibility.form_view(session.form()) {
        FormView::Pages(pages) => pages,
        FormView::Empty | FormView::NoAccessiblePages => Vec::new(),
    };

    let mut builder = Builder {
        session,
        visibility,
        templates: TemplateEngine::default(),
        editing: session.is_editing(),
        progress: RenderProgress::default(),
        missing_required: Vec::new(),
    };
    let base = session.context();
    let pages: Vec<RenderPage> = pages
        .into_iter()
        .map(|page| builder.page(page, &base))
        .collect();

    let status = if pages.is_empty() {
        RenderStatus::NoAccessiblePages
    } else if builder.missing_required.is_empty() {
        RenderStatus::Complete
    } else {
        RenderStatus::NeedInput
    };

    RenderPayload {
        activity_id: session.activity().id.clone(),
        title: session.activity().title.clone(),
        stage: session.stage(),
        status,
        locked: session.is_locked(),
        progress: builder.progress,
        missing_required: builder.missing_required,
        pages,
    }
}

impl Builder<'_> {
    fn page(&mut self, page: &Page, base: &Context) -> RenderPage {
        let visibility = self.visibility;
        let sections = page
            .sections
            .iter()
            .enumerate()
            .filter(|(_, section)| visibility.is_section_visible(page, section))
            .map(|(section_index, section)| self.section(page, section_index, section, base))
            .collect();
        RenderPage {
            id: page.id.clone(),
            title: page.label().to_string(),
            sections,
        }
    }

    fn section(
        &mut self,
        page: &Page,
        section_index: usize,
        section: &Section,
        base: &Context,
    ) -> RenderSection {
        let session = self.session;
        let editable = session.stage() == SubmissionStage::Filling
            && !session.is_locked()
            && self.visibility.can_interact(page, section, self.editing);
        let page_index = session
            .form()
            .pages
            .iter()
            .position(|candidate| std::ptr::eq(candidate, page))
            .unwrap_or_default();
        let group_key = session
            .group_keys()
            .section(page_index, section_index)
            .map(str::to_string);

        let rows = match &group_key {
            Some(key) => session
                .state()
                .rows(key)
                .iter()
                .enumerate()
                .map(|(row_index, row)| {
                    let ctx = row_context(base, section, row);
                    let questions = self.questions(section, &ctx, editable, Some(row_index), |id| {
                        row.get(id).cloned()
                    });
                    RenderRow {
                        index: Some(row_index),
                        questions,
                    }
                })
                .collect(),
            None => {
                let questions = self.questions(section, base, editable, None, |id| {
                    session.state().single(id).cloned()
                });
                vec![RenderRow {
                    index: None,
                    questions,
                }]
            }
        };

        RenderSection {
            id: section.id.clone(),
            title: section.label().to_string(),
            group_key,
            editable,
            rows,
        }
    }

    fn questions(
        &mut self,
        section: &Section,
        ctx: &Context,
        editable: bool,
        row_index: Option<usize>,
        answer: impl Fn(&str) -> Option<Value>,
    ) -> Vec<RenderQuestion> {
        let mut rendered = Vec::new();
        for question in &section.questions {
            if !self.visibility.condition_holds(question.show_if(), ctx) {
                continue;
            }
            let current_value = answer(&question.id);
            if question.answer_type.accepts_input() {
                self.progress.total += 1;
                if is_answered(current_value.as_ref()) {
                    self.progress.answered += 1;
                } else if question.required {
                    self.missing_required.push(match row_index {
                        Some(index) => format!("{} (entry {})", question.label(), index + 1),
                        None => question.label().to_string(),
                    });
                }
            }
            rendered.push(self.question(question, ctx, editable, current_value));
        }
        rendered
    }

    fn question(
        &self,
        question: &Question,
        ctx: &Context,
        editable: bool,
        current_value: Option<Value>,
    ) -> RenderQuestion {
        let options = if question.answer_type.uses_options() {
            self.visibility
                .visible_options(question, ctx)
                .into_iter()
                .map(|option| RenderOption {
                    value: option.value.clone(),
                    label: option.label.clone(),
                    score: option.score,
                })
                .collect()
        } else {
            Vec::new()
        };
        let reviewer_comment = question.reviewer_comment_key().map(|key| RenderComment {
            value: self
                .session
                .state()
                .single(&key)
                .and_then(Value::as_str)
                .map(str::to_string),
            label: question.reviewer_comment_label().to_string(),
            key,
        });
        let content = match question.answer_type {
            AnswerType::Paragraph => question.metadata.content.as_deref().map(|content| {
                self.templates
                    .render(content, ctx)
                    .unwrap_or_else(|_| content.to_string())
            }),
            _ => None,
        };

        RenderQuestion {
            id: question.id.clone(),
            label: question.label().to_string(),
            helper: question.question_helper.clone(),
            kind: question.answer_type,
            widget: widget(question),
            required: question.required,
            editable: editable && question.answer_type.accepts_input(),
            column_class: question.column().css_class(),
            display_value: current_value
                .as_ref()
                .filter(|value| is_answered(Some(*value)))
                .map(|value| display_value(question, value)),
            current_value,
            options,
            reviewer_comment,
            content,
        }
    }
}

/// Input widget of a question.
pub fn widget(question: &Question) -> &'static str {
    match question.answer_type {
        AnswerType::Text => "text_input",
        AnswerType::Textarea => "text_area",
        AnswerType::Number => "number_input",
        AnswerType::Date => "date_picker",
        AnswerType::Time => "time_picker",
        AnswerType::Dropdown if question.metadata.searchable => "searchable_select",
        AnswerType::Dropdown => "select",
        AnswerType::Radio => "radio_group",
        AnswerType::Checkbox => "checkbox_group",
        AnswerType::File => "file_upload",
        AnswerType::Computed => "computed_value",
        AnswerType::Paragraph => "paragraph",
        AnswerType::Location => "location_picker",
    }
}

/// Human-readable answer: option labels for choices, file names for files.
pub fn display_value(question: &Question, value: &Value) -> String {
    let option_label = |value: &Value| {
        question
            .find_option(value)
            .map(|option| option.label.clone())
            .unwrap_or_else(|| value_to_string(value))
    };
    match question.answer_type {
        AnswerType::Dropdown | AnswerType::Radio => option_label(formula_value(value)),
        AnswerType::Checkbox => match value {
            Value::Array(items) => items.iter().map(option_label).collect::<Vec<_>>().join(", "),
            other => option_label(other),
        },
        AnswerType::File => FileAnswer::from_value(value)
            .map(|file| file.filename)
            .unwrap_or_else(|| value_to_string(value)),
        AnswerType::Text
        | AnswerType::Textarea
        | AnswerType::Number
        | AnswerType::Date
        | AnswerType::Time
        | AnswerType::Computed
        | AnswerType::Paragraph
        | AnswerType::Location => value_to_string(value),
    }
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json_ui(payload: &RenderPayload) -> Value {
    let pages = payload
        .pages
        .iter()
        .map(|page| {
            let sections = page
                .sections
                .iter()
                .map(|section| {
                    let rows = section
                        .rows
                        .iter()
                        .map(|row| {
                            json!({
                                "index": row.index,
                                "questions": row.questions.iter().map(question_json).collect::<Vec<_>>(),
                            })
                        })
                        .collect::<Vec<_>>();
                    json!({
                        "id": section.id,
                        "title": section.title,
                        "group_key": section.group_key,
                        "editable": section.editable,
                        "rows": rows,
                    })
                })
                .collect::<Vec<_>>();
            json!({ "id": page.id, "title": page.title, "sections": sections })
        })
        .collect::<Vec<_>>();

    json!({
        "activity_id": payload.activity_id,
        "title": payload.title,
        "stage": payload.stage,
        "status": payload.status.as_str(),
        "locked": payload.locked,
        "progress": {
            "answered": payload.progress.answered,
            "total": payload.progress.total,
        },
        "missing_required": payload.missing_required,
        "pages": pages,
    })
}

fn question_json(question: &RenderQuestion) -> Value {
    let mut map = Map::new();
    map.insert("id".into(), Value::String(question.id.clone()));
    map.insert("label".into(), Value::String(question.label.clone()));
    if let Some(helper) = &question.helper {
        map.insert("helper".into(), Value::String(helper.clone()));
    }
    map.insert("type".into(), Value::String(question.kind.as_str().to_string()));
    map.insert("widget".into(), Value::String(question.widget.to_string()));
    map.insert("required".into(), Value::Bool(question.required));
    map.insert("editable".into(), Value::Bool(question.editable));
    map.insert("column_class".into(), Value::String(question.column_class.to_string()));
    if let Some(current_value) = &question.current_value {
        map.insert("current_value".into(), current_value.clone());
    }
    if let Some(display_value) = &question.display_value {
        map.insert("display_value".into(), Value::String(display_value.clone()));
    }
    if !question.options.is_empty() {
        let options = question
            .options
            .iter()
            .map(|option| json!({ "value": option.value, "label": option.label, "score": option.score }))
            .collect();
        map.insert("options".into(), Value::Array(options));
    }
    if let Some(comment) = &question.reviewer_comment {
        map.insert(
            "reviewer_comment".into(),
            json!({ "key": comment.key, "label": comment.label, "value": comment.value }),
        );
    }
    if let Some(content) = &question.content {
        map.insert("content".into(), Value::String(content.clone()));
    }
    Value::Object(map)
}

/// Render the payload as human-friendly text.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Form: {} ({})", payload.title, payload.activity_id));
    lines.push(format!(
        "Status: {} ({}/{})",
        payload.status.as_str(),
        payload.progress.answered,
        payload.progress.total
    ));
    if payload.locked {
        lines.push("This report is completed and read-only.".to_string());
    }
    if payload.status == RenderStatus::NoAccessiblePages {
        lines.push("You do not have access to any page of this form.".to_string());
        return lines.join("\n");
    }

    for page in &payload.pages {
        lines.push(format!("# {}", page.title));
        for section in &page.sections {
            lines.push(format!("## {}", section.title));
            for row in &section.rows {
                if let Some(index) = row.index {
                    lines.push(format!("  Entry {}", index + 1));
                }
                for question in &row.questions {
                    lines.push(question_line(question));
                }
            }
        }
    }

    if !payload.missing_required.is_empty() {
        lines.push(format!("Missing: {}", payload.missing_required.join(", ")));
    }
    lines.join("\n")
}

fn question_line(question: &RenderQuestion) -> String {
    if let Some(content) = &question.content {
        return format!(" - {}", content);
    }
    let mut entry = format!(" - {} ({})", question.label, question.id);
    if question.required {
        entry.push_str(" [required]");
    }
    if !question.editable {
        entry.push_str(" [read-only]");
    }
    if let Some(display_value) = &question.display_value {
        entry.push_str(&format!(" = {}", display_value));
    }
    entry
}
