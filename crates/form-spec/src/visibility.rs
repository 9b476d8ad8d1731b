use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::answers::AnswerState;
use crate::context::{Context, build_context, row_context};
use crate::expr::Evaluator;
use crate::groups::GroupKeys;
use crate::permissions::{PermissionAction, PermissionSet, page_key};
use crate::spec::form::FormDefinition;
use crate::spec::page::{Page, Section};
use crate::spec::question::{Question, QuestionOption};

/// Question visibility keyed by question id, or by [`row_slot`] for repeated questions.
pub type VisibilityMap = BTreeMap<String, bool>;

/// How a condition that fails to evaluate resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    Visible,
    #[default]
    Hidden,
}

/// Pages left for the viewer after permission filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum FormView<'a> {
    /// The form defines no pages at all.
    Empty,
    /// Pages exist but the viewer may see none of them.
    NoAccessiblePages,
    Pages(Vec<&'a Page>),
}

/// Combines permission flags with `showIf` conditions.
#[derive(Debug, Clone, Copy)]
pub struct Visibility<'a> {
    evaluator: &'a Evaluator,
    permissions: &'a PermissionSet,
    base_path: &'a str,
    on_error: VisibilityMode,
}

impl<'a> Visibility<'a> {
    pub fn new(
        evaluator: &'a Evaluator,
        permissions: &'a PermissionSet,
        base_path: &'a str,
        on_error: VisibilityMode,
    ) -> Self {
        Self {
            evaluator,
            permissions,
            base_path,
            on_error,
        }
    }

    pub fn page_key(&self, page: &Page) -> String {
        page_key(self.base_path, &page.id)
    }

    pub fn is_page_visible(&self, page: &Page) -> bool {
        self.permissions
            .allows(PermissionAction::View, &self.page_key(page), None)
    }

    pub fn is_section_visible(&self, page: &Page, section: &Section) -> bool {
        self.is_page_visible(page)
            && self.permissions.allows(
                PermissionAction::View,
                &self.page_key(page),
                Some(&section.id),
            )
    }

    pub fn is_question_visible(
        &self,
        page: &Page,
        section: &Section,
        question: &Question,
        ctx: &Context,
    ) -> bool {
        self.is_section_visible(page, section) && self.condition_holds(question.show_if(), ctx)
    }

    pub fn is_option_visible(&self, option: &QuestionOption, ctx: &Context) -> bool {
        self.condition_holds(option.showif.as_deref(), ctx)
    }

    pub fn visible_options<'q>(&self, question: &'q Question, ctx: &Context) -> Vec<&'q QuestionOption> {
        question
            .options
            .iter()
            .filter(|option| self.is_option_visible(option, ctx))
            .collect()
    }

    /// Evaluates a condition; blank conditions hold and failures resolve per [`VisibilityMode`].
    pub fn condition_holds(&self, formula: Option<&str>, ctx: &Context) -> bool {
        match self.evaluator.condition(formula, ctx) {
            Some(holds) => holds,
            None => self.on_error == VisibilityMode::Visible,
        }
    }

    /// Whether the viewer may change answers in a section: `can_edit` when
    /// editing an existing report, `can_create` otherwise.
    pub fn can_interact(&self, page: &Page, section: &Section, editing: bool) -> bool {
        let action = if editing {
            PermissionAction::Edit
        } else {
            PermissionAction::Create
        };
        self.permissions
            .allows(action, &self.page_key(page), Some(&section.id))
    }

    pub fn form_view<'f>(&self, form: &'f FormDefinition) -> FormView<'f> {
        if form.pages.is_empty() {
            return FormView::Empty;
        }
        let pages: Vec<&Page> = form
            .pages
            .iter()
            .filter(|page| self.is_page_visible(page))
            .collect();
        if pages.is_empty() {
            FormView::NoAccessiblePages
        } else {
            FormView::Pages(pages)
        }
    }
}

/// Key of a repeated question's visibility in one row.
pub fn row_slot(group_key: &str, row_index: usize, question_id: &str) -> String {
    format!("{group_key}[{row_index}].{question_id}")
}

/// Resolves every question of the form against the current answers.
pub fn resolve_visibility(
    form: &FormDefinition,
    state: &AnswerState,
    keys: &GroupKeys,
    visibility: &Visibility<'_>,
) -> VisibilityMap {
    let base = build_context(form, state);
    let mut map = VisibilityMap::new();

    for entry in form.sections() {
        let section_visible = visibility.is_section_visible(entry.page, entry.section);
        match keys.section(entry.page_index, entry.section_index) {
            Some(group_key) => {
                for (row_index, row) in state.rows(group_key).iter().enumerate() {
                    let ctx = row_context(&base, entry.section, row);
                    for question in &entry.section.questions {
                        let visible =
                            section_visible && visibility.condition_holds(question.show_if(), &ctx);
                        map.insert(row_slot(group_key, row_index, &question.id), visible);
                    }
                }
            }
            None => {
                for question in &entry.section.questions {
                    let visible =
                        section_visible && visibility.condition_holds(question.show_if(), &base);
                    map.insert(question.id.clone(), visible);
                }
            }
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionRecord;
    use serde_json::json;

    fn form() -> FormDefinition {
        serde_json::from_value(json!({
            "id": "f",
            "pages": [
                { "id": "p1", "sections": [{ "id": "s1", "questions": [
                    { "id": "q_age", "fieldName": "age", "answerType": "number" },
                    { "id": "q_school", "answerType": "text", "metadata": { "showIf": "age >= 5" } },
                    { "id": "q_broken", "answerType": "text", "metadata": { "showIf": "age >=" } }
                ] }] },
                { "id": "p2", "sections": [{ "id": "s2", "questions": [] }] }
            ]
        }))
        .expect("form")
    }

    #[test]
    fn unconfigured_permissions_show_everything() {
        let evaluator = Evaluator::default();
        let perms = PermissionSet::new(vec![]);
        let vis = Visibility::new(&evaluator, &perms, "/x", VisibilityMode::Hidden);
        let form = form();
        assert!(vis.is_page_visible(&form.pages[0]));
        assert!(matches!(vis.form_view(&form), FormView::Pages(pages) if pages.len() == 2));
    }

    #[test]
    fn no_accessible_pages_is_distinct_from_empty() {
        let evaluator = Evaluator::default();
        let perms = PermissionSet::new(vec![PermissionRecord {
            page_key: "/x".into(),
            section_key: None,
            can_view: false,
            can_create: false,
            can_edit: false,
            can_delete: false,
        }]);
        let vis = Visibility::new(&evaluator, &perms, "/x", VisibilityMode::Hidden);
        assert_eq!(vis.form_view(&form()), FormView::NoAccessiblePages);
        assert_eq!(vis.form_view(&FormDefinition::default()), FormView::Empty);
    }

    #[test]
    fn show_if_and_failure_mode() {
        let evaluator = Evaluator::default();
        let perms = PermissionSet::allow_all();
        let form = form();
        let mut state = AnswerState::new();
        state.set_single("q_age", json!(4));

        let hidden = Visibility::new(&evaluator, &perms, "/x", VisibilityMode::Hidden);
        let map = resolve_visibility(&form, &state, &GroupKeys::for_form(&form), &hidden);
        assert_eq!(map["q_age"], true);
        assert_eq!(map["q_school"], false);
        assert_eq!(map["q_broken"], false);

        let visible = Visibility::new(&evaluator, &perms, "/x", VisibilityMode::Visible);
        state.set_single("q_age", json!("7"));
        let map = resolve_visibility(&form, &state, &GroupKeys::for_form(&form), &visible);
        assert_eq!(map["q_school"], true);
        assert_eq!(map["q_broken"], true);
    }

    #[test]
    fn options_filter_by_their_own_condition() {
        let question: Question = serde_json::from_value(json!({
            "id": "q",
            "answerType": "radio",
            "options": [
                { "value": "a", "label": "A" },
                { "value": "b", "label": "B", "showif": "flag === true" }
            ]
        }))
        .expect("question");
        let evaluator = Evaluator::default();
        let perms = PermissionSet::allow_all();
        let vis = Visibility::new(&evaluator, &perms, "/x", VisibilityMode::Hidden);
        let mut ctx = Context::new();
        ctx.insert("flag".into(), json!(false));
        assert_eq!(vis.visible_options(&question, &ctx).len(), 1);
        ctx.insert("flag".into(), json!(true));
        assert_eq!(vis.visible_options(&question, &ctx).len(), 2);
    }
}
