use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::spec::page::{Page, Section};
use crate::spec::question::Question;

/// Authored schema of one activity: pages, sections, and questions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FormDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pages: Vec<Page>,
}

/// How a completed report must be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[serde(alias = "Facility")]
    Facility,
    #[serde(alias = "User")]
    User,
    #[default]
    #[serde(other)]
    Any,
}

/// Publication state of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ActivityStatus {
    #[default]
    #[serde(alias = "draft")]
    Draft,
    #[serde(alias = "published")]
    Published,
    #[serde(alias = "archived")]
    Archived,
}

/// Data-collection activity owning a form definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: ActivityStatus,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default)]
    pub form_definition: FormDefinition,
}

/// Position of a section inside a form.
#[derive(Debug, Clone, Copy)]
pub struct SectionRef<'a> {
    pub page_index: usize,
    pub section_index: usize,
    pub page: &'a Page,
    pub section: &'a Section,
}

impl FormDefinition {
    /// Every section in definition order.
    pub fn sections(&self) -> impl Iterator<Item = SectionRef<'_>> {
        self.pages.iter().enumerate().flat_map(|(page_index, page)| {
            page.sections
                .iter()
                .enumerate()
                .map(move |(section_index, section)| SectionRef {
                    page_index,
                    section_index,
                    page,
                    section,
                })
        })
    }

    /// Every question in definition order.
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.pages
            .iter()
            .flat_map(|page| page.sections.iter())
            .flat_map(|section| section.questions.iter())
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions().find(|question| question.id == question_id)
    }

    /// Section that owns the question.
    pub fn section_of(&self, question_id: &str) -> Option<SectionRef<'_>> {
        self.sections().find(|entry| {
            entry
                .section
                .questions
                .iter()
                .any(|question| question.id == question_id)
        })
    }

    pub fn is_computed(&self, question_id: &str) -> bool {
        self.question(question_id)
            .map(Question::is_computed)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_response_type_is_any() {
        let activity: Activity = serde_json::from_value(json!({
            "id": "a1",
            "status": "Published",
            "responseType": "household"
        }))
        .expect("activity");
        assert_eq!(activity.response_type, ResponseType::Any);
        assert_eq!(activity.status, ActivityStatus::Published);
    }

    #[test]
    fn section_lookup_follows_definition_order() {
        let form: FormDefinition = serde_json::from_value(json!({
            "id": "f1",
            "pages": [
                { "id": "p1", "sections": [ { "id": "s1", "questions": [
                    { "id": "q1", "answerType": "text" }
                ] } ] },
                { "id": "p2", "sections": [ { "id": "s2", "questions": [
                    { "id": "q2", "answerType": "number" }
                ] } ] }
            ]
        }))
        .expect("form");
        let entry = form.section_of("q2").expect("section");
        assert_eq!(entry.page_index, 1);
        assert_eq!(entry.section.id, "s2");
        assert_eq!(form.questions().count(), 2);
    }
}
