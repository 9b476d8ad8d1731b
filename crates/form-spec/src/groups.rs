use std::collections::BTreeMap;

use crate::answers::AnswerState;
use crate::spec::form::FormDefinition;
use crate::spec::page::Section;

pub const GROUP_KEY_PREFIX: &str = "__section_";

/// Storage key of a repeatable section's rows.
///
/// The trimmed `groupName` wins; otherwise the key derives from the section id,
/// then from its name. The result depends only on the section, so repeated calls
/// always agree.
pub fn group_key_of(section: &Section) -> Option<String> {
    if let Some(name) = section
        .group_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return Some(name.to_string());
    }
    let id = section.id.trim();
    if !id.is_empty() {
        return Some(format!("{GROUP_KEY_PREFIX}{id}"));
    }
    let slug = slugify(&section.name);
    (!slug.is_empty()).then(|| format!("{GROUP_KEY_PREFIX}{slug}"))
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

/// Group keys of every repeatable section, computed once per session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupKeys {
    by_position: BTreeMap<(usize, usize), String>,
    by_question: BTreeMap<String, String>,
}

impl GroupKeys {
    /// Sections without id, name, or group name get a positional key.
    pub fn for_form(form: &FormDefinition) -> Self {
        let mut keys = GroupKeys::default();
        for entry in form.sections() {
            if !entry.section.is_repeatable {
                continue;
            }
            let key = group_key_of(entry.section).unwrap_or_else(|| {
                format!(
                    "{GROUP_KEY_PREFIX}p{}_s{}",
                    entry.page_index, entry.section_index
                )
            });
            for question in &entry.section.questions {
                keys.by_question.insert(question.id.clone(), key.clone());
            }
            keys.by_position
                .insert((entry.page_index, entry.section_index), key);
        }
        keys
    }

    pub fn section(&self, page_index: usize, section_index: usize) -> Option<&str> {
        self.by_position
            .get(&(page_index, section_index))
            .map(String::as_str)
    }

    /// Group key of the section that owns the question, if that section repeats.
    pub fn of_question(&self, question_id: &str) -> Option<&str> {
        self.by_question.get(question_id).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_position.values().map(String::as_str)
    }

    pub fn contains(&self, group_key: &str) -> bool {
        self.by_position.values().any(|key| key == group_key)
    }

    /// Gives every repeatable group at least one row.
    pub fn ensure_rows(&self, state: &mut AnswerState) {
        for key in self.keys() {
            state.ensure_group(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section(value: serde_json::Value) -> Section {
        serde_json::from_value(value).expect("section")
    }

    #[test]
    fn group_name_wins_and_is_trimmed() {
        let s = section(json!({ "id": "s1", "isRepeatable": true, "groupName": "  members " }));
        assert_eq!(group_key_of(&s).as_deref(), Some("members"));
    }

    #[test]
    fn blank_group_name_derives_from_id() {
        let s = section(json!({ "id": "s1", "isRepeatable": true, "groupName": "" }));
        assert_eq!(group_key_of(&s).as_deref(), Some("__section_s1"));
        assert_eq!(group_key_of(&s), group_key_of(&s));
    }

    #[test]
    fn falls_back_to_name_slug() {
        let s = section(json!({ "id": "", "name": "Household Members!", "isRepeatable": true }));
        assert_eq!(group_key_of(&s).as_deref(), Some("__section_household_members"));
    }
}
