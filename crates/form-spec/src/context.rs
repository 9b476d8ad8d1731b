use serde_json::{Map, Value};

use crate::answers::{AnswerState, RowAnswers, formula_value};
use crate::spec::form::FormDefinition;
use crate::spec::page::Section;

/// Variable environment of formulas: `fieldName -> current value`.
pub type Context = Map<String, Value>;

/// Projects single answers through each question's `fieldName`.
///
/// Every named question is bound, unanswered ones to `null`, so formulas can
/// test for absence instead of failing on an undefined name. Questions of
/// repeatable sections are bound to `null` here and resolved by [`row_context`].
pub fn build_context(form: &FormDefinition, state: &AnswerState) -> Context {
    let mut ctx = Context::new();
    for entry in form.sections() {
        for question in &entry.section.questions {
            let Some(name) = question.variable_name() else {
                continue;
            };
            let value = if entry.section.is_repeatable {
                Value::Null
            } else {
                state
                    .single(&question.id)
                    .map(formula_value)
                    .cloned()
                    .unwrap_or(Value::Null)
            };
            ctx.insert(name.to_string(), value);
        }
    }
    ctx
}

/// Overlays one row's answers on top of the page-level context.
pub fn row_context(base: &Context, section: &Section, row: &RowAnswers) -> Context {
    let mut ctx = base.clone();
    for question in &section.questions {
        if let Some(name) = question.variable_name() {
            let value = row
                .get(&question.id)
                .map(formula_value)
                .cloned()
                .unwrap_or(Value::Null);
            ctx.insert(name.to_string(), value);
        }
    }
    ctx
}
