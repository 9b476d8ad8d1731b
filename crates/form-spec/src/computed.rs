//! Re-derivation of computed questions.
//!
//! A pass walks computed questions in definition order, evaluates each formula
//! against the context, and stages the values that changed. Fresh values are
//! written back into the working context so a later formula sees an earlier
//! result within the same pass. Staged values are applied in one batch.

use serde_json::{Map, Value};
use tracing::debug;

use crate::answers::AnswerState;
use crate::context::{Context, build_context, row_context};
use crate::expr::Evaluator;
use crate::groups::GroupKeys;
use crate::spec::form::FormDefinition;
use crate::spec::page::Section;
use crate::spec::question::Question;

/// One staged write of a computed value.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedUpdate {
    Single {
        question_id: String,
        value: Value,
    },
    Row {
        group_key: String,
        row_index: usize,
        question_id: String,
        value: Value,
    },
}

/// Evaluates every computed question without touching the store.
pub fn plan_recompute(
    form: &FormDefinition,
    state: &AnswerState,
    keys: &GroupKeys,
    evaluator: &Evaluator,
) -> Vec<ComputedUpdate> {
    let mut ctx = build_context(form, state);
    let mut updates = Vec::new();

    for entry in form.sections() {
        if let Some(group_key) = keys.section(entry.page_index, entry.section_index) {
            plan_rows(entry.section, group_key, state, &ctx, evaluator, &mut updates);
            continue;
        }
        for question in &entry.section.questions {
            let Some(formula) = question.computed_formula() else {
                continue;
            };
            let value = evaluator.evaluate(formula, &ctx).unwrap_or(Value::Null);
            if differs(state.single(&question.id), &value) {
                bind(&mut ctx, question, &value);
                updates.push(ComputedUpdate::Single {
                    question_id: question.id.clone(),
                    value,
                });
            }
        }
    }

    updates
}

fn plan_rows(
    section: &Section,
    group_key: &str,
    state: &AnswerState,
    base: &Context,
    evaluator: &Evaluator,
    updates: &mut Vec<ComputedUpdate>,
) {
    if !section
        .questions
        .iter()
        .any(|question| question.computed_formula().is_some())
    {
        return;
    }
    for (row_index, row) in state.rows(group_key).iter().enumerate() {
        let mut ctx = row_context(base, section, row);
        for question in &section.questions {
            let Some(formula) = question.computed_formula() else {
                continue;
            };
            let value = evaluator.evaluate(formula, &ctx).unwrap_or(Value::Null);
            if differs(row.get(&question.id), &value) {
                bind(&mut ctx, question, &value);
                updates.push(ComputedUpdate::Row {
                    group_key: group_key.to_string(),
                    row_index,
                    question_id: question.id.clone(),
                    value,
                });
            }
        }
    }
}

/// An unanswered question and a null result are the same state.
fn differs(current: Option<&Value>, next: &Value) -> bool {
    match current {
        None => !next.is_null(),
        Some(current) => current != next,
    }
}

fn bind(ctx: &mut Context, question: &Question, value: &Value) {
    if let Some(name) = question.variable_name() {
        ctx.insert(name.to_string(), value.clone());
    }
}

/// Applies staged updates in one batch.
pub fn apply_updates(state: &mut AnswerState, updates: &[ComputedUpdate]) {
    for update in updates {
        match update {
            ComputedUpdate::Single { question_id, value } => {
                state.set_single(question_id, value.clone());
            }
            ComputedUpdate::Row {
                group_key,
                row_index,
                question_id,
                value,
            } => {
                // Rows come from the same state the plan was built on.
                if let Err(err) = state.set_row(group_key, *row_index, question_id, value.clone()) {
                    debug!(error = %err, "skipping stale computed row update");
                }
            }
        }
    }
}

/// Runs one recompute pass and returns the updates it applied.
pub fn recompute(
    form: &FormDefinition,
    state: &mut AnswerState,
    keys: &GroupKeys,
    evaluator: &Evaluator,
) -> Vec<ComputedUpdate> {
    let updates = plan_recompute(form, state, keys, evaluator);
    if !updates.is_empty() {
        debug!(count = updates.len(), "applying computed updates");
        apply_updates(state, &updates);
    }
    updates
}

/// Snapshot of every non-computed answer, used as the change-detection key.
///
/// Computed values are left out so writing them never triggers another pass.
pub fn input_fingerprint(form: &FormDefinition, state: &AnswerState) -> Value {
    let strip = |answers: &Map<String, Value>| -> Map<String, Value> {
        answers
            .iter()
            .filter(|(question_id, _)| !form.is_computed(question_id))
            .map(|(question_id, value)| (question_id.clone(), value.clone()))
            .collect()
    };
    let groups: Map<String, Value> = state
        .groups
        .iter()
        .map(|(key, rows)| {
            let rows = rows.iter().map(|row| Value::Object(strip(row))).collect();
            (key.clone(), Value::Array(rows))
        })
        .collect();
    serde_json::json!({
        "single": Value::Object(strip(&state.single)),
        "groups": Value::Object(groups),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form() -> FormDefinition {
        serde_json::from_value(json!({
            "id": "f",
            "pages": [{ "id": "p1", "sections": [
                { "id": "s1", "questions": [
                    { "id": "q_w", "fieldName": "weight", "answerType": "number" },
                    { "id": "q_h", "fieldName": "height", "answerType": "number" },
                    { "id": "q_bmi", "fieldName": "bmi", "answerType": "computed",
                      "metadata": { "computedFormula": "weight / (height*height)" } },
                    { "id": "q_class", "answerType": "computed",
                      "metadata": { "computedFormula": "bmi >= 25 ? 'high' : 'normal'" } }
                ] },
                { "id": "s2", "isRepeatable": true, "questions": [
                    { "id": "q_qty", "fieldName": "qty", "answerType": "number" },
                    { "id": "q_total", "answerType": "computed",
                      "metadata": { "computedFormula": "qty * weight" } }
                ] }
            ] }]
        }))
        .expect("form")
    }

    #[test]
    fn later_formulas_see_fresh_values() {
        let form = form();
        let keys = GroupKeys::for_form(&form);
        let mut state = AnswerState::new();
        keys.ensure_rows(&mut state);
        state.set_single("q_w", json!(70));
        state.set_single("q_h", json!(1.75));

        recompute(&form, &mut state, &keys, &Evaluator::default());
        let bmi = state.single("q_bmi").and_then(Value::as_f64).expect("bmi");
        assert!((bmi - 22.857).abs() < 0.001);
        assert_eq!(state.single("q_class"), Some(&json!("normal")));
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let form = form();
        let keys = GroupKeys::for_form(&form);
        let mut state = AnswerState::new();
        keys.ensure_rows(&mut state);
        state.set_single("q_w", json!(2));
        state.set_row("__section_s2", 0, "q_qty", json!(3)).expect("row");

        let evaluator = Evaluator::default();
        let first = recompute(&form, &mut state, &keys, &evaluator);
        assert!(!first.is_empty());
        assert_eq!(state.row_value("__section_s2", 0, "q_total"), Some(&json!(6)));
        assert!(recompute(&form, &mut state, &keys, &evaluator).is_empty());
    }

    #[test]
    fn fingerprint_ignores_computed_values() {
        let form = form();
        let mut state = AnswerState::new();
        state.set_single("q_w", json!(70));
        let before = input_fingerprint(&form, &state);
        state.set_single("q_bmi", json!(1));
        assert_eq!(input_fingerprint(&form, &state), before);
        state.set_single("q_h", json!(2));
        assert_ne!(input_fingerprint(&form, &state), before);
    }
}
