use serde_json::{Value, json};

use form_spec::{
    Activity, AnswerError, AnswerState, DraftSnapshot, EngineConfig, FormSession, OpenOptions,
    PermissionSet, SessionError, SubmissionError, SubmissionStage,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "household_survey" => include_str!("../tests/fixtures/household_survey.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn activity() -> Activity {
    serde_json::from_str(fixture("household_survey")).expect("deserialize")
}

fn session() -> FormSession {
    FormSession::open(
        activity(),
        EngineConfig::default(),
        PermissionSet::allow_all(),
        OpenOptions::for_role("Viewer"),
    )
    .expect("open session")
}

#[test]
fn add_row_then_set_row_in_bare_store() {
    let mut state = AnswerState::new();
    state.ensure_group("__section_s1");
    assert_eq!(state.add_row("__section_s1"), 1);
    state
        .set_row("__section_s1", 1, "q1", json!("hello"))
        .expect("set row");

    assert_eq!(state.groups["__section_s1"], vec![
        serde_json::Map::new(),
        json!({ "q1": "hello" }).as_object().cloned().expect("object"),
    ]);
}

#[test]
fn session_starts_every_group_with_one_row() {
    let mut session = session();
    assert_eq!(session.state().rows("__section_s1").len(), 1);

    let index = session.add_row("__section_s1").expect("add row");
    session
        .set_row("__section_s1", index, "q1", json!("hello"))
        .expect("set row");

    let rows = session.state().rows("__section_s1");
    assert_eq!(rows.len(), 2);
    assert!(rows[0].get("q1").is_none());
    assert_eq!(rows[1].get("q1"), Some(&json!("hello")));
}

#[test]
fn removing_the_last_row_is_a_noop() {
    let mut session = session();
    assert!(!session.remove_row("__section_s1", 0).expect("remove"));
    assert_eq!(session.state().rows("__section_s1").len(), 1);
}

#[test]
fn single_and_row_setters_are_not_interchangeable() {
    let mut session = session();
    assert_eq!(
        session.set_single("q1", json!("x")),
        Err(AnswerError::RepeatedQuestion("q1".into()))
    );
    assert_eq!(
        session.set_row("__section_s1", 0, "q_name", json!("x")),
        Err(AnswerError::NotRepeated("q_name".into()))
    );
    assert_eq!(
        session.set_single("q_bmi", json!(10)),
        Err(AnswerError::ComputedQuestion("q_bmi".into()))
    );
}

#[test]
fn bmi_follows_weight_and_height() {
    let mut session = session();
    session.set_single("q_weight", json!(70)).expect("weight");
    session.set_single("q_height", json!(1.75)).expect("height");

    let bmi = session
        .state()
        .single("q_bmi")
        .and_then(Value::as_f64)
        .expect("bmi computed");
    assert!((bmi - 70.0 / (1.75 * 1.75)).abs() < 1e-9);
    assert!((bmi - 22.857).abs() < 1e-3);

    session.set_single("q_weight", json!(80)).expect("weight");
    let bmi = session.state().single("q_bmi").and_then(Value::as_f64).expect("bmi");
    assert!((bmi - 26.122).abs() < 1e-3);
}

#[test]
fn row_formulas_see_their_own_row() {
    let mut session = session();
    session.add_row("__section_s1").expect("add row");
    session
        .set_row("__section_s1", 0, "q_member_age", json!(34))
        .expect("age");
    session
        .set_row("__section_s1", 1, "q_member_age", json!(9))
        .expect("age");

    assert_eq!(
        session.state().row_value("__section_s1", 0, "q_member_adult"),
        Some(&json!("yes"))
    );
    assert_eq!(
        session.state().row_value("__section_s1", 1, "q_member_adult"),
        Some(&json!("no"))
    );
}

#[test]
fn submit_lists_missing_labels_and_stays_filling() {
    let mut session = session();
    let err = session.submit().expect_err("name is required");
    match err {
        SubmissionError::Validation { missing, .. } => assert_eq!(missing, vec!["Name"]),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(session.stage(), SubmissionStage::Filling);

    session.set_single("q_name", json!("Ada")).expect("name");
    session.submit().expect("submit");
    assert_eq!(session.stage(), SubmissionStage::ReviewAndUpload);
    assert!(session.set_single("q_name", json!("Grace")).is_err());

    session.reopen().expect("reopen");
    assert!(session.set_single("q_name", json!("Grace")).expect("edit"));
}

#[test]
fn reviewer_comments_are_only_taken_while_filling() {
    let mut session = session();
    assert!(
        session
            .set_reviewer_comment("q_smoker", "confirm with household head")
            .expect("comment")
    );
    assert_eq!(
        session.state().single("q_smoker_reviewers_comment"),
        Some(&json!("confirm with household head"))
    );

    session.set_single("q_name", json!("Ada")).expect("name");
    session.submit().expect("submit");
    assert_eq!(
        session.set_reviewer_comment("q_smoker", "too late"),
        Err(AnswerError::ReadOnly {
            question: "q_smoker".into()
        })
    );

    session.reopen().expect("reopen");
    assert!(session.set_reviewer_comment("q_smoker", "too late").expect("comment"));
}

#[test]
fn conditional_requirement_follows_show_if() {
    let mut session = session();
    session.set_single("q_name", json!("Ada")).expect("name");
    session
        .choose_option("q_smoker", &json!("yes"))
        .expect("smoker");
    assert_eq!(
        session.state().single("q_smoker"),
        Some(&json!({ "value": "yes", "score": 2.0 }))
    );

    let result = session.validate();
    assert!(!result.valid);
    assert_eq!(result.missing_required, vec!["Packs per day"]);

    session.choose_option("q_smoker", &json!("no")).expect("smoker");
    assert!(session.validate().valid);
}

#[test]
fn unknown_option_is_rejected() {
    let mut session = session();
    let err = session
        .choose_option("q_smoker", &json!("sometimes"))
        .expect_err("not offered");
    assert!(matches!(err, AnswerError::UnknownOption { .. }));
}

#[test]
fn finalize_requires_review_stage_and_a_facility() {
    let mut session = session();
    session.set_single("q_name", json!("Ada")).expect("name");
    session.submit().expect("submit");
    assert_eq!(session.missing_link(), Some("facility"));

    session.select_facility(Some("  ".into()));
    assert_eq!(session.missing_link(), Some("facility"));
    session.select_facility(Some("fac-9".into()));
    assert_eq!(session.missing_link(), None);
}

#[test]
fn unpublished_activities_only_open_standalone() {
    let mut draft = activity();
    draft.status = form_spec::ActivityStatus::Draft;
    let err = FormSession::open(
        draft.clone(),
        EngineConfig::default(),
        PermissionSet::allow_all(),
        OpenOptions::for_role("Viewer"),
    )
    .expect_err("not published");
    assert!(matches!(err, SessionError::NotPublished(_)));

    FormSession::open(
        draft,
        EngineConfig::default(),
        PermissionSet::allow_all(),
        OpenOptions::for_role("Viewer").standalone(),
    )
    .expect("standalone open");
}

#[test]
fn draft_survives_a_cbor_round_trip() {
    let mut session = session();
    session.set_single("q_name", json!("Ada")).expect("name");
    session.set_single("q_weight", json!(70)).expect("weight");
    session.set_single("q_height", json!(1.75)).expect("height");
    session
        .set_row("__section_s1", 0, "q1", json!("Bo"))
        .expect("row");
    session.select_facility(Some("fac-1".into()));

    let bytes = session.snapshot().to_cbor().expect("encode");
    let draft = DraftSnapshot::from_cbor(&bytes).expect("decode");
    let restored = FormSession::restore(
        activity(),
        EngineConfig::default(),
        PermissionSet::allow_all(),
        OpenOptions::for_role("Viewer"),
        draft,
    )
    .expect("restore");

    assert_eq!(restored.state(), session.state());
    assert_eq!(restored.facility_id(), Some("fac-1"));
    assert_eq!(restored.stage(), SubmissionStage::Filling);
}

#[test]
fn draft_for_another_activity_is_refused() {
    let mut snapshot = session().snapshot();
    snapshot.activity_id = "act-other".into();
    let err = FormSession::restore(
        activity(),
        EngineConfig::default(),
        PermissionSet::allow_all(),
        OpenOptions::for_role("Viewer"),
        snapshot,
    )
    .expect_err("mismatch");
    assert!(matches!(err, SessionError::ActivityMismatch { .. }));
}
