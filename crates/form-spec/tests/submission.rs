use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use form_spec::{
    Activity, AnswerState, ApiError, DraftSnapshot, EngineConfig, FileUploader, FormSession,
    OpenOptions, PermissionRecord, PermissionSet, PermissionSource, ReportApi, ReportPayload,
    ReportRef, SessionError, StoredReport, SubmissionError, SubmissionStage, UploadRequest,
    UploadedFile,
};

fn activity() -> Activity {
    serde_json::from_str(include_str!("../tests/fixtures/household_survey.json"))
        .expect("deserialize")
}

#[derive(Default)]
struct MemoryReports {
    saved: Mutex<Vec<ReportPayload>>,
    patches: Mutex<Vec<(String, Map<String, Value>)>>,
    stored: Option<StoredReport>,
    fail_saves: Mutex<usize>,
}

#[async_trait]
impl ReportApi for MemoryReports {
    async fn create_or_update_report(&self, payload: &ReportPayload) -> Result<ReportRef, ApiError> {
        let mut fail_saves = self.fail_saves.lock().expect("lock");
        if *fail_saves > 0 {
            *fail_saves -= 1;
            return Err(ApiError::Request("connection reset".into()));
        }
        let mut saved = self.saved.lock().expect("lock");
        saved.push(payload.clone());
        let id = payload.id.clone().unwrap_or_else(|| "rep-1".to_string());
        Ok(ReportRef { id })
    }

    async fn patch_report_answers(
        &self,
        report_id: &str,
        answers: &Map<String, Value>,
    ) -> Result<(), ApiError> {
        self.patches
            .lock()
            .expect("lock")
            .push((report_id.to_string(), answers.clone()));
        Ok(())
    }

    async fn get_report(&self, report_id: &str) -> Result<Option<StoredReport>, ApiError> {
        Ok(self.stored.clone().filter(|report| report.id == report_id))
    }
}

struct Uploader {
    succeed: bool,
    requests: Mutex<Vec<UploadRequest>>,
}

impl Uploader {
    fn new(succeed: bool) -> Self {
        Self {
            succeed,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FileUploader for Uploader {
    async fn upload_file(&self, request: &UploadRequest) -> Result<UploadedFile, ApiError> {
        self.requests.lock().expect("lock").push(request.clone());
        if self.succeed {
            Ok(UploadedFile {
                url: format!("https://files.example/{}/{}", request.report_id, request.filename),
            })
        } else {
            Err(ApiError::Request("storage unavailable".into()))
        }
    }
}

struct FailingPermissions;

#[async_trait]
impl PermissionSource for FailingPermissions {
    async fn page_permissions(&self, _role: &str) -> Result<Vec<PermissionRecord>, ApiError> {
        Err(ApiError::Request("timeout".into()))
    }
}

fn ready_session() -> FormSession {
    let mut session = FormSession::open(
        activity(),
        EngineConfig::default(),
        PermissionSet::allow_all(),
        OpenOptions::for_role("Viewer"),
    )
    .expect("open");
    session.set_single("q_name", json!("Ada")).expect("name");
    session
        .set_single(
            "q_photo",
            json!({ "filename": "x.png", "mimeType": "image/png", "dataUrl": "data:image/png;base64,iVBORw0KGgo=" }),
        )
        .expect("photo");
    session.submit().expect("submit");
    session.select_facility(Some("fac-1".into()));
    session
}

#[tokio::test]
async fn failed_upload_keeps_the_filename_placeholder() {
    let reports = MemoryReports::default();
    let uploader = Uploader::new(false);
    let mut session = ready_session();

    let outcome = session.finalize(&reports, &uploader).await.expect("finalize");

    assert_eq!(outcome.report_id, "rep-1");
    assert_eq!(outcome.failed_uploads, vec!["x.png"]);
    assert!(!outcome.patched);
    assert_eq!(session.stage(), SubmissionStage::Finalized);
    assert_eq!(session.state().single("q_photo"), Some(&json!({ "filename": "x.png" })));

    let saved = reports.saved.lock().expect("lock");
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].status, "Completed");
    assert_eq!(saved[0].facility_id.as_deref(), Some("fac-1"));
    assert_eq!(saved[0].answers["q_photo"], json!({ "filename": "x.png" }));
    assert!(reports.patches.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn uploaded_files_are_patched_with_their_url() {
    let reports = MemoryReports::default();
    let uploader = Uploader::new(true);
    let mut session = ready_session();

    let outcome = session.finalize(&reports, &uploader).await.expect("finalize");
    assert!(outcome.patched);
    assert_eq!(outcome.uploaded, vec!["x.png"]);

    let requests = uploader.requests.lock().expect("lock");
    assert_eq!(requests[0].report_id, "rep-1");
    assert_eq!(requests[0].mime_type, "image/png");
    assert_eq!(requests[0].content_base64, "iVBORw0KGgo=");

    let patches = reports.patches.lock().expect("lock");
    assert_eq!(patches.len(), 1);
    assert_eq!(
        patches[0].1["q_photo"],
        json!({ "url": "https://files.example/rep-1/x.png", "filename": "x.png" })
    );
    // The first write never carries inline data.
    let saved = reports.saved.lock().expect("lock");
    assert!(saved[0].answers["q_photo"].get("dataUrl").is_none());
}

#[tokio::test]
async fn stored_function_text_is_reduced_before_saving() {
    let mut activity = activity();
    activity.form_definition.pages[0].sections[0].questions[4]
        .metadata
        .computed_formula = None;

    let mut answers = AnswerState::new();
    answers.single.insert("q_name".into(), json!("Ada"));
    answers
        .single
        .insert("q_bmi".into(), json!("x => { return x } 22.5"));
    let draft = DraftSnapshot {
        activity_id: "act-household".into(),
        report_id: None,
        stage: SubmissionStage::ReviewAndUpload,
        answers,
        facility_id: Some("fac-1".into()),
        user_id: None,
        uploaded_files: Vec::new(),
    };
    let mut session = FormSession::restore(
        activity,
        EngineConfig::default(),
        PermissionSet::allow_all(),
        OpenOptions::for_role("Viewer"),
        draft,
    )
    .expect("restore");

    let reports = MemoryReports::default();
    session
        .finalize(&reports, &Uploader::new(true))
        .await
        .expect("finalize");

    let saved = reports.saved.lock().expect("lock");
    assert_eq!(saved[0].answers["q_bmi"], json!(22.5));
    assert_eq!(saved[0].answers["q_name"], json!("Ada"));
}

#[tokio::test]
async fn failed_save_stays_in_review_and_retries() {
    let reports = MemoryReports {
        fail_saves: Mutex::new(1),
        ..MemoryReports::default()
    };
    let uploader = Uploader::new(true);
    let mut session = ready_session();

    let err = session.finalize(&reports, &uploader).await.expect_err("save fails");
    assert!(matches!(err, SubmissionError::Persistence(_)));
    assert_eq!(session.stage(), SubmissionStage::ReviewAndUpload);
    assert!(uploader.requests.lock().expect("lock").is_empty());

    session.finalize(&reports, &uploader).await.expect("retry");
    assert_eq!(session.stage(), SubmissionStage::Finalized);
}

#[tokio::test]
async fn finalize_without_facility_is_refused() {
    let reports = MemoryReports::default();
    let uploader = Uploader::new(true);
    let mut session = ready_session();
    session.select_facility(None);

    let err = session.finalize(&reports, &uploader).await.expect_err("no facility");
    assert!(matches!(err, SubmissionError::MissingLink("facility")));
    assert!(reports.saved.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn completed_reports_load_locked_for_regular_roles() {
    let stored = StoredReport {
        id: "rep-7".into(),
        activity_id: "act-household".into(),
        status: "Completed".into(),
        answers: json!([
            { "question_id": "q_name", "answer_value": "Ada" },
            { "question_id": "__section_s1", "answer_value": [{ "q1": "Bo" }, { "q1": "Cy" }] }
        ]),
        facility_id: Some("fac-2".into()),
        user_id: None,
        uploaded_files: Vec::new(),
    };
    let reports = MemoryReports {
        stored: Some(stored),
        ..MemoryReports::default()
    };

    let mut session = FormSession::load(
        activity(),
        EngineConfig::default(),
        OpenOptions::for_role("Viewer"),
        &FailingPermissions,
        &reports,
        Some("rep-7"),
    )
    .await
    .expect("load");

    assert!(session.is_editing());
    assert!(session.is_locked());
    assert_eq!(session.state().single("q_name"), Some(&json!("Ada")));
    assert_eq!(session.state().rows("__section_s1").len(), 2);
    assert_eq!(session.facility_id(), Some("fac-2"));
    assert!(session.set_single("q_name", json!("Grace")).is_err());
    assert!(matches!(session.submit(), Err(SubmissionError::Locked)));

    let admin = FormSession::load(
        activity(),
        EngineConfig::default(),
        OpenOptions::for_role("admin"),
        &FailingPermissions,
        &reports,
        Some("rep-7"),
    )
    .await
    .expect("load");
    assert!(!admin.is_locked());
}

#[tokio::test]
async fn missing_report_is_an_error() {
    let reports = MemoryReports::default();
    let err = FormSession::load(
        activity(),
        EngineConfig::default(),
        OpenOptions::for_role("Viewer"),
        &FailingPermissions,
        &reports,
        Some("rep-404"),
    )
    .await
    .expect_err("missing");
    assert!(matches!(err, SessionError::ReportNotFound(id) if id == "rep-404"));
}
