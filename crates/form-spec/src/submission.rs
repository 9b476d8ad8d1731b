//! Payload assembly and the finalize pipeline.
//!
//! Finalize runs in a fixed order: sanitize computed values, pull inline files
//! out of the answer tree, create or update the report, upload the files
//! concurrently, then patch the answers when any upload produced a reference.
//! The report call must return before any upload starts, and the patch waits
//! for every upload to settle.

use std::fmt;

use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::answers::{AnswerState, FileAnswer};
use crate::api::{ApiError, FileUploader, ReportApi, ReportPayload, upload_request};
use crate::auxiliary::{AuxiliaryError, AuxiliaryFile};
use crate::sanitize::sanitize_answers;
use crate::spec::form::{FormDefinition, ResponseType};
use crate::validate::ValidationError;

/// Stage of a fill session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionStage {
    #[default]
    Filling,
    ReviewAndUpload,
    Finalized,
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubmissionStage::Filling => "filling",
            SubmissionStage::ReviewAndUpload => "review and upload",
            SubmissionStage::Finalized => "finalized",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{}", summarize(.missing, .errors))]
    Validation {
        missing: Vec<String>,
        errors: Vec<ValidationError>,
    },
    #[error("select a {0} before finalizing")]
    MissingLink(&'static str),
    #[error("cannot {action} while the session is {stage}")]
    Stage {
        action: &'static str,
        stage: SubmissionStage,
    },
    #[error("the report is completed and can no longer be changed")]
    Locked,
    #[error("failed to save the report: {0}")]
    Persistence(#[source] ApiError),
    #[error(transparent)]
    Auxiliary(#[from] AuxiliaryError),
}

fn summarize(missing: &[String], errors: &[ValidationError]) -> String {
    if !missing.is_empty() {
        return format!("please answer: {}", missing.join(", "));
    }
    let messages: Vec<&str> = errors.iter().map(|error| error.message.as_str()).collect();
    messages.join("; ")
}

/// Linking entity a response type requires, if any.
pub fn required_link(response_type: ResponseType) -> Option<&'static str> {
    match response_type {
        ResponseType::Facility => Some("facility"),
        ResponseType::User => Some("user"),
        ResponseType::Any => None,
    }
}

/// Location of one answer in the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerSlot {
    Single(String),
    Row {
        group_key: String,
        row_index: usize,
        question_id: String,
    },
}

/// Inline file pulled out of the answer tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub slot: AnswerSlot,
    pub file: FileAnswer,
}

/// Replaces every inline file answer with a filename-only placeholder.
pub fn partition_files(state: &mut AnswerState) -> Vec<PendingUpload> {
    let mut pending = Vec::new();
    for (question_id, value) in state.single.iter_mut() {
        if let Some(file) = take_inline(value) {
            pending.push(PendingUpload {
                slot: AnswerSlot::Single(question_id.clone()),
                file,
            });
        }
    }
    for (group_key, rows) in state.groups.iter_mut() {
        for (row_index, row) in rows.iter_mut().enumerate() {
            for (question_id, value) in row.iter_mut() {
                if let Some(file) = take_inline(value) {
                    pending.push(PendingUpload {
                        slot: AnswerSlot::Row {
                            group_key: group_key.clone(),
                            row_index,
                            question_id: question_id.clone(),
                        },
                        file,
                    });
                }
            }
        }
    }
    pending
}

fn take_inline(value: &mut Value) -> Option<FileAnswer> {
    let file = FileAnswer::from_value(value).filter(FileAnswer::is_inline)?;
    *value = file.placeholder();
    Some(file)
}

/// Writes a value into a slot, skipping slots that no longer exist.
pub fn write_slot(state: &mut AnswerState, slot: &AnswerSlot, value: Value) {
    match slot {
        AnswerSlot::Single(question_id) => {
            state.set_single(question_id, value);
        }
        AnswerSlot::Row {
            group_key,
            row_index,
            question_id,
        } => {
            if let Err(err) = state.set_row(group_key, *row_index, question_id, value) {
                warn!(error = %err, "upload target row disappeared");
            }
        }
    }
}

/// Identity and linking fields of a report being written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportHeader {
    pub report_id: Option<String>,
    pub activity_id: String,
    pub facility_id: Option<String>,
    pub user_id: Option<String>,
    pub status: String,
}

pub fn build_payload(
    header: &ReportHeader,
    state: &AnswerState,
    uploaded_files: Vec<AuxiliaryFile>,
) -> ReportPayload {
    ReportPayload {
        id: header.report_id.clone(),
        activity_id: header.activity_id.clone(),
        user_id: header.user_id.clone(),
        facility_id: header.facility_id.clone(),
        status: header.status.clone(),
        answers: state.to_answer_tree(),
        uploaded_files,
    }
}

/// What a finalize pass achieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub report_id: String,
    pub uploaded: Vec<String>,
    /// Files left as filename-only placeholders.
    pub failed_uploads: Vec<String>,
    pub patched: bool,
}

/// Result of a successful persist: the stored answers and the outcome report.
#[derive(Debug, Clone, PartialEq)]
pub struct Persisted {
    pub state: AnswerState,
    pub outcome: FinalizeOutcome,
}

/// Runs the finalize pipeline against the external services.
///
/// `on_report` is called with the report id as soon as the create-or-update
/// call succeeds, so a caller can switch to the update path before the later
/// steps run.
pub async fn persist(
    form: &FormDefinition,
    header: &ReportHeader,
    state: &AnswerState,
    uploaded_files: Vec<AuxiliaryFile>,
    reports: &dyn ReportApi,
    uploader: &dyn FileUploader,
    mut on_report: impl FnMut(&str),
) -> Result<Persisted, SubmissionError> {
    let mut outgoing = state.clone();
    sanitize_answers(form, &mut outgoing);
    let pending = partition_files(&mut outgoing);
    let payload = build_payload(header, &outgoing, uploaded_files);

    let report = reports
        .create_or_update_report(&payload)
        .await
        .map_err(SubmissionError::Persistence)?;
    on_report(&report.id);
    info!(report_id = %report.id, uploads = pending.len(), "report saved");

    let report_id = report.id.as_str();
    let attempts = pending.iter().map(|upload| async move {
        let Some(request) = upload_request(report_id, &upload.file) else {
            return Err(ApiError::InvalidResponse(format!(
                "'{}' carries no readable data",
                upload.file.filename
            )));
        };
        uploader.upload_file(&request).await
    });
    let results = join_all(attempts).await;

    let mut uploaded = Vec::new();
    let mut failed_uploads = Vec::new();
    for (upload, result) in pending.iter().zip(results) {
        match result {
            Ok(file) => {
                let reference = json!({ "url": file.url, "filename": upload.file.filename });
                write_slot(&mut outgoing, &upload.slot, reference);
                uploaded.push(upload.file.filename.clone());
            }
            Err(err) => {
                warn!(filename = %upload.file.filename, error = %err, "file upload failed; keeping placeholder");
                failed_uploads.push(upload.file.filename.clone());
            }
        }
    }

    let patched = !uploaded.is_empty();
    if patched {
        reports
            .patch_report_answers(&report.id, &outgoing.to_answer_tree())
            .await
            .map_err(SubmissionError::Persistence)?;
    }

    Ok(Persisted {
        state: outgoing,
        outcome: FinalizeOutcome {
            report_id: report.id,
            uploaded,
            failed_uploads,
            patched,
        },
    })
}
