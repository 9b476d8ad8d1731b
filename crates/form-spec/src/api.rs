//! Boundary with the persistence, upload, and permission services.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::answers::FileAnswer;
use crate::auxiliary::AuxiliaryFile;
use crate::permissions::PermissionRecord;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Body of the create-or-update report call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    /// Present when updating an existing report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub activity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
    pub status: String,
    pub answers: Map<String, Value>,
    #[serde(default)]
    pub uploaded_files: Vec<AuxiliaryFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportRef {
    pub id: String,
}

/// A report as returned by the persistence service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredReport {
    pub id: String,
    pub activity_id: String,
    #[serde(default)]
    pub status: String,
    /// Either an answer map or a list of `{question_id, answer_value}` records.
    #[serde(default)]
    pub answers: Value,
    #[serde(default)]
    pub facility_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub uploaded_files: Vec<AuxiliaryFile>,
}

impl StoredReport {
    pub fn is_completed(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("completed")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub report_id: String,
    pub filename: String,
    pub content_base64: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UploadedFile {
    pub url: String,
}

#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn page_permissions(&self, role: &str) -> Result<Vec<PermissionRecord>, ApiError>;
}

#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn create_or_update_report(&self, payload: &ReportPayload) -> Result<ReportRef, ApiError>;
    async fn patch_report_answers(
        &self,
        report_id: &str,
        answers: &Map<String, Value>,
    ) -> Result<(), ApiError>;
    /// `Ok(None)` when the report does not exist.
    async fn get_report(&self, report_id: &str) -> Result<Option<StoredReport>, ApiError>;
}

#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload_file(&self, request: &UploadRequest) -> Result<UploadedFile, ApiError>;
}

/// Splits a `data:` URL into its MIME type and decoded bytes.
pub fn decode_data_url(data_url: &str) -> Option<(Option<String>, Vec<u8>)> {
    let rest = data_url.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime = mime.split(';').next().map(str::trim).filter(|mime| !mime.is_empty());
    let bytes = if is_base64 {
        STANDARD.decode(payload.trim()).ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime.map(str::to_string), bytes))
}

/// Upload request for an inline file answer; `None` when it carries no decodable data.
pub fn upload_request(report_id: &str, file: &FileAnswer) -> Option<UploadRequest> {
    let (mime, bytes) = decode_data_url(file.data_url.as_deref()?)?;
    let mime_type = file
        .mime_type
        .clone()
        .or(mime)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Some(UploadRequest {
        report_id: report_id.to_string(),
        filename: file.filename.clone(),
        content_base64: STANDARD.encode(bytes),
        mime_type,
    })
}
