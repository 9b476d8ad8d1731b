#![allow(missing_docs)]

pub mod answers;
pub mod api;
pub mod auxiliary;
pub mod computed;
pub mod config;
pub mod context;
pub mod expr;
pub mod groups;
pub mod permissions;
pub mod render;
pub mod sanitize;
pub mod session;
pub mod spec;
pub mod submission;
pub mod template;
pub mod validate;
pub mod visibility;

pub use answers::{AnswerError, AnswerState, FileAnswer, RowAnswers, is_answered};
pub use api::{
    ApiError, FileUploader, PermissionSource, ReportApi, ReportPayload, ReportRef, StoredReport,
    UploadRequest, UploadedFile,
};
pub use auxiliary::{AuxiliaryError, AuxiliaryFile, AuxiliaryFiles, parse_workbook};
pub use computed::{ComputedUpdate, input_fingerprint, recompute};
pub use config::{ConfigError, EngineConfig};
pub use context::{Context, build_context, row_context};
pub use expr::ast::Expr;
pub use expr::{Evaluator, ExprError, ExprLimits, evaluate, is_truthy};
pub use groups::{GroupKeys, group_key_of};
pub use permissions::{
    PermissionAction, PermissionRecord, PermissionSet, load_permissions, page_key,
};
pub use render::{
    RenderPayload, RenderQuestion, RenderStatus, build_render_payload, render_json_ui,
    render_text,
};
pub use sanitize::{sanitize_answers, sanitize_computed};
pub use session::{DraftSnapshot, FormSession, OpenOptions, SessionError};
pub use spec::{
    Activity, ActivityStatus, AnswerType, FormDefinition, Page, Question, QuestionOption,
    ResponseType, Section,
};
pub use submission::{FinalizeOutcome, SubmissionError, SubmissionStage};
pub use validate::{ValidationError, ValidationResult, validate};
pub use visibility::{FormView, Visibility, VisibilityMap, VisibilityMode, resolve_visibility};
