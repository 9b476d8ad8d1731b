use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::answers::{AnswerError, AnswerState};
use crate::api::{ApiError, FileUploader, PermissionSource, ReportApi, StoredReport};
use crate::auxiliary::{AuxiliaryFile, AuxiliaryFiles};
use crate::computed::{input_fingerprint, recompute};
use crate::config::EngineConfig;
use crate::context::{Context, build_context, row_context};
use crate::expr::Evaluator;
use crate::groups::GroupKeys;
use crate::permissions::{PermissionSet, is_elevated_role, load_permissions};
use crate::spec::form::{Activity, ActivityStatus, FormDefinition, ResponseType};
use crate::spec::question::Question;
use crate::submission::{
    FinalizeOutcome, ReportHeader, SubmissionError, SubmissionStage, persist, required_link,
};
use crate::validate::{ValidationResult, validate};
use crate::visibility::{FormView, Visibility};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("activity '{0}' is not published")]
    NotPublished(String),
    #[error("activity '{0}' has no pages")]
    EmptyForm(String),
    #[error("report '{0}' was not found")]
    ReportNotFound(String),
    #[error("report '{report}' belongs to activity '{found}', not '{expected}'")]
    ActivityMismatch {
        report: String,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("failed to encode draft: {0}")]
    DraftEncode(#[source] serde_cbor::Error),
    #[error("failed to decode draft: {0}")]
    DraftDecode(#[source] serde_cbor::Error),
}

/// Who opens the session and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub role: String,
    /// Standalone sessions may open activities that are not published.
    pub standalone: bool,
}

impl OpenOptions {
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            standalone: false,
        }
    }

    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }
}

/// Offline copy of an unfinished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DraftSnapshot {
    pub activity_id: String,
    #[serde(default)]
    pub report_id: Option<String>,
    #[serde(default)]
    pub stage: SubmissionStage,
    pub answers: AnswerState,
    #[serde(default)]
    pub facility_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub uploaded_files: Vec<AuxiliaryFile>,
}

impl DraftSnapshot {
    pub fn to_cbor(&self) -> Result<Vec<u8>, SessionError> {
        serde_cbor::to_vec(self).map_err(SessionError::DraftEncode)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_cbor::from_slice(bytes).map_err(SessionError::DraftDecode)
    }
}

/// One viewer filling one activity.
///
/// Every answer mutation goes through the session so the computed questions
/// stay in step with the inputs and permission gating is applied in one place.
#[derive(Debug, Clone)]
pub struct FormSession {
    activity: Activity,
    config: EngineConfig,
    evaluator: Evaluator,
    permissions: PermissionSet,
    role: String,
    base_path: String,
    keys: GroupKeys,
    state: AnswerState,
    fingerprint: Value,
    report_id: Option<String>,
    report_completed: bool,
    stage: SubmissionStage,
    facility_id: Option<String>,
    user_id: Option<String>,
    auxiliary: AuxiliaryFiles,
}

impl FormSession {
    /// Starts a new, empty report.
    pub fn open(
        activity: Activity,
        config: EngineConfig,
        permissions: PermissionSet,
        options: OpenOptions,
    ) -> Result<Self, SessionError> {
        if !options.standalone && activity.status != ActivityStatus::Published {
            return Err(SessionError::NotPublished(activity.id.clone()));
        }
        if activity.form_definition.pages.is_empty() {
            return Err(SessionError::EmptyForm(activity.id.clone()));
        }

        let permissions = if is_elevated_role(&options.role, &config.elevated_roles) {
            PermissionSet::elevated()
        } else {
            permissions
        };
        let keys = GroupKeys::for_form(&activity.form_definition);
        let base_path = config.activity_base_path(&activity.id);
        let evaluator = Evaluator::new(config.limits);

        let mut session = Self {
            activity,
            config,
            evaluator,
            permissions,
            role: options.role,
            base_path,
            keys,
            state: AnswerState::new(),
            fingerprint: Value::Null,
            report_id: None,
            report_completed: false,
            stage: SubmissionStage::Filling,
            facility_id: None,
            user_id: None,
            auxiliary: AuxiliaryFiles::default(),
        };
        session.replace_state(AnswerState::new());
        info!(activity_id = %session.activity.id, role = %session.role, "fill session opened");
        Ok(session)
    }

    /// Reopens a stored report for editing.
    pub fn resume(
        activity: Activity,
        config: EngineConfig,
        permissions: PermissionSet,
        options: OpenOptions,
        report: StoredReport,
    ) -> Result<Self, SessionError> {
        if report.activity_id != activity.id {
            return Err(SessionError::ActivityMismatch {
                report: report.id,
                expected: activity.id,
                found: report.activity_id,
            });
        }
        let mut session = Self::open(activity, config, permissions, options)?;
        session.replace_state(AnswerState::hydrate(&report.answers));
        session.report_completed = report.is_completed();
        session.facility_id = report.facility_id;
        session.user_id = report.user_id;
        session.auxiliary = AuxiliaryFiles::new(report.uploaded_files);
        debug!(report_id = %report.id, completed = session.report_completed, "report resumed");
        session.report_id = Some(report.id);
        Ok(session)
    }

    /// Fetches the viewer's permissions and, when editing, the stored report.
    pub async fn load(
        activity: Activity,
        config: EngineConfig,
        options: OpenOptions,
        permission_source: &dyn PermissionSource,
        reports: &dyn ReportApi,
        report_id: Option<&str>,
    ) -> Result<Self, SessionError> {
        let permissions =
            load_permissions(permission_source, &options.role, &config.elevated_roles).await;
        match report_id {
            None => Self::open(activity, config, permissions, options),
            Some(report_id) => {
                let report = reports
                    .get_report(report_id)
                    .await?
                    .ok_or_else(|| SessionError::ReportNotFound(report_id.to_string()))?;
                Self::resume(activity, config, permissions, options, report)
            }
        }
    }

    /// Restores a draft taken with [`FormSession::snapshot`].
    pub fn restore(
        activity: Activity,
        config: EngineConfig,
        permissions: PermissionSet,
        options: OpenOptions,
        draft: DraftSnapshot,
    ) -> Result<Self, SessionError> {
        if draft.activity_id != activity.id {
            return Err(SessionError::ActivityMismatch {
                report: draft.report_id.unwrap_or_default(),
                expected: activity.id,
                found: draft.activity_id,
            });
        }
        let mut session = Self::open(activity, config, permissions, options)?;
        session.replace_state(draft.answers);
        session.report_id = draft.report_id;
        session.stage = draft.stage;
        session.facility_id = draft.facility_id;
        session.user_id = draft.user_id;
        session.auxiliary = AuxiliaryFiles::new(draft.uploaded_files);
        Ok(session)
    }

    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            activity_id: self.activity.id.clone(),
            report_id: self.report_id.clone(),
            stage: self.stage,
            answers: self.state.clone(),
            facility_id: self.facility_id.clone(),
            user_id: self.user_id.clone(),
            uploaded_files: self.auxiliary.to_vec(),
        }
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn form(&self) -> &FormDefinition {
        &self.activity.form_definition
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn state(&self) -> &AnswerState {
        &self.state
    }

    pub fn group_keys(&self) -> &GroupKeys {
        &self.keys
    }

    pub fn stage(&self) -> SubmissionStage {
        self.stage
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn report_id(&self) -> Option<&str> {
        self.report_id.as_deref()
    }

    /// Editing an existing report rather than creating one.
    pub fn is_editing(&self) -> bool {
        self.report_id.is_some()
    }

    pub fn facility_id(&self) -> Option<&str> {
        self.facility_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn auxiliary_files(&self) -> &[AuxiliaryFile] {
        self.auxiliary.files()
    }

    pub fn visibility(&self) -> Visibility<'_> {
        Visibility::new(
            &self.evaluator,
            &self.permissions,
            &self.base_path,
            self.config.on_evaluation_error,
        )
    }

    pub fn view(&self) -> FormView<'_> {
        self.visibility().form_view(self.form())
    }

    pub fn context(&self) -> Context {
        build_context(self.form(), &self.state)
    }

    /// Context of one row of a repeatable group.
    pub fn row_context(&self, group_key: &str, row_index: usize) -> Option<Context> {
        let (page_index, section_index) = self.group_position(group_key)?;
        let section = &self.form().pages[page_index].sections[section_index];
        let row = self.state.rows(group_key).get(row_index)?;
        Some(row_context(&self.context(), section, row))
    }

    /// Completed reports are read-only except for elevated roles.
    pub fn is_locked(&self) -> bool {
        self.report_completed && !self.permissions.is_elevated()
    }

    /// Whether the viewer may change the question's answer right now.
    pub fn can_edit_question(&self, question_id: &str) -> bool {
        if self.stage != SubmissionStage::Filling || self.is_locked() {
            return false;
        }
        let Some(entry) = self.form().section_of(question_id) else {
            return false;
        };
        let accepts_input = entry
            .section
            .questions
            .iter()
            .find(|question| question.id == question_id)
            .is_some_and(|question| question.answer_type.accepts_input());
        accepts_input
            && self
                .visibility()
                .can_interact(entry.page, entry.section, self.is_editing())
    }

    pub fn set_single(&mut self, question_id: &str, value: Value) -> Result<bool, AnswerError> {
        self.check_single(question_id)?;
        let changed = self.state.set_single(question_id, value);
        if changed {
            self.refresh();
        }
        Ok(changed)
    }

    pub fn set_row(
        &mut self,
        group_key: &str,
        row_index: usize,
        question_id: &str,
        value: Value,
    ) -> Result<bool, AnswerError> {
        self.check_row(group_key, question_id)?;
        let changed = self.state.set_row(group_key, row_index, question_id, value)?;
        if changed {
            self.refresh();
        }
        Ok(changed)
    }

    /// Stores the option matching `option_value`; scored options are stored as `{value, score}`.
    pub fn choose_option(&mut self, question_id: &str, option_value: &Value) -> Result<bool, AnswerError> {
        let value = self.option_answer(question_id, option_value)?;
        self.set_single(question_id, value)
    }

    pub fn choose_row_option(
        &mut self,
        group_key: &str,
        row_index: usize,
        question_id: &str,
        option_value: &Value,
    ) -> Result<bool, AnswerError> {
        let value = self.option_answer(question_id, option_value)?;
        self.set_row(group_key, row_index, question_id, value)
    }

    pub fn add_row(&mut self, group_key: &str) -> Result<usize, AnswerError> {
        self.check_group(group_key)?;
        let index = self.state.add_row(group_key);
        self.refresh();
        Ok(index)
    }

    /// Removing the last row of a group is a no-op.
    pub fn remove_row(&mut self, group_key: &str, row_index: usize) -> Result<bool, AnswerError> {
        self.check_group(group_key)?;
        let removed = self.state.remove_row(group_key, row_index);
        if removed {
            self.refresh();
        }
        Ok(removed)
    }

    /// Companion reviewer comment of a question that enables it. Gated like any answer.
    pub fn set_reviewer_comment(&mut self, question_id: &str, comment: &str) -> Result<bool, AnswerError> {
        let question = self
            .form()
            .question(question_id)
            .ok_or_else(|| AnswerError::UnknownQuestion(question_id.to_string()))?;
        let key = question
            .reviewer_comment_key()
            .ok_or_else(|| AnswerError::UnknownQuestion(format!("{question_id}_reviewers_comment")))?;
        let interactive = self.form().section_of(question_id).is_some_and(|entry| {
            self.visibility()
                .can_interact(entry.page, entry.section, self.is_editing())
        });
        if self.stage != SubmissionStage::Filling || self.is_locked() || !interactive {
            return Err(AnswerError::ReadOnly {
                question: question_id.to_string(),
            });
        }
        Ok(self.state.set_single(&key, Value::String(comment.to_string())))
    }

    /// Validates the answers as they stand, without changing stage.
    pub fn validate(&self) -> ValidationResult {
        validate(self.form(), &self.state, &self.keys, &self.visibility())
    }

    /// Filling to ReviewAndUpload, when every visible required question is answered.
    pub fn submit(&mut self) -> Result<(), SubmissionError> {
        self.require_stage(SubmissionStage::Filling, "submit")?;
        if self.is_locked() {
            return Err(SubmissionError::Locked);
        }
        let result = self.validate();
        if !result.valid {
            info!(missing = result.missing_required.len(), errors = result.errors.len(), "submit rejected");
            return Err(SubmissionError::Validation {
                missing: result.missing_required,
                errors: result.errors,
            });
        }
        self.stage = SubmissionStage::ReviewAndUpload;
        info!(activity_id = %self.activity.id, "answers ready for review");
        Ok(())
    }

    /// Returns from review to editing.
    pub fn reopen(&mut self) -> Result<(), SubmissionError> {
        self.require_stage(SubmissionStage::ReviewAndUpload, "reopen")?;
        self.stage = SubmissionStage::Filling;
        Ok(())
    }

    pub fn select_facility(&mut self, facility_id: Option<String>) {
        self.facility_id = facility_id.filter(|id| !id.trim().is_empty());
    }

    pub fn select_user(&mut self, user_id: Option<String>) {
        self.user_id = user_id.filter(|id| !id.trim().is_empty());
    }

    /// The linking entity the activity requires, if it is still missing.
    pub fn missing_link(&self) -> Option<&'static str> {
        let link = required_link(self.activity.response_type)?;
        let chosen = match self.activity.response_type {
            ResponseType::Facility => self.facility_id.is_some(),
            ResponseType::User => self.user_id.is_some(),
            ResponseType::Any => true,
        };
        (!chosen).then_some(link)
    }

    pub fn attach_file(&mut self, file_name: &str, bytes: &[u8]) -> Result<String, SubmissionError> {
        self.require_stage(SubmissionStage::ReviewAndUpload, "attach files")?;
        let id = self.auxiliary.attach(file_name, bytes)?;
        debug!(id = %id, file_name, "auxiliary file attached");
        Ok(id)
    }

    pub fn rename_file(&mut self, id: &str, file_name: &str) -> Result<(), SubmissionError> {
        self.require_stage(SubmissionStage::ReviewAndUpload, "rename files")?;
        Ok(self.auxiliary.rename(id, file_name)?)
    }

    pub fn edit_file_cell(
        &mut self,
        id: &str,
        row_index: usize,
        column: &str,
        value: Value,
    ) -> Result<(), SubmissionError> {
        self.require_stage(SubmissionStage::ReviewAndUpload, "edit files")?;
        Ok(self.auxiliary.edit_cell(id, row_index, column, value)?)
    }

    pub fn remove_file(&mut self, id: &str) -> Result<bool, SubmissionError> {
        self.require_stage(SubmissionStage::ReviewAndUpload, "remove files")?;
        Ok(self.auxiliary.remove(id))
    }

    /// ReviewAndUpload to Finalized.
    ///
    /// A persistence failure leaves the session in review so the call can be
    /// retried; once the report exists its id is kept and the retry updates it.
    pub async fn finalize(
        &mut self,
        reports: &dyn ReportApi,
        uploader: &dyn FileUploader,
    ) -> Result<FinalizeOutcome, SubmissionError> {
        self.require_stage(SubmissionStage::ReviewAndUpload, "finalize")?;
        if self.is_locked() {
            return Err(SubmissionError::Locked);
        }
        if let Some(link) = self.missing_link() {
            return Err(SubmissionError::MissingLink(link));
        }

        let header = ReportHeader {
            report_id: self.report_id.clone(),
            activity_id: self.activity.id.clone(),
            facility_id: self.facility_id.clone(),
            user_id: self.user_id.clone(),
            status: self.config.submit_status.clone(),
        };
        let mut saved_id = None;
        let result = persist(
            &self.activity.form_definition,
            &header,
            &self.state,
            self.auxiliary.to_vec(),
            reports,
            uploader,
            |id| saved_id = Some(id.to_string()),
        )
        .await;
        if let Some(id) = saved_id {
            self.report_id = Some(id);
        }

        let persisted = result?;
        self.state = persisted.state;
        self.fingerprint = input_fingerprint(self.form(), &self.state);
        self.stage = SubmissionStage::Finalized;
        info!(
            report_id = %persisted.outcome.report_id,
            uploaded = persisted.outcome.uploaded.len(),
            failed = persisted.outcome.failed_uploads.len(),
            "report finalized"
        );
        Ok(persisted.outcome)
    }

    fn replace_state(&mut self, state: AnswerState) {
        self.state = state;
        self.keys.ensure_rows(&mut self.state);
        recompute(
            &self.activity.form_definition,
            &mut self.state,
            &self.keys,
            &self.evaluator,
        );
        self.fingerprint = input_fingerprint(&self.activity.form_definition, &self.state);
    }

    /// Recomputes when a non-computed answer changed since the last pass.
    fn refresh(&mut self) {
        let fingerprint = input_fingerprint(&self.activity.form_definition, &self.state);
        if fingerprint == self.fingerprint {
            return;
        }
        recompute(
            &self.activity.form_definition,
            &mut self.state,
            &self.keys,
            &self.evaluator,
        );
        self.fingerprint = fingerprint;
    }

    fn require_stage(&self, expected: SubmissionStage, action: &'static str) -> Result<(), SubmissionError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(SubmissionError::Stage {
                action,
                stage: self.stage,
            })
        }
    }

    fn group_position(&self, group_key: &str) -> Option<(usize, usize)> {
        self.form().sections().find_map(|entry| {
            (self.keys.section(entry.page_index, entry.section_index) == Some(group_key))
                .then_some((entry.page_index, entry.section_index))
        })
    }

    fn question(&self, question_id: &str) -> Result<&Question, AnswerError> {
        self.form()
            .question(question_id)
            .ok_or_else(|| AnswerError::UnknownQuestion(question_id.to_string()))
    }

    fn check_editable(&self, question: &Question) -> Result<(), AnswerError> {
        if question.is_computed() {
            return Err(AnswerError::ComputedQuestion(question.id.clone()));
        }
        if !self.can_edit_question(&question.id) {
            return Err(AnswerError::ReadOnly {
                question: question.id.clone(),
            });
        }
        Ok(())
    }

    fn check_single(&self, question_id: &str) -> Result<(), AnswerError> {
        let question = self.question(question_id)?;
        if self.keys.of_question(question_id).is_some() {
            return Err(AnswerError::RepeatedQuestion(question_id.to_string()));
        }
        self.check_editable(question)
    }

    fn check_row(&self, group_key: &str, question_id: &str) -> Result<(), AnswerError> {
        let question = self.question(question_id)?;
        match self.keys.of_question(question_id) {
            None => Err(AnswerError::NotRepeated(question_id.to_string())),
            Some(owner) if owner != group_key => Err(AnswerError::UnknownGroup(group_key.to_string())),
            Some(_) => self.check_editable(question),
        }
    }

    fn check_group(&self, group_key: &str) -> Result<(), AnswerError> {
        let (page_index, section_index) = self
            .group_position(group_key)
            .ok_or_else(|| AnswerError::UnknownGroup(group_key.to_string()))?;
        let page = &self.form().pages[page_index];
        let section = &page.sections[section_index];
        let allowed = self.stage == SubmissionStage::Filling
            && !self.is_locked()
            && self.visibility().can_interact(page, section, self.is_editing());
        if allowed {
            Ok(())
        } else {
            Err(AnswerError::ReadOnly {
                question: group_key.to_string(),
            })
        }
    }

    fn option_answer(&self, question_id: &str, option_value: &Value) -> Result<Value, AnswerError> {
        let question = self.question(question_id)?;
        let option = question
            .find_option(option_value)
            .ok_or_else(|| AnswerError::UnknownOption {
                question: question_id.to_string(),
                value: option_value.clone(),
            })?;
        Ok(match option.score {
            Some(score) => json!({ "value": option.value, "score": score }),
            None => option.value.clone(),
        })
    }
}
