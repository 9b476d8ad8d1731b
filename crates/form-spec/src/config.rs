use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::ExprLimits;
use crate::visibility::VisibilityMode;

pub const DEFAULT_BASE_PATH: &str = "/activities/fill";
pub const DEFAULT_SUBMIT_STATUS: &str = "Completed";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Engine settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Prefix of page permission keys; the activity id is appended.
    pub base_path: String,
    pub on_evaluation_error: VisibilityMode,
    pub submit_status: String,
    /// Roles that bypass permission records and the completed-report lock.
    pub elevated_roles: Vec<String>,
    pub limits: ExprLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            on_evaluation_error: VisibilityMode::Hidden,
            submit_status: DEFAULT_SUBMIT_STATUS.to_string(),
            elevated_roles: vec!["admin".into(), "super-admin".into(), "super_admin".into()],
            limits: ExprLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Blank input yields the defaults.
    pub fn from_json(config_json: &str) -> Result<Self, ConfigError> {
        if config_json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(config_json).map_err(ConfigError::Parse)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Base path of one activity's permission keys: `{basePath}/{activityId}`.
    pub fn activity_base_path(&self, activity_id: &str) -> String {
        format!("{}/{}", self.base_path.trim_end_matches('/'), activity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "onEvaluationError": "visible", "limits": { "maxSteps": 50 } }"#)
            .expect("config");
        assert_eq!(config.on_evaluation_error, VisibilityMode::Visible);
        assert_eq!(config.limits.max_steps, 50);
        assert_eq!(config.limits.max_depth, 64);
        assert_eq!(config.submit_status, "Completed");
        assert_eq!(config.activity_base_path("42"), "/activities/fill/42");
    }

    #[test]
    fn blank_config_is_default() {
        assert_eq!(EngineConfig::from_json("  ").expect("config"), EngineConfig::default());
        assert!(matches!(
            EngineConfig::from_json("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file_and_reports_missing_paths() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, br#"{ "basePath": "/forms/", "elevatedRoles": ["auditor"] }"#)
            .expect("write");
        let config = EngineConfig::load(file.path()).expect("load");
        assert_eq!(config.activity_base_path("a1"), "/forms/a1");
        assert_eq!(config.elevated_roles, vec!["auditor"]);

        let missing = EngineConfig::load("/definitely/not/here.json");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
