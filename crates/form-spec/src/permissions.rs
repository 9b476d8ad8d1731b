use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::PermissionSource;

/// Flags granted to a role for a page or a section of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PermissionRecord {
    pub page_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_key: Option<String>,
    #[serde(default)]
    pub can_view: bool,
    #[serde(default)]
    pub can_create: bool,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
}

impl PermissionRecord {
    pub fn grants(&self, action: PermissionAction) -> bool {
        match action {
            PermissionAction::View => self.can_view,
            PermissionAction::Create => self.can_create,
            PermissionAction::Edit => self.can_edit,
            PermissionAction::Delete => self.can_delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAction {
    View,
    Create,
    Edit,
    Delete,
}

/// Permission records of the current viewer.
///
/// Lookup precedence: the record for the exact `(page_key, section_key)` pair;
/// otherwise the page-level record with the longest `page_key` that prefixes
/// the requested key. No matching record means the action is allowed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionSet {
    records: Vec<PermissionRecord>,
    elevated: bool,
}

impl PermissionSet {
    pub fn new(records: Vec<PermissionRecord>) -> Self {
        Self {
            records,
            elevated: false,
        }
    }

    /// No records configured: everything is allowed.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Roles that bypass every record.
    pub fn elevated() -> Self {
        Self {
            records: Vec::new(),
            elevated: true,
        }
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    pub fn records(&self) -> &[PermissionRecord] {
        &self.records
    }

    pub fn lookup(&self, page_key: &str, section_key: Option<&str>) -> Option<&PermissionRecord> {
        let exact = self.records.iter().find(|record| {
            record.page_key == page_key && record.section_key.as_deref() == section_key
        });
        if exact.is_some() {
            return exact;
        }
        self.records
            .iter()
            .filter(|record| record.section_key.is_none() && page_key.starts_with(&record.page_key))
            .max_by_key(|record| record.page_key.len())
    }

    pub fn allows(&self, action: PermissionAction, page_key: &str, section_key: Option<&str>) -> bool {
        if self.elevated {
            return true;
        }
        self.lookup(page_key, section_key)
            .map(|record| record.grants(action))
            .unwrap_or(true)
    }
}

/// Permission key of a page: `"{base_path}:page:{page_id}"`.
pub fn page_key(base_path: &str, page_id: &str) -> String {
    format!("{}:page:{}", base_path, page_id)
}

pub fn is_elevated_role(role: &str, elevated_roles: &[String]) -> bool {
    let role = role.trim();
    elevated_roles
        .iter()
        .any(|elevated| elevated.trim().eq_ignore_ascii_case(role))
}

/// Fetches the role's records. A failed fetch is logged and treated as "nothing configured".
pub async fn load_permissions(
    source: &dyn PermissionSource,
    role: &str,
    elevated_roles: &[String],
) -> PermissionSet {
    if is_elevated_role(role, elevated_roles) {
        debug!(role, "elevated role bypasses permission records");
        return PermissionSet::elevated();
    }
    match source.page_permissions(role).await {
        Ok(records) => PermissionSet::new(records),
        Err(err) => {
            warn!(role, error = %err, "permission fetch failed; allowing all pages");
            PermissionSet::allow_all()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(page_key: &str, section_key: Option<&str>, can_view: bool) -> PermissionRecord {
        PermissionRecord {
            page_key: page_key.into(),
            section_key: section_key.map(Into::into),
            can_view,
            can_create: can_view,
            can_edit: false,
            can_delete: false,
        }
    }

    #[test]
    fn missing_records_allow() {
        let perms = PermissionSet::new(vec![]);
        assert!(perms.allows(PermissionAction::View, "/x:page:p1", None));
        assert!(perms.allows(PermissionAction::Edit, "/x:page:p1", Some("s1")));
    }

    #[test]
    fn exact_section_record_beats_page_record() {
        let perms = PermissionSet::new(vec![
            record("/x:page:p1", None, true),
            record("/x:page:p1", Some("s2"), false),
        ]);
        assert!(perms.allows(PermissionAction::View, "/x:page:p1", Some("s1")));
        assert!(!perms.allows(PermissionAction::View, "/x:page:p1", Some("s2")));
    }

    #[test]
    fn longest_prefix_wins() {
        let perms = PermissionSet::new(vec![
            record("/x", None, false),
            record("/x:page", None, true),
        ]);
        assert!(perms.allows(PermissionAction::View, "/x:page:p9", None));
        assert!(perms.allows(PermissionAction::View, "/y:page:p9", None));
        assert!(!perms.allows(PermissionAction::View, "/xyz", None));
    }

    #[test]
    fn elevated_roles_bypass_records() {
        let roles = vec!["admin".to_string(), "super-admin".to_string()];
        assert!(is_elevated_role(" Admin ", &roles));
        assert!(!is_elevated_role("Viewer", &roles));
        assert!(PermissionSet::elevated().allows(PermissionAction::Delete, "/x", None));
    }
}
