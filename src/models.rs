use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Read-only snapshot of a user account for one report run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryAccount {
    pub sam_account_name: String,
    pub display_name: Option<String>,
    pub enabled: bool,
    pub last_auth: Option<DateTime<Utc>>,
    pub password_not_required: bool,
}

impl DirectoryAccount {
    pub fn new(sam_account_name: String) -> Self {
        Self {
            sam_account_name,
            display_name: None,
            enabled: true,
            last_auth: None,
            password_not_required: false,
        }
    }
}

/// Member of one or more of the well-known Tier 0 administrative groups.
/// One entry per unique account; `member_of` is the union of the groups it
/// was found under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegedAccount {
    pub sam_account_name: String,
    pub display_name: Option<String>,
    pub enabled: bool,
    pub member_of: BTreeSet<String>,
}

impl PrivilegedAccount {
    pub fn display_or_sam(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or(&self.sam_account_name)
    }

    /// Group names joined into a single display string.
    pub fn member_of_display(&self) -> String {
        self.member_of
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Enabled account whose last authentication is missing or older than the
/// staleness threshold. `days_since_auth` is present iff `last_auth` is;
/// both absent means "never authenticated".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleAccount {
    pub sam_account_name: String,
    pub display_name: Option<String>,
    pub last_auth: Option<DateTime<Utc>>,
    pub days_since_auth: Option<i64>,
}

impl StaleAccount {
    pub fn display_or_sam(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or(&self.sam_account_name)
    }
}

/// Enabled account with the "password not required" UAC flag set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakPolicyAccount {
    pub sam_account_name: String,
    pub display_name: Option<String>,
}

impl WeakPolicyAccount {
    pub fn display_or_sam(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or(&self.sam_account_name)
    }
}

/// Scalar metrics for the report header cards. Immutable after assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    pub enabled_users: usize,
    pub disabled_users: usize,
    pub total_groups: usize,
    pub total_computers: usize,
    pub total_ous: usize,
    pub domain_controllers: usize,
    pub gpo_count: usize,
    pub cert_template_count: usize,
    pub enabled_privileged: usize,
    pub disabled_privileged: usize,
    pub stale_count: usize,
    pub weak_policy_count: usize,
    pub domain_name: String,
    pub generated_at: DateTime<Utc>,
}

/// One degraded-but-not-fatal condition from a report run. Collected during
/// assembly and surfaced both on the log stream and in the report itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWarning {
    pub section: String,
    pub message: String,
}

impl ReportWarning {
    pub fn new(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            message: message.into(),
        }
    }
}
