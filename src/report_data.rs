use chrono::{DateTime, Utc};

use crate::classifier::PrivilegedSummary;
use crate::models::{
    PrivilegedAccount, ReportMetrics, ReportWarning, StaleAccount, WeakPolicyAccount,
};

/// Raw query counts that feed the scalar metrics. Optional metrics arrive
/// already defaulted to zero when their query degraded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCounts {
    pub enabled_users: usize,
    pub disabled_users: usize,
    pub total_groups: usize,
    pub total_computers: usize,
    pub total_ous: usize,
    pub domain_controllers: usize,
    pub gpo_count: usize,
    pub cert_template_count: usize,
}

/// Aggregate root handed to the renderer: scalar metrics, the three detail
/// lists, and the degraded-run warnings. Built once per run and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub metrics: ReportMetrics,
    pub privileged: Vec<PrivilegedAccount>,
    pub stale: Vec<StaleAccount>,
    pub weak_policy: Vec<WeakPolicyAccount>,
    pub warnings: Vec<ReportWarning>,
}

impl ReportData {
    /// Merge the independent classifier and aggregator outputs. The derived
    /// counts are computed from the lists here, so count == list length
    /// holds by construction.
    pub fn assemble(
        domain_name: String,
        counts: RawCounts,
        privileged: PrivilegedSummary,
        stale: Vec<StaleAccount>,
        weak_policy: Vec<WeakPolicyAccount>,
        warnings: Vec<ReportWarning>,
    ) -> Self {
        let metrics = ReportMetrics {
            enabled_users: counts.enabled_users,
            disabled_users: counts.disabled_users,
            total_groups: counts.total_groups,
            total_computers: counts.total_computers,
            total_ous: counts.total_ous,
            domain_controllers: counts.domain_controllers,
            gpo_count: counts.gpo_count,
            cert_template_count: counts.cert_template_count,
            enabled_privileged: privileged.enabled,
            disabled_privileged: privileged.disabled,
            stale_count: stale.len(),
            weak_policy_count: weak_policy.len(),
            domain_name,
            generated_at: Utc::now(),
        };

        Self {
            metrics,
            privileged: privileged.accounts,
            stale,
            weak_policy,
            warnings,
        }
    }

    pub fn generation_time(&self) -> DateTime<Utc> {
        self.metrics.generated_at
    }

    pub fn domain_name(&self) -> &str {
        &self.metrics.domain_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::summarize_privileged;
    use std::collections::BTreeSet;

    #[test]
    fn derived_counts_equal_list_lengths() {
        let privileged = summarize_privileged(vec![
            PrivilegedAccount {
                sam_account_name: "a".into(),
                display_name: None,
                enabled: true,
                member_of: BTreeSet::from(["Domain Admins".to_string()]),
            },
            PrivilegedAccount {
                sam_account_name: "b".into(),
                display_name: None,
                enabled: false,
                member_of: BTreeSet::from(["Schema Admins".to_string()]),
            },
        ]);
        let stale = vec![StaleAccount {
            sam_account_name: "c".into(),
            display_name: None,
            last_auth: None,
            days_since_auth: None,
        }];
        let weak = vec![WeakPolicyAccount {
            sam_account_name: "d".into(),
            display_name: None,
        }];

        let data = ReportData::assemble(
            "example.com".into(),
            RawCounts::default(),
            privileged,
            stale,
            weak,
            Vec::new(),
        );

        assert_eq!(
            data.metrics.enabled_privileged + data.metrics.disabled_privileged,
            data.privileged.len()
        );
        assert_eq!(data.metrics.stale_count, data.stale.len());
        assert_eq!(data.metrics.weak_policy_count, data.weak_policy.len());
        assert_eq!(data.domain_name(), "example.com");
    }
}
