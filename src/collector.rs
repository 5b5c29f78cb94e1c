use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::classifier::{self, MembershipMap};
use crate::ldap_client::LdapClient;
use crate::models::{PrivilegedAccount, ReportWarning};
use crate::report_data::{RawCounts, ReportData};

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Staleness threshold in days for the last-authentication scan.
    pub stale_threshold_days: i64,
    /// Domain name to show in the report; defaults to the name derived from
    /// the directory's default naming context.
    pub domain_override: Option<String>,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            stale_threshold_days: classifier::DEFAULT_STALE_THRESHOLD_DAYS,
            domain_override: None,
        }
    }
}

/// Run every directory query and classification step, sequentially, and
/// assemble the immutable report aggregate.
///
/// Only the enabled/disabled user counts are mandatory; any other query that
/// fails degrades to zero/empty, is logged, and lands in the warnings list
/// attached to the report.
pub async fn collect_report(
    client: &mut LdapClient,
    options: &CollectorOptions,
) -> Result<ReportData> {
    let mut warnings = Vec::new();
    let domain_name = options
        .domain_override
        .clone()
        .unwrap_or_else(|| client.domain_name());

    info!("Collecting metrics for domain: {}", domain_name);

    // Mandatory core queries; their failure aborts the whole run.
    let enabled_users = client
        .count_users(true)
        .await
        .context("Mandatory query failed: enabled user count")?;
    let disabled_users = client
        .count_users(false)
        .await
        .context("Mandatory query failed: disabled user count")?;
    debug!(enabled_users, disabled_users, "user counts collected");

    let mut counts = RawCounts {
        enabled_users,
        disabled_users,
        ..RawCounts::default()
    };

    counts.total_groups = optional_count(client.count_groups().await, "groups", &mut warnings);
    counts.total_computers =
        optional_count(client.count_computers().await, "computers", &mut warnings);
    counts.total_ous = optional_count(
        client.count_organizational_units().await,
        "organizational units",
        &mut warnings,
    );
    counts.domain_controllers = optional_count(
        client.count_domain_controllers().await,
        "domain controllers",
        &mut warnings,
    );
    counts.gpo_count = optional_count(
        client.count_gpos().await,
        "group policy objects",
        &mut warnings,
    );
    counts.cert_template_count = optional_count(
        client.count_certificate_templates().await,
        "certificate templates",
        &mut warnings,
    );

    let privileged = collect_privileged(client, &mut warnings).await;

    // One linear scan of enabled accounts feeds both remaining classifiers.
    let (stale, weak_policy) = match client.enumerate_enabled_accounts().await {
        Ok(accounts) => {
            debug!(total = accounts.len(), "enabled accounts enumerated");
            let now = Utc::now();
            (
                classifier::classify_stale(&accounts, options.stale_threshold_days, now),
                classifier::classify_weak_policy(&accounts),
            )
        }
        Err(e) => {
            warn!("Enabled-account enumeration failed: {:#}", e);
            warnings.push(ReportWarning::new(
                "accounts",
                format!("enabled-account enumeration failed: {:#}", e),
            ));
            (Vec::new(), Vec::new())
        }
    };

    info!(
        privileged = privileged.accounts.len(),
        stale = stale.len(),
        weak_policy = weak_policy.len(),
        warnings = warnings.len(),
        "classification complete"
    );

    Ok(ReportData::assemble(
        domain_name,
        counts,
        privileged,
        stale,
        weak_policy,
        warnings,
    ))
}

/// Resolve recursive membership of the Tier 0 groups, then look up current
/// attributes per unique account. A group that cannot be resolved simply
/// contributes zero members; an account deleted between the two steps is
/// skipped silently.
async fn collect_privileged(
    client: &mut LdapClient,
    warnings: &mut Vec<ReportWarning>,
) -> classifier::PrivilegedSummary {
    let mut lookups = Vec::new();
    for group in classifier::TIER0_GROUPS {
        lookups.push((group, client.group_member_sams(group).await));
    }
    let (membership, mut group_warnings) = accumulate_membership(lookups);
    warnings.append(&mut group_warnings);

    let mut accounts = Vec::new();
    for (sam, groups) in membership.into_iter() {
        match client.find_account(&sam).await {
            Ok(Some(account)) => accounts.push(PrivilegedAccount {
                sam_account_name: account.sam_account_name,
                display_name: account.display_name,
                enabled: account.enabled,
                member_of: groups,
            }),
            Ok(None) => {
                debug!("account '{}' vanished before attribute lookup, skipping", sam);
            }
            Err(e) => {
                warn!("Attribute lookup for '{}' failed: {:#}", sam, e);
                warnings.push(ReportWarning::new(
                    "privileged accounts",
                    format!("attribute lookup for '{}' failed: {:#}", sam, e),
                ));
            }
        }
    }

    classifier::summarize_privileged(accounts)
}

/// Merge per-group membership lookup results into one dedup'd map. A failed
/// group contributes zero members plus a warning; the remaining groups'
/// members are kept in full.
fn accumulate_membership<I>(lookups: I) -> (MembershipMap, Vec<ReportWarning>)
where
    I: IntoIterator<Item = (&'static str, Result<Vec<String>>)>,
{
    let mut membership = MembershipMap::new();
    let mut warnings = Vec::new();

    for (group, result) in lookups {
        match result {
            Ok(members) => {
                debug!(group, members = members.len(), "group membership resolved");
                for sam in members {
                    membership.record(&sam, group);
                }
            }
            Err(e) => {
                warn!("Membership lookup for '{}' failed: {:#}", group, e);
                warnings.push(ReportWarning::new(
                    "privileged accounts",
                    format!("membership lookup for '{}' failed: {:#}", group, e),
                ));
            }
        }
    }

    (membership, warnings)
}

fn optional_count(
    result: Result<usize>,
    section: &str,
    warnings: &mut Vec<ReportWarning>,
) -> usize {
    match result {
        Ok(n) => n,
        Err(e) => {
            warn!("Optional metric '{}' unavailable, defaulting to 0: {:#}", section, e);
            warnings.push(ReportWarning::new(
                section,
                format!("query failed, count defaulted to 0: {:#}", e),
            ));
            0
        }
    }
}
