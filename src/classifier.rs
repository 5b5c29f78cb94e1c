use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{DirectoryAccount, PrivilegedAccount, StaleAccount, WeakPolicyAccount};

/// Staleness threshold applied when the caller does not override it.
pub const DEFAULT_STALE_THRESHOLD_DAYS: i64 = 180;

/// Well-known Tier 0 administrative groups whose recursive membership
/// defines the privileged-account list.
pub const TIER0_GROUPS: [&str; 3] = ["Domain Admins", "Enterprise Admins", "Schema Admins"];

/// Timestamps decoding to before this instant are implausible (AD stores
/// "never" as FILETIME zero, which decodes to 1601) and are treated the
/// same as an absent timestamp.
fn epoch_floor() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

/// Scan enabled accounts and keep those whose last authentication is absent,
/// implausible, or strictly older than `now - threshold_days`.
///
/// An account exactly at the threshold boundary is not stale. Disabled
/// accounts are skipped so the output only ever contains enabled ones.
/// Ordering is left to the renderer.
pub fn classify_stale(
    accounts: &[DirectoryAccount],
    threshold_days: i64,
    now: DateTime<Utc>,
) -> Vec<StaleAccount> {
    let cutoff = now - Duration::days(threshold_days);
    let floor = epoch_floor();
    let mut stale = Vec::new();

    for account in accounts {
        if !account.enabled {
            continue;
        }

        match account.last_auth {
            None => stale.push(never_authenticated(account)),
            Some(ts) if ts < floor => stale.push(never_authenticated(account)),
            Some(ts) if ts < cutoff => {
                let days = ((now - ts).num_seconds() as f64 / 86_400.0).round() as i64;
                stale.push(StaleAccount {
                    sam_account_name: account.sam_account_name.clone(),
                    display_name: account.display_name.clone(),
                    last_auth: Some(ts),
                    days_since_auth: Some(days),
                });
            }
            Some(_) => {}
        }
    }

    stale
}

fn never_authenticated(account: &DirectoryAccount) -> StaleAccount {
    StaleAccount {
        sam_account_name: account.sam_account_name.clone(),
        display_name: account.display_name.clone(),
        last_auth: None,
        days_since_auth: None,
    }
}

/// Enabled accounts exempted from mandatory-password policy.
pub fn classify_weak_policy(accounts: &[DirectoryAccount]) -> Vec<WeakPolicyAccount> {
    accounts
        .iter()
        .filter(|a| a.enabled && a.password_not_required)
        .map(|a| WeakPolicyAccount {
            sam_account_name: a.sam_account_name.clone(),
            display_name: a.display_name.clone(),
        })
        .collect()
}

/// Accumulated recursive membership of the administrative groups, keyed by
/// sAMAccountName. One entry per account no matter how many groups it was
/// found under.
#[derive(Debug, Default)]
pub struct MembershipMap {
    map: BTreeMap<String, BTreeSet<String>>,
}

impl MembershipMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sam_account_name: &str, group: &str) {
        self.map
            .entry(sam_account_name.to_string())
            .or_default()
            .insert(group.to_string());
    }

    pub fn into_iter(self) -> impl Iterator<Item = (String, BTreeSet<String>)> {
        self.map.into_iter()
    }
}

/// Privileged-account detail list plus its enabled/disabled breakdown.
#[derive(Debug, Default)]
pub struct PrivilegedSummary {
    pub enabled: usize,
    pub disabled: usize,
    pub accounts: Vec<PrivilegedAccount>,
}

pub fn summarize_privileged(accounts: Vec<PrivilegedAccount>) -> PrivilegedSummary {
    let enabled = accounts.iter().filter(|a| a.enabled).count();
    let disabled = accounts.len() - enabled;
    PrivilegedSummary {
        enabled,
        disabled,
        accounts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(sam: &str, last_auth: Option<DateTime<Utc>>) -> DirectoryAccount {
        DirectoryAccount {
            sam_account_name: sam.to_string(),
            display_name: Some(format!("{} Display", sam)),
            enabled: true,
            last_auth,
            password_not_required: false,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn old_last_auth_is_stale_with_day_count() {
        let accounts = vec![account("x", Some(now() - Duration::days(200)))];
        let stale = classify_stale(&accounts, 180, now());
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].days_since_auth, Some(200));
        assert!(stale[0].last_auth.is_some());
    }

    #[test]
    fn recent_last_auth_is_not_stale() {
        let accounts = vec![account("y", Some(now() - Duration::days(10)))];
        assert!(classify_stale(&accounts, 180, now()).is_empty());
    }

    #[test]
    fn missing_last_auth_is_never_authenticated() {
        let accounts = vec![account("z", None)];
        let stale = classify_stale(&accounts, 180, now());
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].last_auth, None);
        assert_eq!(stale[0].days_since_auth, None);
    }

    #[test]
    fn timestamp_exactly_at_threshold_is_not_stale() {
        let accounts = vec![account("b", Some(now() - Duration::days(180)))];
        assert!(classify_stale(&accounts, 180, now()).is_empty());
    }

    #[test]
    fn timestamp_just_past_threshold_is_stale() {
        let accounts = vec![account(
            "b",
            Some(now() - Duration::days(180) - Duration::seconds(1)),
        )];
        assert_eq!(classify_stale(&accounts, 180, now()).len(), 1);
    }

    #[test]
    fn pre_epoch_timestamp_treated_as_never() {
        let ancient = Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap();
        let accounts = vec![account("svc", Some(ancient))];
        let stale = classify_stale(&accounts, 180, now());
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].last_auth, None);
        assert_eq!(stale[0].days_since_auth, None);
    }

    #[test]
    fn disabled_accounts_never_appear_in_stale_list() {
        let mut disabled = account("old", Some(now() - Duration::days(400)));
        disabled.enabled = false;
        assert!(classify_stale(&[disabled], 180, now()).is_empty());
    }

    #[test]
    fn weak_policy_requires_enabled_and_flag() {
        let mut flagged = account("w", None);
        flagged.password_not_required = true;
        let mut disabled_flagged = account("w2", None);
        disabled_flagged.password_not_required = true;
        disabled_flagged.enabled = false;
        let plain = account("w3", None);

        let weak = classify_weak_policy(&[flagged, disabled_flagged, plain]);
        assert_eq!(weak.len(), 1);
        assert_eq!(weak[0].sam_account_name, "w");
    }

    #[test]
    fn membership_map_deduplicates_and_unions_groups() {
        let mut map = MembershipMap::new();
        map.record("admin", "Domain Admins");
        map.record("admin", "Enterprise Admins");
        map.record("admin", "Schema Admins");
        map.record("other", "Schema Admins");

        let entries: Vec<_> = map.into_iter().collect();
        assert_eq!(entries.len(), 2);
        let (sam, groups) = &entries[0];
        assert_eq!(sam, "admin");
        assert_eq!(groups.len(), 3);
        assert!(groups.contains("Domain Admins"));
        assert!(groups.contains("Enterprise Admins"));
        assert!(groups.contains("Schema Admins"));
    }

    #[test]
    fn privileged_summary_counts_match_list_length() {
        let make = |sam: &str, enabled: bool| PrivilegedAccount {
            sam_account_name: sam.to_string(),
            display_name: None,
            enabled,
            member_of: BTreeSet::from(["Domain Admins".to_string()]),
        };
        let summary = summarize_privileged(vec![
            make("a", true),
            make("b", false),
            make("c", true),
        ]);
        assert_eq!(summary.enabled, 2);
        assert_eq!(summary.disabled, 1);
        assert_eq!(summary.enabled + summary.disabled, summary.accounts.len());
    }
}
