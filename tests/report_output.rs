use std::collections::BTreeSet;
use std::fs;

use ad_health_report::classifier::summarize_privileged;
use ad_health_report::html_generator::HtmlGenerator;
use ad_health_report::models::{PrivilegedAccount, StaleAccount, WeakPolicyAccount};
use ad_health_report::report_data::{RawCounts, ReportData};

fn sample_data() -> ReportData {
    let privileged = summarize_privileged(vec![PrivilegedAccount {
        sam_account_name: "da1".into(),
        display_name: Some("Domain Admin One".into()),
        enabled: true,
        member_of: BTreeSet::from(["Domain Admins".to_string()]),
    }]);
    let stale = vec![StaleAccount {
        sam_account_name: "dusty".into(),
        display_name: None,
        last_auth: None,
        days_since_auth: None,
    }];
    let weak = vec![WeakPolicyAccount {
        sam_account_name: "nopass".into(),
        display_name: Some("No Password".into()),
    }];
    ReportData::assemble(
        "corp.example.com".into(),
        RawCounts {
            enabled_users: 42,
            disabled_users: 3,
            total_groups: 17,
            ..RawCounts::default()
        },
        privileged,
        stale,
        weak,
        Vec::new(),
    )
}

#[test]
fn rendered_report_survives_a_write_read_cycle() {
    let data = sample_data();
    let html = HtmlGenerator::new().generate_report(&data).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ad-organization-report.html");
    fs::write(&path, &html).unwrap();

    let read_back = fs::read_to_string(&path).unwrap();
    assert_eq!(read_back, html);
    assert!(read_back.starts_with("<!DOCTYPE html>"));
    assert!(read_back.contains("corp.example.com"));
    assert!(read_back.contains(">42<"));
}

#[test]
fn rendered_report_has_no_unresolved_placeholders() {
    let html = HtmlGenerator::new()
        .generate_report(&sample_data())
        .unwrap();
    assert!(!html.contains("__DOMAIN__"));
    assert!(!html.contains("_B64__"));
    assert!(!html.contains("__WARNINGS_HTML__"));
}
