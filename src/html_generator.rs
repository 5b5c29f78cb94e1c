use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::models::ReportWarning;
use crate::report_data::ReportData;

/// Renders the report aggregate into one self-contained HTML document:
/// inline style and script, no external assets, detail lists embedded as
/// base64-encoded JSON so hostile display names cannot break out of the
/// script context.
pub struct HtmlGenerator;

impl HtmlGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_report(&self, data: &ReportData) -> Result<String> {
        let m = &data.metrics;

        let privileged_b64 = encode_dataset(&privileged_rows(data))?;
        let stale_b64 = encode_dataset(&stale_rows(data))?;
        let weak_b64 = encode_dataset(&weak_policy_rows(data))?;

        let html = TEMPLATE
            .replace("__DOMAIN__", &escape_html(data.domain_name()))
            .replace(
                "__GENERATED_AT__",
                &data
                    .generation_time()
                    .format("%Y-%m-%d %H:%M:%S UTC")
                    .to_string(),
            )
            .replace("__ENABLED_USERS__", &m.enabled_users.to_string())
            .replace("__DISABLED_USERS__", &m.disabled_users.to_string())
            .replace("__TOTAL_GROUPS__", &m.total_groups.to_string())
            .replace("__TOTAL_COMPUTERS__", &m.total_computers.to_string())
            .replace("__TOTAL_OUS__", &m.total_ous.to_string())
            .replace("__DOMAIN_CONTROLLERS__", &m.domain_controllers.to_string())
            .replace("__GPO_COUNT__", &m.gpo_count.to_string())
            .replace("__CERT_TEMPLATE_COUNT__", &m.cert_template_count.to_string())
            .replace("__ENABLED_PRIVILEGED__", &m.enabled_privileged.to_string())
            .replace("__DISABLED_PRIVILEGED__", &m.disabled_privileged.to_string())
            .replace("__STALE_COUNT__", &m.stale_count.to_string())
            .replace("__WEAK_POLICY_COUNT__", &m.weak_policy_count.to_string())
            .replace("__WARNINGS_HTML__", &warnings_html(&data.warnings))
            .replace("__PRIVILEGED_B64__", &privileged_b64)
            .replace("__STALE_B64__", &stale_b64)
            .replace("__WEAK_B64__", &weak_b64);

        Ok(html)
    }
}

impl Default for HtmlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Privileged list sorted by display name, case-insensitive ascending.
fn privileged_rows(data: &ReportData) -> Vec<Value> {
    let mut accounts: Vec<_> = data.privileged.iter().collect();
    accounts.sort_by_key(|a| a.display_or_sam().to_lowercase());
    accounts
        .into_iter()
        .map(|a| {
            json!({
                "account": a.sam_account_name,
                "name": a.display_or_sam(),
                "enabled": a.enabled,
                "groups": a.member_of_display(),
            })
        })
        .collect()
}

/// Stale list sorted most-stale-first; never-authenticated entries sort as
/// if infinitely stale.
fn stale_rows(data: &ReportData) -> Vec<Value> {
    let mut accounts: Vec<_> = data.stale.iter().collect();
    accounts.sort_by(|a, b| match (a.days_since_auth, b.days_since_auth) {
        (None, None) => a
            .display_or_sam()
            .to_lowercase()
            .cmp(&b.display_or_sam().to_lowercase()),
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x),
    });
    accounts
        .into_iter()
        .map(|a| {
            json!({
                "account": a.sam_account_name,
                "name": a.display_or_sam(),
                "lastAuth": a.last_auth.map(|ts| ts.format("%Y-%m-%d").to_string()),
                "days": a.days_since_auth,
            })
        })
        .collect()
}

/// Weak-policy list sorted by display name, case-insensitive ascending.
fn weak_policy_rows(data: &ReportData) -> Vec<Value> {
    let mut accounts: Vec<_> = data.weak_policy.iter().collect();
    accounts.sort_by_key(|a| a.display_or_sam().to_lowercase());
    accounts
        .into_iter()
        .map(|a| {
            json!({
                "account": a.sam_account_name,
                "name": a.display_or_sam(),
            })
        })
        .collect()
}

fn encode_dataset(rows: &[Value]) -> Result<String> {
    let bytes = serde_json::to_vec(rows)?;
    Ok(BASE64.encode(bytes))
}

fn warnings_html(warnings: &[ReportWarning]) -> String {
    if warnings.is_empty() {
        return String::new();
    }
    let items: String = warnings
        .iter()
        .map(|w| {
            format!(
                "<li><b>{}</b>: {}</li>",
                escape_html(&w.section),
                escape_html(&w.message)
            )
        })
        .collect();
    format!(
        "<section class=\"warnings\"><h2>Partial data</h2>\
         <p>Some queries failed; the affected sections show zero or empty results.</p>\
         <ul>{}</ul></section>",
        items
    )
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>AD Health Report — __DOMAIN__</title>
<style>
:root{--blue:#2c5282;--bg:#f7fafc;--border:#e2e8f0;--muted:#718096;
--red:#c53030;--orange:#dd6b20;--green:#38a169}
*{box-sizing:border-box;margin:0;padding:0}
body{font-family:"Segoe UI",system-ui,sans-serif;background:var(--bg);color:#1a202c;padding:24px}
header{background:var(--blue);color:#fff;border-radius:8px;padding:24px;margin-bottom:24px}
header h1{font-size:22px;margin-bottom:4px}
header p{opacity:.85;font-size:13px}
.warnings{background:#fffbea;border:1px solid #ecc94b;border-radius:8px;padding:16px;margin-bottom:24px}
.warnings h2{font-size:15px;color:#975a16;margin-bottom:6px}
.warnings p{font-size:13px;color:#975a16;margin-bottom:8px}
.warnings li{font-size:13px;margin-left:18px;color:#744210}
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(220px,1fr));gap:16px}
.card{background:#fff;border:1px solid var(--border);border-radius:8px;padding:18px}
.card .label{font-size:12px;text-transform:uppercase;letter-spacing:.05em;color:var(--muted)}
.card .value{font-size:30px;font-weight:600;margin-top:6px}
.card.clickable{cursor:pointer;border-left:4px solid var(--blue)}
.card.clickable:hover{box-shadow:0 2px 8px rgba(0,0,0,.12)}
.card.stale{border-left-color:var(--orange)}
.card.weak{border-left-color:var(--red)}
.card .sub{font-size:12px;color:var(--muted);margin-top:4px}
.hint{font-size:11px;color:var(--blue);margin-top:8px}
.modal-backdrop{display:none;position:fixed;inset:0;background:rgba(0,0,0,.5);z-index:10}
.modal-backdrop.open{display:flex;align-items:center;justify-content:center}
.modal{background:#fff;border-radius:8px;width:min(900px,92vw);max-height:86vh;
display:flex;flex-direction:column;overflow:hidden}
.modal-head{display:flex;align-items:center;gap:12px;padding:16px 20px;border-bottom:1px solid var(--border)}
.modal-head h2{font-size:16px;flex:1}
.modal-head input{padding:6px 10px;border:1px solid var(--border);border-radius:6px;font-size:13px;width:220px}
.modal-head button{padding:6px 12px;border:1px solid var(--border);background:#fff;
border-radius:6px;font-size:13px;cursor:pointer}
.modal-head button.primary{background:var(--blue);color:#fff;border-color:var(--blue)}
.modal-body{overflow:auto;padding:0 20px 20px}
table{width:100%;border-collapse:collapse;font-size:13px;margin-top:12px}
th{position:sticky;top:0;background:var(--bg);text-align:left;padding:8px;
border-bottom:2px solid var(--border);cursor:pointer;user-select:none;white-space:nowrap}
td{padding:8px;border-bottom:1px solid var(--border)}
.empty{padding:24px;text-align:center;color:var(--muted);font-size:13px}
footer{margin-top:24px;font-size:12px;color:var(--muted);text-align:center}
</style>
</head>
<body>
<header>
  <h1>Active Directory Health Report</h1>
  <p>Domain: __DOMAIN__ &middot; Generated: __GENERATED_AT__</p>
</header>

__WARNINGS_HTML__

<div class="grid">
  <div class="card"><div class="label">Enabled Users</div><div class="value">__ENABLED_USERS__</div></div>
  <div class="card"><div class="label">Disabled Users</div><div class="value">__DISABLED_USERS__</div></div>
  <div class="card"><div class="label">Groups</div><div class="value">__TOTAL_GROUPS__</div></div>
  <div class="card"><div class="label">Computers</div><div class="value">__TOTAL_COMPUTERS__</div></div>
  <div class="card"><div class="label">Organizational Units</div><div class="value">__TOTAL_OUS__</div></div>
  <div class="card"><div class="label">Domain Controllers</div><div class="value">__DOMAIN_CONTROLLERS__</div></div>
  <div class="card"><div class="label">Group Policy Objects</div><div class="value">__GPO_COUNT__</div></div>
  <div class="card"><div class="label">Certificate Templates</div><div class="value">__CERT_TEMPLATE_COUNT__</div></div>
  <div class="card clickable" onclick="openModal('privileged')">
    <div class="label">Privileged (Tier 0) Accounts</div>
    <div class="value">__ENABLED_PRIVILEGED__</div>
    <div class="sub">enabled &middot; __DISABLED_PRIVILEGED__ disabled</div>
    <div class="hint">Click for details</div>
  </div>
  <div class="card clickable stale" onclick="openModal('stale')">
    <div class="label">Stale Accounts</div>
    <div class="value">__STALE_COUNT__</div>
    <div class="sub">enabled, no recent authentication</div>
    <div class="hint">Click for details</div>
  </div>
  <div class="card clickable weak" onclick="openModal('weakPolicy')">
    <div class="label">Password Not Required</div>
    <div class="value">__WEAK_POLICY_COUNT__</div>
    <div class="sub">enabled accounts exempt from password policy</div>
    <div class="hint">Click for details</div>
  </div>
</div>

<div class="modal-backdrop" id="backdrop" onclick="backdropClick(event)">
  <div class="modal">
    <div class="modal-head">
      <h2 id="modal-title"></h2>
      <input id="filter" type="search" placeholder="Filter..." oninput="renderTable()">
      <button class="primary" onclick="exportCsv()">Export CSV</button>
      <button onclick="closeModal()">Close</button>
    </div>
    <div class="modal-body" id="modal-body"></div>
  </div>
</div>

<footer>Self-contained report &mdash; no external resources, all data embedded at generation time.</footer>

<script>
"use strict";

function decodeDataset(b64) {
  try {
    var bytes = Uint8Array.from(atob(b64), function (c) { return c.charCodeAt(0); });
    var data = JSON.parse(new TextDecoder("utf-8").decode(bytes));
    return Array.isArray(data) ? data : [];
  } catch (err) {
    console.error("embedded dataset could not be decoded", err);
    return [];
  }
}

var DATASETS = {
  privileged: {
    title: "Privileged (Tier 0) Accounts",
    headers: ["Account", "Display Name", "Enabled", "Member Of"],
    fields: ["account", "name", "enabled", "groups"],
    rows: decodeDataset("__PRIVILEGED_B64__")
  },
  stale: {
    title: "Stale Accounts",
    headers: ["Account", "Display Name", "Last Authentication", "Days Since Auth"],
    fields: ["account", "name", "lastAuth", "days"],
    rows: decodeDataset("__STALE_B64__")
  },
  weakPolicy: {
    title: "Password Not Required Accounts",
    headers: ["Account", "Display Name"],
    fields: ["account", "name"],
    rows: decodeDataset("__WEAK_B64__")
  }
};

var current = null;
var sortState = { field: null, asc: true };

function openModal(key) {
  current = key;
  sortState = { field: null, asc: true };
  document.getElementById("filter").value = "";
  document.getElementById("modal-title").textContent = DATASETS[key].title;
  document.getElementById("backdrop").classList.add("open");
  renderTable();
}

function closeModal() {
  document.getElementById("backdrop").classList.remove("open");
  current = null;
}

function backdropClick(ev) {
  if (ev.target === document.getElementById("backdrop")) closeModal();
}

function formatCell(field, value) {
  if (value === null || value === undefined) {
    return field === "lastAuth" ? "Never" : "—";
  }
  if (typeof value === "boolean") return value ? "Yes" : "No";
  return String(value);
}

function visibleRows() {
  var ds = DATASETS[current];
  var needle = document.getElementById("filter").value.toLowerCase();
  var rows = ds.rows.filter(function (r) {
    return ds.fields.some(function (f) {
      return formatCell(f, r[f]).toLowerCase().indexOf(needle) !== -1;
    });
  });
  if (sortState.field !== null) {
    var f = sortState.field;
    var dir = sortState.asc ? 1 : -1;
    rows = rows.slice().sort(function (a, b) {
      var x = a[f], y = b[f];
      if (x === null || x === undefined) return 1 * dir;
      if (y === null || y === undefined) return -1 * dir;
      if (typeof x === "number" && typeof y === "number") return (x - y) * dir;
      return String(x).toLowerCase().localeCompare(String(y).toLowerCase()) * dir;
    });
  }
  return rows;
}

function sortBy(field) {
  if (sortState.field === field) {
    sortState.asc = !sortState.asc;
  } else {
    sortState = { field: field, asc: true };
  }
  renderTable();
}

function renderTable() {
  if (current === null) return;
  var ds = DATASETS[current];
  var rows = visibleRows();
  var body = document.getElementById("modal-body");
  if (rows.length === 0) {
    body.innerHTML = '<div class="empty">No matching entries</div>';
    return;
  }
  var table = document.createElement("table");
  var thead = document.createElement("thead");
  var tr = document.createElement("tr");
  ds.headers.forEach(function (h, i) {
    var th = document.createElement("th");
    var marker = sortState.field === ds.fields[i] ? (sortState.asc ? " ▲" : " ▼") : "";
    th.textContent = h + marker;
    th.onclick = function () { sortBy(ds.fields[i]); };
    tr.appendChild(th);
  });
  thead.appendChild(tr);
  table.appendChild(thead);
  var tbody = document.createElement("tbody");
  rows.forEach(function (r) {
    var tr = document.createElement("tr");
    ds.fields.forEach(function (f) {
      var td = document.createElement("td");
      td.textContent = formatCell(f, r[f]);
      tr.appendChild(td);
    });
    tbody.appendChild(tr);
  });
  table.appendChild(tbody);
  body.innerHTML = "";
  body.appendChild(table);
}

function csvStamp(d) {
  function p(n) { return String(n).padStart(2, "0"); }
  return d.getFullYear() + "-" + p(d.getMonth() + 1) + "-" + p(d.getDate()) +
    "-" + p(d.getHours()) + p(d.getMinutes()) + p(d.getSeconds());
}

function exportCsv() {
  if (current === null) return;
  var ds = DATASETS[current];
  var quote = function (v) {
    return '"' + String(v === null || v === undefined ? "" : v).replace(/"/g, '""') + '"';
  };
  var lines = [ds.headers.map(quote).join(",")];
  visibleRows().forEach(function (r) {
    lines.push(ds.fields.map(function (f) { return quote(r[f]); }).join(","));
  });
  var blob = new Blob(["\uFEFF" + lines.join("\r\n")], { type: "text/csv;charset=utf-8" });
  var a = document.createElement("a");
  a.href = URL.createObjectURL(blob);
  a.download = current + "-" + csvStamp(new Date()) + ".csv";
  document.body.appendChild(a);
  a.click();
  document.body.removeChild(a);
  URL.revokeObjectURL(a.href);
}

document.addEventListener("keydown", function (ev) {
  if (ev.key === "Escape") closeModal();
});
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::summarize_privileged;
    use crate::models::{PrivilegedAccount, StaleAccount, WeakPolicyAccount};
    use crate::report_data::{RawCounts, ReportData};
    use std::collections::BTreeSet;

    fn sample_data() -> ReportData {
        let privileged = summarize_privileged(vec![
            PrivilegedAccount {
                sam_account_name: "zadmin".into(),
                display_name: Some("Zoe Admin".into()),
                enabled: true,
                member_of: BTreeSet::from([
                    "Domain Admins".to_string(),
                    "Schema Admins".to_string(),
                ]),
            },
            PrivilegedAccount {
                sam_account_name: "evil".into(),
                display_name: Some("Evil \"Name\", </script>".into()),
                enabled: false,
                member_of: BTreeSet::from(["Enterprise Admins".to_string()]),
            },
        ]);
        let stale = vec![
            StaleAccount {
                sam_account_name: "old".into(),
                display_name: Some("Old Account".into()),
                last_auth: Some(chrono::Utc::now() - chrono::Duration::days(200)),
                days_since_auth: Some(200),
            },
            StaleAccount {
                sam_account_name: "never".into(),
                display_name: Some("Never Logged In".into()),
                last_auth: None,
                days_since_auth: None,
            },
        ];
        let weak = vec![WeakPolicyAccount {
            sam_account_name: "nopass".into(),
            display_name: Some("No Password".into()),
        }];
        ReportData::assemble(
            "corp.example.com".into(),
            RawCounts {
                enabled_users: 120,
                disabled_users: 8,
                ..RawCounts::default()
            },
            privileged,
            stale,
            weak,
            vec![crate::models::ReportWarning::new(
                "certificate templates",
                "query failed, count defaulted to 0: access <denied>",
            )],
        )
    }

    #[test]
    fn hostile_display_names_survive_embedding() {
        let data = sample_data();
        let rows = privileged_rows(&data);
        let payload = encode_dataset(&rows).unwrap();

        let html = HtmlGenerator::new().generate_report(&data).unwrap();
        assert!(html.contains(&payload));
        // The raw hostile string must never appear verbatim in a script context.
        assert!(!html.contains("Evil \"Name\", </script>"));

        let decoded: Vec<Value> =
            serde_json::from_slice(&BASE64.decode(payload.as_bytes()).unwrap()).unwrap();
        assert_eq!(decoded[0]["name"], "Evil \"Name\", </script>");
    }

    #[test]
    fn privileged_rows_sorted_by_display_name_case_insensitive() {
        let rows = privileged_rows(&sample_data());
        assert_eq!(rows[0]["account"], "evil");
        assert_eq!(rows[1]["account"], "zadmin");
        assert_eq!(rows[1]["groups"], "Domain Admins, Schema Admins");
    }

    #[test]
    fn stale_rows_sorted_never_first_then_most_stale() {
        let rows = stale_rows(&sample_data());
        assert_eq!(rows[0]["account"], "never");
        assert!(rows[0]["lastAuth"].is_null());
        assert!(rows[0]["days"].is_null());
        assert_eq!(rows[1]["account"], "old");
        assert_eq!(rows[1]["days"], 200);
    }

    #[test]
    fn report_is_self_contained() {
        let html = HtmlGenerator::new().generate_report(&sample_data()).unwrap();
        assert!(!html.contains("src=\"http"));
        assert!(!html.contains("href=\"http"));
        assert!(!html.contains("@import"));
        assert!(html.contains("<style>"));
        assert!(html.contains("<script>"));
    }

    #[test]
    fn csv_export_quotes_fields_and_prefixes_bom() {
        let html = HtmlGenerator::new().generate_report(&sample_data()).unwrap();
        assert!(html.contains("\\uFEFF"));
        assert!(html.contains(r#"replace(/"/g, '""')"#));
        assert!(html.contains(".csv"));
    }

    #[test]
    fn scalar_metrics_and_warnings_are_rendered_escaped() {
        let html = HtmlGenerator::new().generate_report(&sample_data()).unwrap();
        assert!(html.contains("corp.example.com"));
        assert!(html.contains(">120<"));
        assert!(html.contains("access &lt;denied&gt;"));
        assert!(html.contains("Partial data"));
    }

    #[test]
    fn empty_warning_list_renders_no_warning_section() {
        let mut data = sample_data();
        data.warnings.clear();
        let html = HtmlGenerator::new().generate_report(&data).unwrap();
        assert!(!html.contains("Partial data"));
    }

    #[test]
    fn html_escaping() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }
}
