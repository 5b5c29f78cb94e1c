use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};

use crate::models::DirectoryAccount;

// userAccountControl bits
const UAC_ACCOUNT_DISABLED: u32 = 0x2;
const UAC_PASSWD_NOTREQD: u32 = 0x20;
const UAC_SERVER_TRUST_ACCOUNT: u32 = 0x2000; // domain controller machine account

// LDAP_MATCHING_RULE_BIT_AND / LDAP_MATCHING_RULE_IN_CHAIN OIDs
const BIT_AND: &str = "1.2.840.113556.1.4.803";
const IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

const PAGE_SIZE: i32 = 500;

/// Read-only LDAP adapter for the report queries. Every method issues one
/// logical directory query; callers decide which failures are fatal.
pub struct LdapClient {
    ldap: Ldap,
    base_dn: String,
    configuration_dn: Option<String>,
}

impl LdapClient {
    pub async fn connect(server: &str, use_tls: bool) -> Result<Self> {
        let ldap_url = if use_tls {
            format!("ldaps://{}:636", server)
        } else {
            format!("ldap://{}:389", server)
        };

        let settings = LdapConnSettings::new();
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &ldap_url)
            .await
            .context("Failed to connect to LDAP server")?;

        ldap3::drive!(conn);

        // Discover naming contexts from rootDSE; fall back to deriving the
        // default context from the server name.
        let (base_dn, configuration_dn) = match Self::query_rootdse(&mut ldap).await {
            Ok(contexts) => contexts,
            Err(_) => (Self::base_dn_from_server(server), None),
        };

        Ok(Self {
            ldap,
            base_dn,
            configuration_dn,
        })
    }

    /// Bind using GSSAPI/Kerberos authentication (Windows integrated).
    /// Requires a domain-joined machine and the server's FQDN.
    pub async fn bind_gssapi(&mut self, server_fqdn: &str) -> Result<()> {
        #[cfg(windows)]
        {
            self.ldap
                .sasl_gssapi_bind(server_fqdn)
                .await
                .context(
                    "GSSAPI bind failed. This usually indicates:\n\
                     1. Server FQDN is incorrect (provide full domain name, not IP)\n\
                     2. Machine is not domain-joined\n\
                     3. Kerberos ticket unavailable\n\
                     4. Service Principal Name (SPN) not registered in AD",
                )?
                .success()
                .context("GSSAPI bind authentication failed")?;
            Ok(())
        }
        #[cfg(not(windows))]
        {
            let _ = server_fqdn;
            Err(anyhow::anyhow!(
                "GSSAPI/Kerberos authentication requires a domain-joined Windows \
                 machine. Alternative: use explicit credentials with --username \
                 and --password"
            ))
        }
    }

    /// Bind using simple authentication (username/password).
    pub async fn bind_simple(&mut self, username: &str, password: &str) -> Result<()> {
        self.ldap
            .simple_bind(username, password)
            .await
            .context("Failed to connect for simple bind")?
            .success()
            .context("Simple bind authentication failed")?;
        Ok(())
    }

    /// DNS-style name of the domain behind the default naming context,
    /// e.g. `DC=corp,DC=example,DC=com` -> `corp.example.com`.
    pub fn domain_name(&self) -> String {
        Self::domain_from_dn(&self.base_dn)
    }

    /// Count of user accounts filtered by enabled/disabled state. These two
    /// queries are the mandatory core of the report.
    pub async fn count_users(&mut self, enabled: bool) -> Result<usize> {
        let filter = if enabled {
            format!(
                "(&(objectCategory=person)(objectClass=user)(!(userAccountControl:{}:=2)))",
                BIT_AND
            )
        } else {
            format!(
                "(&(objectCategory=person)(objectClass=user)(userAccountControl:{}:=2))",
                BIT_AND
            )
        };
        let base = self.base_dn.clone();
        self.count_subtree(&base, &filter).await
    }

    pub async fn count_groups(&mut self) -> Result<usize> {
        let base = self.base_dn.clone();
        self.count_subtree(&base, "(objectClass=group)").await
    }

    pub async fn count_computers(&mut self) -> Result<usize> {
        let base = self.base_dn.clone();
        self.count_subtree(&base, "(objectClass=computer)").await
    }

    pub async fn count_organizational_units(&mut self) -> Result<usize> {
        let base = self.base_dn.clone();
        self.count_subtree(&base, "(objectClass=organizationalUnit)")
            .await
    }

    pub async fn count_domain_controllers(&mut self) -> Result<usize> {
        let filter = format!(
            "(&(objectClass=computer)(userAccountControl:{}:={}))",
            BIT_AND, UAC_SERVER_TRUST_ACCOUNT
        );
        let base = self.base_dn.clone();
        self.count_subtree(&base, &filter).await
    }

    pub async fn count_gpos(&mut self) -> Result<usize> {
        let base = self.base_dn.clone();
        self.count_subtree(&base, "(objectClass=groupPolicyContainer)")
            .await
    }

    /// Certificate templates live under the configuration naming context,
    /// not the default one.
    pub async fn count_certificate_templates(&mut self) -> Result<usize> {
        let configuration_dn = self
            .configuration_dn
            .clone()
            .context("configuration naming context not available from rootDSE")?;
        let base = format!(
            "CN=Certificate Templates,CN=Public Key Services,CN=Services,{}",
            configuration_dn
        );
        self.count_subtree(&base, "(objectClass=pKICertificateTemplate)")
            .await
    }

    /// Generic object count under an arbitrary subtree. Paged so large
    /// domains do not hit the server-side size limit.
    pub async fn count_subtree(&mut self, base: &str, filter: &str) -> Result<usize> {
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let mut search = self
            .ldap
            .streaming_search_with(adapters, base, Scope::Subtree, filter, vec!["cn"])
            .await
            .context("Failed to start LDAP search")?;

        let mut count = 0usize;
        while let Some(_entry) = search.next().await.context("LDAP search failed")? {
            count += 1;
        }
        search
            .finish()
            .await
            .success()
            .context("LDAP search did not complete successfully")?;
        Ok(count)
    }

    /// Snapshot of every enabled user account with the attributes the stale
    /// and weak-policy classifiers need.
    pub async fn enumerate_enabled_accounts(&mut self) -> Result<Vec<DirectoryAccount>> {
        let filter = format!(
            "(&(objectCategory=person)(objectClass=user)(!(userAccountControl:{}:=2)))",
            BIT_AND
        );
        let base = self.base_dn.clone();

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let mut search = self
            .ldap
            .streaming_search_with(
                adapters,
                &base,
                Scope::Subtree,
                &filter,
                vec![
                    "sAMAccountName",
                    "displayName",
                    "userAccountControl",
                    "lastLogonTimestamp",
                ],
            )
            .await
            .context("Failed to start account enumeration")?;

        let mut accounts = Vec::new();
        while let Some(entry) = search.next().await.context("Account enumeration failed")? {
            let entry = SearchEntry::construct(entry);
            if let Some(account) = Self::account_from_entry(&entry) {
                accounts.push(account);
            }
        }
        search
            .finish()
            .await
            .success()
            .context("Account enumeration did not complete successfully")?;
        Ok(accounts)
    }

    /// Recursive (nested-group-expanding) membership of a named group,
    /// restricted to user objects, returned as sAMAccountNames. Resolution
    /// happens server-side via the in-chain matching rule.
    pub async fn group_member_sams(&mut self, group_name: &str) -> Result<Vec<String>> {
        let group_dn = self
            .find_group_dn(group_name)
            .await
            .with_context(|| format!("Failed to locate group '{}'", group_name))?;

        let filter = format!(
            "(&(objectCategory=person)(objectClass=user)(memberOf:{}:={}))",
            IN_CHAIN,
            escape_ldap_filter(&group_dn)
        );
        let base = self.base_dn.clone();

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let mut search = self
            .ldap
            .streaming_search_with(
                adapters,
                &base,
                Scope::Subtree,
                &filter,
                vec!["sAMAccountName"],
            )
            .await
            .with_context(|| format!("Failed to start membership search for '{}'", group_name))?;

        let mut members = Vec::new();
        while let Some(entry) = search
            .next()
            .await
            .with_context(|| format!("Membership search for '{}' failed", group_name))?
        {
            let entry = SearchEntry::construct(entry);
            if let Some(sam) = Self::get_attr(&entry, "sAMAccountName") {
                members.push(sam);
            }
        }
        search
            .finish()
            .await
            .success()
            .with_context(|| format!("Membership search for '{}' did not complete", group_name))?;
        Ok(members)
    }

    /// Current attributes of a single account. `Ok(None)` means the account
    /// no longer exists (e.g. deleted between membership resolution and this
    /// lookup).
    pub async fn find_account(
        &mut self,
        sam_account_name: &str,
    ) -> Result<Option<DirectoryAccount>> {
        let filter = format!(
            "(&(objectCategory=person)(objectClass=user)(sAMAccountName={}))",
            escape_ldap_filter(sam_account_name)
        );
        let (rs, _res) = self
            .ldap
            .search(
                &self.base_dn,
                Scope::Subtree,
                &filter,
                vec![
                    "sAMAccountName",
                    "displayName",
                    "userAccountControl",
                    "lastLogonTimestamp",
                ],
            )
            .await
            .context("Failed to search for account")?
            .success()
            .context("Account search failed")?;

        Ok(rs
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .as_ref()
            .and_then(Self::account_from_entry))
    }

    async fn find_group_dn(&mut self, group_name: &str) -> Result<String> {
        let filter = format!(
            "(&(objectClass=group)(cn={}))",
            escape_ldap_filter(group_name)
        );
        let (rs, _res) = self
            .ldap
            .search(&self.base_dn, Scope::Subtree, &filter, vec!["cn"])
            .await
            .context("Failed to search for group")?
            .success()
            .context("Group search failed")?;

        let entry = rs.into_iter().next().context("Group not found")?;
        Ok(SearchEntry::construct(entry).dn)
    }

    fn account_from_entry(entry: &SearchEntry) -> Option<DirectoryAccount> {
        let sam = Self::get_attr(entry, "sAMAccountName")?;
        let mut account = DirectoryAccount::new(sam);
        account.display_name = Self::get_attr(entry, "displayName");
        if let Some(uac) =
            Self::get_attr(entry, "userAccountControl").and_then(|v| v.parse::<u32>().ok())
        {
            account.enabled = uac & UAC_ACCOUNT_DISABLED == 0;
            account.password_not_required = uac & UAC_PASSWD_NOTREQD != 0;
        }
        account.last_auth = parse_filetime(Self::get_attr(entry, "lastLogonTimestamp").as_deref());
        Some(account)
    }

    fn get_attr(entry: &SearchEntry, attr: &str) -> Option<String> {
        entry.attrs.get(attr).and_then(|v| v.first()).cloned()
    }

    /// Query rootDSE for the default and configuration naming contexts.
    async fn query_rootdse(ldap: &mut Ldap) -> Result<(String, Option<String>)> {
        let (rs, _res) = ldap
            .search(
                "",
                Scope::Base,
                "(objectClass=*)",
                vec!["defaultNamingContext", "configurationNamingContext"],
            )
            .await
            .context("Failed to query rootDSE")?
            .success()
            .context("rootDSE query failed")?;

        let entry = rs.into_iter().next().context("rootDSE entry not found")?;
        let entry = SearchEntry::construct(entry);

        let base_dn = Self::get_attr(&entry, "defaultNamingContext")
            .context("defaultNamingContext not found in rootDSE")?;
        let configuration_dn = Self::get_attr(&entry, "configurationNamingContext");
        Ok((base_dn, configuration_dn))
    }

    /// Fallback when rootDSE is not readable: assume the domain parts of the
    /// server FQDN after the hostname form the base DN.
    fn base_dn_from_server(server: &str) -> String {
        let parts: Vec<&str> = server.split('.').collect();
        let domain_parts = if parts.len() > 2 { &parts[1..] } else { &parts[..] };
        domain_parts
            .iter()
            .map(|p| format!("DC={}", p))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn domain_from_dn(dn: &str) -> String {
        dn.split(',')
            .filter_map(|part| {
                let part = part.trim();
                part.strip_prefix("DC=").or_else(|| part.strip_prefix("dc="))
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// RFC 4515 escaping for values substituted into search filters.
pub(crate) fn escape_ldap_filter(input: &str) -> String {
    input.chars().fold(String::new(), |mut acc, c| {
        match c {
            '*' => acc.push_str("\\2a"),
            '(' => acc.push_str("\\28"),
            ')' => acc.push_str("\\29"),
            '\\' => acc.push_str("\\5c"),
            '\0' => acc.push_str("\\00"),
            _ => acc.push(c),
        }
        acc
    })
}

/// Decode an AD FILETIME attribute (100-nanosecond intervals since
/// 1601-01-01). Zero is the directory's "never" sentinel; anything that does
/// not decode to a plausible instant is treated the same way.
fn parse_filetime(value: Option<&str>) -> Option<DateTime<Utc>> {
    let ticks = value?.parse::<i64>().ok()?;
    if ticks == 0 {
        return None;
    }
    let unix_ticks = ticks - 116_444_736_000_000_000;
    if unix_ticks < 0 {
        return None;
    }
    DateTime::from_timestamp(unix_ticks / 10_000_000, 0)
}
