use anyhow::{Context, Result};

/// Helpers for Windows integrated (Kerberos/GSSAPI) authentication and for
/// discovering the ambient domain environment from the session.
pub struct WindowsAuth;

impl WindowsAuth {
    /// Whether integrated authentication can work here at all: a Windows
    /// session with a logged-on domain user.
    pub fn is_available() -> bool {
        #[cfg(windows)]
        {
            std::env::var("USERDOMAIN").is_ok() && std::env::var("USERNAME").is_ok()
        }
        #[cfg(not(windows))]
        {
            false
        }
    }

    /// (domain, username) of the logged-on user.
    pub fn get_current_user() -> Result<(String, String)> {
        #[cfg(windows)]
        {
            let username = std::env::var("USERNAME")
                .context("Failed to get current username from environment")?;
            let domain = std::env::var("USERDOMAIN")
                .context("Failed to get current user domain from environment")?;
            Ok((domain, username))
        }
        #[cfg(not(windows))]
        {
            Err(anyhow::anyhow!(
                "Kerberos integrated authentication is only available on Windows platforms"
            ))
        }
    }

    /// Domain of the logged-on user, if any.
    pub fn get_current_domain() -> Option<String> {
        #[cfg(windows)]
        {
            std::env::var("USERDNSDOMAIN")
                .or_else(|_| std::env::var("USERDOMAIN"))
                .ok()
        }
        #[cfg(not(windows))]
        {
            None
        }
    }

    /// Best-guess LDAP server from the session environment: the logon
    /// domain controller, falling back to the DNS domain itself.
    pub fn get_default_ldap_server() -> Option<String> {
        #[cfg(windows)]
        {
            std::env::var("LOGONSERVER")
                .ok()
                .map(|server| server.trim_start_matches("\\\\").to_string())
                .or_else(|| std::env::var("USERDNSDOMAIN").ok())
        }
        #[cfg(not(windows))]
        {
            None
        }
    }

    /// GSSAPI needs the server's FQDN; short hostnames and IP addresses
    /// cannot be matched to a service principal.
    pub fn validate_server_dns(server: &str) -> Result<String> {
        if server.contains('.') && !server.chars().all(|c| c.is_ascii_digit() || c == '.') {
            Ok(server.to_string())
        } else {
            Err(anyhow::anyhow!(
                "Server '{}' is not a fully qualified domain name (FQDN). \
                 GSSAPI authentication requires the server's FQDN \
                 (e.g. 'dc01.corp.example.com'), not a short hostname or IP address.",
                server
            ))
        }
    }
}

/// GSSAPI is used only when explicitly requested and the platform supports it.
pub fn should_use_gssapi(use_gssapi_flag: bool) -> bool {
    use_gssapi_flag && WindowsAuth::is_available()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqdn_validation_accepts_dotted_hostnames() {
        assert!(WindowsAuth::validate_server_dns("dc01.corp.example.com").is_ok());
    }

    #[test]
    fn fqdn_validation_rejects_short_names_and_ips() {
        assert!(WindowsAuth::validate_server_dns("dc01").is_err());
        assert!(WindowsAuth::validate_server_dns("192.168.1.10").is_err());
    }

    #[cfg(not(windows))]
    #[test]
    fn gssapi_never_selected_off_windows() {
        assert!(!should_use_gssapi(true));
        assert!(!should_use_gssapi(false));
    }
}
