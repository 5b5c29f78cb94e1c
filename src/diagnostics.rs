use anyhow::Result;
use tracing::{error, info, warn};

/// Preflight checks for the directory connection, used by `--diagnose` to
/// explain "directory service unavailable" failures before a run.
pub struct Diagnostics;

impl Diagnostics {
    pub fn run_preflight_checks(server: &str) -> Result<()> {
        info!("Running directory connection preflight checks...");

        Self::check_platform();
        #[cfg(windows)]
        Self::check_domain_joined();
        Self::check_server_fqdn(server);
        Self::check_network_connectivity(server);

        info!("Preflight checks completed.");
        Ok(())
    }

    fn check_platform() {
        #[cfg(windows)]
        info!("Platform: Windows - GSSAPI/Kerberos available");
        #[cfg(not(windows))]
        {
            info!("Platform: non-Windows - GSSAPI/Kerberos not available");
            info!("Use explicit credentials (-u, -p) against the domain controller");
        }
    }

    #[cfg(windows)]
    fn check_domain_joined() {
        match (std::env::var("USERDOMAIN"), std::env::var("USERDNSDOMAIN")) {
            (Ok(domain), Ok(dns_domain)) => {
                info!("Domain membership: {} ({})", domain, dns_domain);
            }
            _ => {
                warn!("Unable to detect domain membership");
                warn!("Integrated authentication requires a domain-joined machine");
            }
        }
    }

    fn check_server_fqdn(server: &str) {
        info!("Server: {}", server);
        if server.chars().all(|c| c.is_ascii_digit() || c == '.') {
            error!("Server looks like an IP address; GSSAPI requires the FQDN");
        } else if !server.contains('.') {
            warn!("Server is not fully qualified; GSSAPI requires an FQDN");
            warn!("Example: dc01.corp.example.com, not dc01");
        }
    }

    /// Resolve the server and confirm the LDAP port is at least addressable.
    fn check_network_connectivity(server: &str) {
        match std::net::ToSocketAddrs::to_socket_addrs(&format!("{}:389", server)) {
            Ok(addrs) => {
                let addrs: Vec<_> = addrs.collect();
                if let Some(addr) = addrs.first() {
                    info!("Server resolved: {} -> {}", server, addr.ip());
                } else {
                    warn!("Server name resolved to no addresses: {}", server);
                }
            }
            Err(_) => {
                warn!("Could not resolve server: {}", server);
                warn!("Check DNS configuration (nslookup {})", server);
            }
        }
    }

    pub fn show_auth_info() {
        info!("Authentication options:");
        #[cfg(all(windows, feature = "gssapi"))]
        info!("  GSSAPI/Kerberos: available (--use-gssapi, no password required)");
        #[cfg(not(all(windows, feature = "gssapi")))]
        info!("  GSSAPI/Kerberos: not available on this build/platform");
        info!("  Simple bind: always available (--username / --password)");
    }
}
