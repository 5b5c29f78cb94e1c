use anyhow::{Context, Result};
use clap::Parser;
use rpassword::prompt_password;
use tracing::{debug, info, warn};

mod classifier;
mod collector;
mod diagnostics;
mod html_generator;
mod ldap_client;
mod models;
mod report_data;
mod windows_auth;

use collector::CollectorOptions;
use diagnostics::Diagnostics;
use html_generator::HtmlGenerator;
use ldap_client::LdapClient;
use windows_auth::{should_use_gssapi, WindowsAuth};

#[derive(Parser, Debug)]
#[clap(
    name = "ad-health-report",
    version = "0.1.0",
    about = "Generate a self-contained HTML health report for an Active Directory domain",
    long_about = None
)]
struct Args {
    /// LDAP/AD server hostname or IP address (auto-detected on Windows if not provided)
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Username for LDAP authentication (e.g., "DOMAIN\\username" or "username@domain.com")
    /// Optional when using Windows authentication
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Password for LDAP authentication (will prompt if not provided)
    #[arg(short = 'p', long, hide = true)]
    password: Option<String>,

    /// Domain name shown in the report (derived from the directory if not provided)
    #[arg(short = 'd', long)]
    domain: Option<String>,

    /// Output HTML file path
    #[arg(short = 'o', long, default_value = "ad-organization-report.html")]
    output: String,

    /// Staleness threshold in days for the last-authentication scan
    #[arg(long, default_value_t = classifier::DEFAULT_STALE_THRESHOLD_DAYS)]
    stale_threshold_days: i64,

    /// Use TLS for LDAP connection
    #[arg(long, default_value = "true")]
    use_tls: bool,

    /// Use Kerberos/GSSAPI authentication (Windows integrated, no password required)
    /// Only works on domain-joined Windows machines
    #[arg(long)]
    use_gssapi: bool,

    /// Run directory connection diagnostics and exit
    #[arg(long)]
    diagnose: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    info!("Starting Active Directory health report generation");

    // Determine server (directory module unavailable without one)
    let server = match args.server.clone().or_else(WindowsAuth::get_default_ldap_server) {
        Some(server) => server,
        None => anyhow::bail!(
            "LDAP server must be provided with --server when not on a Windows domain"
        ),
    };

    // Handle diagnostics request
    if args.diagnose {
        Diagnostics::run_preflight_checks(&server)?;
        Diagnostics::show_auth_info();
        return Ok(());
    }

    info!("Server: {}", server);

    let mut client = authenticate(&server, &args).await?;

    let options = CollectorOptions {
        stale_threshold_days: args.stale_threshold_days,
        domain_override: args.domain.clone(),
    };

    let data = collector::collect_report(&mut client, &options).await?;

    debug!("Rendering HTML report...");
    let html = HtmlGenerator::new().generate_report(&data)?;
    std::fs::write(&args.output, html)
        .with_context(|| format!("Failed to write report file: {}", args.output))?;

    info!("");
    info!("=== Report Summary ===");
    info!("Domain: {}", data.domain_name());
    info!(
        "Users: {} enabled / {} disabled",
        data.metrics.enabled_users, data.metrics.disabled_users
    );
    info!(
        "Privileged accounts: {} enabled / {} disabled",
        data.metrics.enabled_privileged, data.metrics.disabled_privileged
    );
    info!(
        "Stale accounts (>{} days): {}",
        args.stale_threshold_days, data.metrics.stale_count
    );
    info!("Password-not-required accounts: {}", data.metrics.weak_policy_count);
    if !data.warnings.is_empty() {
        warn!(
            "{} metric(s) degraded during collection; see the report's warning section",
            data.warnings.len()
        );
    }
    info!("Report saved: {}", args.output);

    Ok(())
}

/// Connect and bind, preferring GSSAPI when requested and available.
async fn authenticate(server: &str, args: &Args) -> Result<LdapClient> {
    if should_use_gssapi(args.use_gssapi) {
        info!("GSSAPI authentication requested");

        let server_fqdn = WindowsAuth::validate_server_dns(server)
            .context("Invalid server FQDN for GSSAPI authentication")?;

        let (domain, username) = WindowsAuth::get_current_user()
            .context("Failed to get current user information")?;
        info!("Current user: {}\\{}", domain, username);

        debug!("Connecting to LDAP server...");
        let mut client = LdapClient::connect(server, args.use_tls)
            .await
            .context("Failed to connect to LDAP server")?;
        info!("Connected to LDAP server");

        debug!("Attempting GSSAPI bind to: {}", server_fqdn);
        client
            .bind_gssapi(&server_fqdn)
            .await
            .context("GSSAPI authentication failed. Run with --diagnose for troubleshooting help")?;
        info!("Successfully authenticated with Kerberos/GSSAPI");

        Ok(client)
    } else {
        let username = args
            .username
            .clone()
            .context("Either --use-gssapi or --username must be provided")?;
        let password = match args.password.clone() {
            Some(p) => p,
            None => prompt_password(format!("Enter password for {}: ", username))
                .context("Failed to read password")?,
        };

        debug!("Connecting to LDAP server...");
        let mut client = LdapClient::connect(server, args.use_tls)
            .await
            .context("Failed to connect to LDAP server")?;
        info!("Connected to LDAP server");

        debug!("Authenticating with simple bind...");
        client
            .bind_simple(&username, &password)
            .await
            .context("Failed to authenticate with LDAP")?;
        info!("Successfully authenticated");

        Ok(client)
    }
}
