use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ad_health_report::shell::{ReportShell, ShellConfig, ShellError};

/// Console front-end for the report generator: runs one generation as a
/// child process, echoes its output as it arrives, and optionally opens the
/// finished report.
#[derive(Parser, Debug)]
#[clap(name = "ad-health-shell", version = "0.1.0")]
struct Args {
    /// Path to the report generator binary (defaults to ad-health-report
    /// next to this executable)
    #[arg(long)]
    generator: Option<PathBuf>,

    /// Output HTML file path, passed through to the generator
    #[arg(short = 'o', long, default_value = "ad-organization-report.html")]
    output: String,

    /// Generation timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Open the report in the default browser after generation
    #[arg(long)]
    open: bool,

    /// Arguments passed through to the generator (after --)
    #[arg(last = true)]
    generator_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let generator = match args.generator.clone() {
        Some(path) => path,
        None => default_generator_path()?,
    };

    let mut generator_args = vec!["--output".to_string(), args.output.clone()];
    generator_args.extend(args.generator_args.clone());

    let mut config = ShellConfig::new(generator, generator_args, PathBuf::from(&args.output));
    config.timeout = Duration::from_secs(args.timeout_secs);
    let shell = ReportShell::new(config);

    match shell.current_domain() {
        Some(domain) => info!("Current domain: {}", domain),
        None => info!("Current domain: not detected"),
    }

    info!("Generating report...");
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let echo = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{}", line);
        }
    });

    let result = shell.generate(tx).await;
    let _ = echo.await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(ShellError::Failed { code, output }) => {
            warn!("Generator failed with code {}", code);
            eprint!("{}", output);
            anyhow::bail!("report generation failed with exit code {}", code);
        }
        Err(e) => return Err(e).context("report generation failed"),
    };

    info!("Report saved: {}", outcome.output_path.display());

    if args.open {
        shell
            .open_report(&outcome.output_path)
            .context("failed to open report")?;
        info!("Report opened in default browser");
    }

    Ok(())
}

/// The generator normally sits next to this binary in the same target or
/// install directory.
fn default_generator_path() -> Result<PathBuf> {
    let mut path = std::env::current_exe().context("failed to locate current executable")?;
    path.pop();
    let name = if cfg!(windows) {
        "ad-health-report.exe"
    } else {
        "ad-health-report"
    };
    path.push(name);
    Ok(path)
}
