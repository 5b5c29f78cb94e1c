use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::windows_auth::WindowsAuth;

#[derive(Debug, Error)]
pub enum ShellError {
    /// Only one generation may run per shell; both children would write the
    /// same output file.
    #[error("a report generation is already in progress")]
    Busy,

    #[error("report generation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed to launch report generator: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to wait for report generator: {0}")]
    Wait(#[source] std::io::Error),

    #[error("report generator exited with code {code}")]
    Failed { code: i32, output: String },

    #[error("failed to open report: {0}")]
    Open(#[source] std::io::Error),
}

/// Result of a successful generation: where the report landed, plus the
/// combined output text captured from the child.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub output_path: PathBuf,
    pub combined_output: String,
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Path to the report generator binary.
    pub program: PathBuf,
    /// Arguments passed through to the generator.
    pub args: Vec<String>,
    /// Where the generator writes the report (last writer wins).
    pub output_path: PathBuf,
    pub timeout: Duration,
}

impl ShellConfig {
    pub fn new(program: PathBuf, args: Vec<String>, output_path: PathBuf) -> Self {
        Self {
            program,
            args,
            output_path,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Process wrapper around the report generator: spawns one child per
/// generation, streams its stdout/stderr line by line, and enforces
/// single-flight and a timeout.
pub struct ReportShell {
    config: ShellConfig,
    in_flight: Arc<Semaphore>,
}

impl ReportShell {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    /// Domain of the logged-on user, when the platform exposes one.
    pub fn current_domain(&self) -> Option<String> {
        WindowsAuth::get_current_domain()
    }

    /// Run one generation. Output lines are delivered on `lines` as they
    /// arrive (ordering preserved per stream) and captured into the
    /// returned outcome. A second call while one is in flight fails fast
    /// with [`ShellError::Busy`].
    pub async fn generate(
        &self,
        lines: mpsc::Sender<String>,
    ) -> Result<GenerationOutcome, ShellError> {
        let _permit = self
            .in_flight
            .try_acquire()
            .map_err(|_| ShellError::Busy)?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(program = %self.config.program.display(), "spawning report generator");
        let started = std::time::Instant::now();
        let mut child = cmd.spawn().map_err(ShellError::Spawn)?;

        let captured = Arc::new(Mutex::new(String::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, lines.clone(), Arc::clone(&captured)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, lines.clone(), Arc::clone(&captured)));

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Err(_elapsed) => {
                warn!("report generation exceeded {:?}, killing child", self.config.timeout);
                let _ = child.kill().await;
                return Err(ShellError::TimedOut(self.config.timeout));
            }
            Ok(result) => result.map_err(ShellError::Wait)?,
        };

        // Drain both streams before reporting the outcome, bounded by the
        // unused portion of the timeout budget. A receiver that stopped
        // draining must not wedge the shell once the child is gone.
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let mut task = task;
            let drain_budget = self.config.timeout.saturating_sub(started.elapsed());
            if tokio::time::timeout(drain_budget, &mut task).await.is_err() {
                warn!("output reader still blocked after child exit, abandoning it");
                task.abort();
            }
        }

        let combined_output = captured.lock().map(|s| s.clone()).unwrap_or_default();

        if status.success() {
            Ok(GenerationOutcome {
                output_path: self.config.output_path.clone(),
                combined_output,
            })
        } else {
            Err(ShellError::Failed {
                code: status.code().unwrap_or(-1),
                output: combined_output,
            })
        }
    }

    /// Open a finished report with the platform default handler.
    pub fn open_report(&self, path: &Path) -> Result<(), ShellError> {
        open::that(path).map_err(ShellError::Open)
    }
}

fn spawn_line_reader<R>(
    stream: R,
    lines: mpsc::Sender<String>,
    captured: Arc<Mutex<String>>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if let Ok(mut buf) = captured.lock() {
                buf.push_str(&line);
                buf.push('\n');
            }
            // Receiver gone means nobody is watching; keep capturing anyway.
            let _ = lines.send(line).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_shell(script: &str, timeout: Duration) -> ReportShell {
        let mut config = ShellConfig::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), script.to_string()],
            PathBuf::from("report.html"),
        );
        config.timeout = timeout;
        ReportShell::new(config)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_and_captures_output_lines() {
        let shell = sh_shell("printf 'first\\nsecond\\n'", Duration::from_secs(10));
        let (tx, mut rx) = mpsc::channel(64);

        let outcome = shell.generate(tx).await.unwrap();
        assert!(outcome.combined_output.contains("first"));
        assert!(outcome.combined_output.contains("second"));
        assert_eq!(outcome.output_path, PathBuf::from("report.html"));

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_failure_with_code_and_output() {
        let shell = sh_shell("echo broken; exit 3", Duration::from_secs(10));
        let (tx, _rx) = mpsc::channel(64);

        match shell.generate(tx).await {
            Err(ShellError::Failed { code, output }) => {
                assert_eq!(code, 3);
                assert!(output.contains("broken"));
            }
            other => panic!("expected Failed, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_child_times_out_with_distinct_error() {
        let shell = sh_shell("sleep 30", Duration::from_millis(100));
        let (tx, _rx) = mpsc::channel(64);

        match shell.generate(tx).await {
            Err(ShellError::TimedOut(d)) => assert_eq!(d, Duration::from_millis(100)),
            other => panic!("expected TimedOut, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_generation_while_in_flight_is_rejected() {
        let shell = Arc::new(sh_shell("sleep 2", Duration::from_secs(10)));
        let (tx, _rx) = mpsc::channel(64);

        let first = {
            let shell = Arc::clone(&shell);
            tokio::spawn(async move { shell.generate(tx).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (tx2, _rx2) = mpsc::channel(64);
        match shell.generate(tx2).await {
            Err(ShellError::Busy) => {}
            other => panic!("expected Busy, got {:?}", other.map(|_| ())),
        }
        first.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn undrained_receiver_does_not_wedge_generation() {
        let shell = sh_shell(
            "i=0; while [ $i -lt 64 ]; do echo line$i; i=$((i+1)); done",
            Duration::from_secs(2),
        );
        // Capacity 1 and no draining: the reader blocks on send after the
        // first line while the receiver stays alive.
        let (tx, rx) = mpsc::channel(1);

        let outcome = shell.generate(tx).await.unwrap();
        drop(rx);

        assert!(outcome.combined_output.contains("line0"));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let shell = ReportShell::new(ShellConfig::new(
            PathBuf::from("definitely-not-a-real-binary-4242"),
            Vec::new(),
            PathBuf::from("report.html"),
        ));
        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            shell.generate(tx).await,
            Err(ShellError::Spawn(_))
        ));
    }
}
