//! Build progress monitoring
//!
//! One cooperative loop per build: every iteration checks the deadline,
//! queries the phase, takes at most one line from the log stream, then
//! sleeps. The phase alone decides when monitoring ends; the log stream is
//! only shown to the operator. Once a terminal phase is seen the stream is
//! stopped and the complete log is fetched in one call.
//!
//! Every service call is raced against the deadline and the cancel signal,
//! so a hung `oc` invocation cannot outlive the timeout.

use crate::error::Result;
use crate::phase::BuildPhase;
use crate::progress::BuildProgress;
use crate::service::{BuildService, TailSession};
use regex::Regex;
use serde::Serialize;
use futures_util::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum time allowed for the log fetch once a terminal phase is seen
const LOG_FETCH_GRACE: Duration = Duration::from_secs(30);

/// Log lines worth showing while the build runs
const PROGRESS_KEYWORDS: &[&str] = &[
    "Step ",
    "Successfully built",
    "Pushing image",
    "Push successful",
];

/// Fallback hints when no explicit error line exists
const FAILURE_HINTS: &[&str] = &[
    "could not find",
    "no matching distribution",
    "failed to",
    "connection refused",
    "timeout",
];

const GENERIC_FAILURE: &str = "Build failed (see logs for details)";

static STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Step (\d+)/(\d+)").expect("step pattern is valid"));

static PUSHED_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Successfully pushed (\S+@sha256:\S+)").expect("push pattern is valid")
});

/// Terminal outcome of one monitoring session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    pub success: bool,
    pub image_ref: Option<String>,
    pub phase: BuildPhase,
    pub logs: Option<String>,
    pub error: Option<String>,
}

impl BuildResult {
    fn completed(logs: String) -> Self {
        Self {
            success: true,
            image_ref: extract_image_reference(&logs),
            phase: BuildPhase::Complete,
            logs: Some(logs),
            error: None,
        }
    }

    fn failed(phase: BuildPhase, logs: String) -> Self {
        Self {
            success: false,
            image_ref: None,
            phase,
            error: Some(extract_error_line(&logs)),
            logs: Some(logs),
        }
    }

    fn timed_out(timeout: Duration) -> Self {
        Self {
            success: false,
            image_ref: None,
            phase: BuildPhase::Timeout,
            logs: None,
            error: Some(format!("Build timed out after {} seconds", timeout.as_secs())),
        }
    }

    fn cancelled() -> Self {
        Self {
            success: false,
            image_ref: None,
            phase: BuildPhase::Cancelled,
            logs: None,
            error: Some("Cancelled by user".to_string()),
        }
    }
}

/// Watches build instances through a [`BuildService`]
pub struct BuildMonitor<'a> {
    service: &'a dyn BuildService,
    poll_interval: Duration,
    progress: Option<BuildProgress>,
}

impl<'a> BuildMonitor<'a> {
    pub fn new(service: &'a dyn BuildService) -> Self {
        Self {
            service,
            poll_interval: DEFAULT_POLL_INTERVAL,
            progress: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Use a specific progress view instead of a terminal spinner
    pub fn with_progress(mut self, progress: BuildProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Monitor until a terminal phase, the timeout, or Ctrl-C
    pub async fn monitor(&self, build_name: &str, timeout: Duration) -> Result<BuildResult> {
        self.monitor_until(build_name, timeout, interrupted()).await
    }

    /// Monitor until a terminal phase, the timeout, or `cancel` resolves.
    ///
    /// Only fails if the log stream cannot be started. The log stream is
    /// stopped before any result is returned.
    pub async fn monitor_until<F>(
        &self,
        build_name: &str,
        timeout: Duration,
        cancel: F,
    ) -> Result<BuildResult>
    where
        F: Future<Output = ()>,
    {
        let fallback_progress;
        let progress = match &self.progress {
            Some(progress) => progress,
            None => {
                fallback_progress = BuildProgress::new(build_name);
                &fallback_progress
            }
        };

        tracing::info!(
            "Monitoring build {} (timeout {}s)",
            build_name,
            timeout.as_secs()
        );

        // Poll once so a Ctrl-C listener exists before anything blocks
        tokio::pin!(cancel);
        if cancel.as_mut().now_or_never().is_some() {
            tracing::warn!("Monitoring of {} cancelled before it started", build_name);
            progress.finish_cancelled();
            return Ok(BuildResult::cancelled());
        }

        let mut tail = TailSession::new(self.service.follow_logs(build_name).await?);

        let started = Instant::now();
        let deadline = started + timeout;
        let mut last_phase: Option<BuildPhase> = None;
        let mut tracker = LogTracker::default();

        loop {
            let elapsed = started.elapsed();
            if elapsed > timeout {
                return Ok(stop(&mut tail, progress, build_name, timeout, Stop::Deadline).await);
            }

            let queried = bounded(self.service.phase(build_name), deadline, cancel.as_mut()).await;
            let phase = match queried {
                Ok(Ok(phase)) => phase,
                Ok(Err(e)) => {
                    tracing::warn!("Phase query for {} failed: {}", build_name, e);
                    BuildPhase::Unknown
                }
                Err(reason) => {
                    return Ok(stop(&mut tail, progress, build_name, timeout, reason).await);
                }
            };

            if last_phase != Some(phase) {
                tracing::info!("Build {} phase: {}", build_name, phase);
                progress.phase_changed(elapsed, phase);
                last_phase = Some(phase);
            }

            if phase.is_terminal() {
                tail.close().await;
                let fetch_deadline = deadline.max(Instant::now() + LOG_FETCH_GRACE);
                let result = self
                    .finish(build_name, phase, fetch_deadline, cancel.as_mut())
                    .await;
                match &result.error {
                    Some(error) => progress.finish_error(phase, error),
                    None => progress.finish_success(result.image_ref.as_deref()),
                }
                return Ok(result);
            }

            if let Some(line) = tail.try_next_line() {
                if let Some(event) = tracker.observe(&line) {
                    progress.log_line(elapsed, event.step.as_deref(), &event.line);
                }
            }

            let slept = bounded(sleep(self.poll_interval), deadline, cancel.as_mut()).await;
            if let Err(reason) = slept {
                return Ok(stop(&mut tail, progress, build_name, timeout, reason).await);
            }
        }
    }

    async fn finish<F>(
        &self,
        build_name: &str,
        phase: BuildPhase,
        deadline: Instant,
        cancel: Pin<&mut F>,
    ) -> BuildResult
    where
        F: Future<Output = ()>,
    {
        let logs = match bounded(self.service.logs(build_name), deadline, cancel).await {
            Ok(Ok(logs)) => logs,
            Ok(Err(e)) => {
                tracing::warn!("Could not fetch logs for {}: {}", build_name, e);
                String::new()
            }
            Err(reason) => {
                tracing::warn!("Log fetch for {} stopped: {}", build_name, reason);
                String::new()
            }
        };

        if phase == BuildPhase::Complete {
            BuildResult::completed(logs)
        } else {
            BuildResult::failed(phase, logs)
        }
    }
}

/// Why a bounded service call did not finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Deadline,
    Cancelled,
}

impl std::fmt::Display for Stop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stop::Deadline => f.write_str("deadline passed"),
            Stop::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Run `work` until it finishes, `deadline` passes, or `cancel` resolves
async fn bounded<T, F>(
    work: impl Future<Output = T>,
    deadline: Instant,
    cancel: Pin<&mut F>,
) -> std::result::Result<T, Stop>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        output = timeout_at(deadline, work) => output.map_err(|_| Stop::Deadline),
        _ = cancel => Err(Stop::Cancelled),
    }
}

async fn stop(
    tail: &mut TailSession,
    progress: &BuildProgress,
    build_name: &str,
    timeout: Duration,
    reason: Stop,
) -> BuildResult {
    tail.close().await;
    match reason {
        Stop::Deadline => {
            tracing::warn!("Build {} timed out after {}s", build_name, timeout.as_secs());
            progress.finish_timeout(timeout);
            BuildResult::timed_out(timeout)
        }
        Stop::Cancelled => {
            tracing::warn!("Monitoring of {} cancelled", build_name);
            progress.finish_cancelled();
            BuildResult::cancelled()
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
pub(crate) async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::debug!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

/// A log line selected for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub step: Option<String>,
    pub line: String,
}

/// Filters the streamed log down to progress events
#[derive(Debug, Default)]
pub struct LogTracker {
    last_line: Option<String>,
    current_step: Option<String>,
}

impl LogTracker {
    pub fn observe(&mut self, raw: &str) -> Option<LogEvent> {
        let line = raw.trim_end();
        if line.is_empty() || self.last_line.as_deref() == Some(line) {
            return None;
        }
        self.last_line = Some(line.to_string());

        if let Some((current, total)) = parse_step(line) {
            self.current_step = Some(format!("{}/{}", current, total));
        }

        if !PROGRESS_KEYWORDS.iter().any(|k| line.contains(k)) {
            return None;
        }

        Some(LogEvent {
            step: self.current_step.clone(),
            line: line.to_string(),
        })
    }
}

/// `Step 5/12: RUN pip install ...` -> `(5, 12)`
pub fn parse_step(line: &str) -> Option<(u32, u32)> {
    let caps = STEP_RE.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Image reference from the registry push confirmation
pub fn extract_image_reference(logs: &str) -> Option<String> {
    PUSHED_IMAGE_RE
        .captures(logs)
        .map(|caps| caps[1].to_string())
}

/// Best single line explaining a failed build. Never empty.
pub fn extract_error_line(logs: &str) -> String {
    let lines: Vec<&str> = logs.lines().collect();

    let explicit = lines.iter().rev().find(|line| {
        line.contains("ERROR:") || line.to_lowercase().contains("error:")
    });
    let hinted = || {
        lines.iter().rev().find(|line| {
            let lower = line.to_lowercase();
            FAILURE_HINTS.iter().any(|hint| lower.contains(hint))
        })
    };

    explicit
        .or_else(hinted)
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .unwrap_or(GENERIC_FAILURE)
        .to_string()
}
