use crate::phase::BuildPhase;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const MAX_LINE_WIDTH: usize = 80;

/// Operator-facing view of one monitoring session
pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(build_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("Monitoring build {}...", build_name));

        Self { progress_bar: pb }
    }

    /// Draws nothing; for tests and non-terminal use
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
        }
    }

    pub fn phase_changed(&self, elapsed: Duration, phase: BuildPhase) {
        let phase_str = match phase {
            BuildPhase::Complete => phase.as_str().green(),
            BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled => phase.as_str().red(),
            _ => phase.as_str().cyan(),
        };
        self.progress_bar
            .println(format!("[{}] Phase: {}", format_elapsed(elapsed), phase_str));
        self.progress_bar.set_message(format!("Phase: {}", phase));
    }

    pub fn log_line(&self, elapsed: Duration, step: Option<&str>, line: &str) {
        let line = truncate(line, MAX_LINE_WIDTH);
        let elapsed = format_elapsed(elapsed);
        match step {
            Some(step) => self
                .progress_bar
                .println(format!("[{}] [{}] {}", elapsed, step.cyan(), line)),
            None => self.progress_bar.println(format!("[{}] {}", elapsed, line)),
        }
    }

    pub fn finish_success(&self, image_ref: Option<&str>) {
        let message = match image_ref {
            Some(image) => format!("{} Build completed successfully\n  Image: {}", "✓".green(), image),
            None => format!("{} Build completed successfully", "✓".green()),
        };
        self.progress_bar.finish_with_message(message);
    }

    pub fn finish_error(&self, phase: BuildPhase, error: &str) {
        self.progress_bar.finish_with_message(format!(
            "{} Build failed with phase: {}\n  Error: {}",
            "✗".red(),
            phase,
            error
        ));
    }

    pub fn finish_timeout(&self, timeout: Duration) {
        self.progress_bar.finish_with_message(format!(
            "{} Build timed out after {} seconds",
            "✗".red(),
            timeout.as_secs()
        ));
    }

    pub fn finish_cancelled(&self) {
        self.progress_bar
            .finish_with_message(format!("{} Build monitoring cancelled by user", "!".yellow()));
    }
}

/// `mm:ss`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn truncate(line: &str, width: usize) -> &str {
    match line.char_indices().nth(width) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
