//! Failure classification and recovery decisions

use crate::monitor::interrupted;
use crate::phase::BuildPhase;
use colored::Colorize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::str::FromStr;
use std::sync::LazyLock;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DiskSpace,
    Network,
    PackageNotFound,
    DependencyConflict,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DiskSpace => "disk_space",
            ErrorKind::Network => "network",
            ErrorKind::PackageNotFound => "package_not_found",
            ErrorKind::DependencyConflict => "dependency_conflict",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Disk space needs a quota change outside this tool
    pub fn can_retry(self) -> bool {
        !matches!(self, ErrorKind::DiskSpace)
    }

    pub fn recovery(self) -> &'static str {
        match self {
            ErrorKind::DiskSpace => "Contact cluster administrator to increase build storage quota",
            ErrorKind::Network => "Check network connectivity and try again",
            ErrorKind::PackageNotFound => "Check package name spelling and version requirements",
            ErrorKind::DependencyConflict => {
                "Review package versions and resolve conflicts, or use pre-built image"
            }
            ErrorKind::Unknown => "Review build logs and try again or use pre-built image",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patterns per category, matched against lowercased logs. Order is
/// priority: the first category with a match wins.
const ERROR_PATTERNS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::DiskSpace,
        &[r"no space left", r"disk quota exceeded", r"insufficient space"],
    ),
    (
        ErrorKind::Network,
        &[
            r"connection refused",
            r"timeout",
            r"could not resolve",
            r"failed to fetch",
            r"network unreachable",
        ],
    ),
    (
        ErrorKind::PackageNotFound,
        &[
            r"could not find a version",
            r"no matching distribution",
            r"error: no such option",
            r"package.*not found",
        ],
    ),
    (
        ErrorKind::DependencyConflict,
        &[
            r"incompatible",
            r"requires.*but you have",
            r"conflict",
            r"cannot install",
        ],
    ),
];

static COMPILED_PATTERNS: LazyLock<Vec<(ErrorKind, Vec<Regex>)>> = LazyLock::new(|| {
    ERROR_PATTERNS
        .iter()
        .map(|(kind, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p).expect("error pattern is valid"))
                .collect();
            (*kind, compiled)
        })
        .collect()
});

/// Where pip names the missing package, most specific first
static PACKAGE_NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)satisfies the requirement\s+["']?([^\s"'(),;]+)"#,
        r#"(?i)no matching distribution found for\s+["']?([^\s"'(),;]+)"#,
        r#"(?i)package not found:\s*["']?([^\s"'(),;]+)"#,
        r#"(?i)package\s+["']([^"']+)["']\s+(?:was\s+)?not found"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("package name pattern is valid"))
    .collect()
});

const UNKNOWN_PACKAGE: &str = "unknown package";
const NO_LOGS_RECOVERY: &str = "Check cluster resources and try again";

/// Why a build failed and what to do about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub error_type: ErrorKind,
    pub message: String,
    pub recovery: String,
    pub can_retry: bool,
}

impl ErrorAnalysis {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_type: kind,
            message: message.into(),
            recovery: kind.recovery().to_string(),
            can_retry: kind.can_retry(),
        }
    }

    /// Same analysis with retrying ruled out
    pub fn without_retry(mut self) -> Self {
        self.can_retry = false;
        self
    }
}

/// Categorize a failed build from its logs.
///
/// Pure: the same `(logs, phase)` always gives the same analysis.
pub fn classify(logs: &str, phase: BuildPhase) -> ErrorAnalysis {
    if logs.trim().is_empty() {
        let mut analysis = ErrorAnalysis::new(
            ErrorKind::Unknown,
            format!("Build failed with phase: {}", phase),
        );
        analysis.recovery = NO_LOGS_RECOVERY.to_string();
        return analysis;
    }

    let lower = logs.to_lowercase();
    let kind = COMPILED_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(&lower)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown);

    match kind {
        ErrorKind::DiskSpace => {
            ErrorAnalysis::new(kind, "Build failed due to insufficient disk space")
        }
        ErrorKind::Network => ErrorAnalysis::new(
            kind,
            "Build failed due to network issues (timeout or connection failure)",
        ),
        ErrorKind::PackageNotFound => ErrorAnalysis::new(
            kind,
            format!("Package not found: {}", extract_package_name(logs)),
        ),
        ErrorKind::DependencyConflict => {
            ErrorAnalysis::new(kind, "Dependency conflict between packages")
        }
        ErrorKind::Unknown => ErrorAnalysis::new(kind, "Build failed for unknown reason"),
    }
}

/// Best-effort name of the package pip could not find
pub fn extract_package_name(logs: &str) -> String {
    PACKAGE_NAME_PATTERNS
        .iter()
        .find_map(|re| re.captures(logs))
        .map(|caps| caps[1].trim_end_matches(['.', ':']).to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_PACKAGE.to_string())
}

/// What to do after a failed build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    UsePrebuilt,
    Abort,
}

impl RecoveryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::UsePrebuilt => "use_prebuilt",
            RecoveryAction::Abort => "abort",
        }
    }

    /// Menu text shown to the operator
    pub fn label(self) -> &'static str {
        match self {
            RecoveryAction::Retry => "Retry build",
            RecoveryAction::UsePrebuilt => "Use a pre-built image instead",
            RecoveryAction::Abort => "Exit and resolve manually",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "retry" => Ok(RecoveryAction::Retry),
            "use_prebuilt" | "prebuilt" => Ok(RecoveryAction::UsePrebuilt),
            "abort" | "exit" => Ok(RecoveryAction::Abort),
            other => Err(format!(
                "unknown recovery action '{}' (expected retry, use_prebuilt or abort)",
                other
            )),
        }
    }
}

/// Actions that make sense for `analysis`, in menu order
pub fn offered_actions(analysis: &ErrorAnalysis) -> &'static [RecoveryAction] {
    if analysis.can_retry {
        &[
            RecoveryAction::Retry,
            RecoveryAction::UsePrebuilt,
            RecoveryAction::Abort,
        ]
    } else {
        &[RecoveryAction::UsePrebuilt, RecoveryAction::Abort]
    }
}

/// Source of operator answers
pub trait Prompt {
    /// One line of input, or `None` on end of input / interrupt
    fn ask(&mut self, question: &str) -> Option<String>;

    /// Show a line to the operator
    fn say(&mut self, message: &str) {
        println!("{}", message);
    }
}

/// Reads answers from the terminal
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> Option<String> {
        print!("{}", question);
        std::io::stdout().flush().ok()?;

        let mut input = String::new();
        match std::io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input),
        }
    }
}

/// How the recovery action is chosen
pub enum RecoveryPolicy {
    /// Ask the operator
    Interactive(Box<dyn Prompt + Send>),
    /// Never ask; use `default` when it is on offer
    NonInteractive { default: RecoveryAction },
}

impl RecoveryPolicy {
    pub fn interactive() -> Self {
        RecoveryPolicy::Interactive(Box::new(StdinPrompt))
    }

    pub fn non_interactive(default: RecoveryAction) -> Self {
        RecoveryPolicy::NonInteractive { default }
    }

    /// Choose an action; Ctrl-C at the prompt aborts
    pub async fn decide(&mut self, analysis: &ErrorAnalysis) -> RecoveryAction {
        self.decide_until(analysis, interrupted()).await
    }

    /// Like [`RecoveryPolicy::decide`], with `cancel` ending the prompt
    /// as Abort.
    ///
    /// The prompt blocks on terminal input, so it runs on its own thread
    /// and the policy waits for whichever of the answer or `cancel` comes
    /// first. An interrupted prompt is not asked again.
    pub async fn decide_until<F>(
        &mut self,
        analysis: &ErrorAnalysis,
        cancel: F,
    ) -> RecoveryAction
    where
        F: Future<Output = ()>,
    {
        let offered = offered_actions(analysis);

        match self {
            RecoveryPolicy::NonInteractive { default } => {
                if offered.contains(default) {
                    *default
                } else if offered.contains(&RecoveryAction::UsePrebuilt) {
                    RecoveryAction::UsePrebuilt
                } else {
                    RecoveryAction::Abort
                }
            }
            RecoveryPolicy::Interactive(prompt) => {
                let mut asking = std::mem::replace(prompt, Box::new(ClosedPrompt));
                let analysis = analysis.clone();
                let (answer_tx, answer_rx) = oneshot::channel();

                std::thread::spawn(move || {
                    let action = ask_for_action(asking.as_mut(), &analysis, offered);
                    let _ = answer_tx.send((asking, action));
                });

                tokio::select! {
                    answered = answer_rx => match answered {
                        Ok((asked, action)) => {
                            *prompt = asked;
                            action
                        }
                        Err(_) => {
                            tracing::warn!("Recovery prompt ended without an answer");
                            RecoveryAction::Abort
                        }
                    },
                    _ = cancel => {
                        println!();
                        tracing::warn!("Interrupted at the recovery prompt");
                        RecoveryAction::Abort
                    }
                }
            }
        }
    }
}

/// Stands in for a prompt whose thread was abandoned
struct ClosedPrompt;

impl Prompt for ClosedPrompt {
    fn ask(&mut self, _question: &str) -> Option<String> {
        None
    }

    fn say(&mut self, _message: &str) {}
}

fn ask_for_action(
    prompt: &mut dyn Prompt,
    analysis: &ErrorAnalysis,
    offered: &[RecoveryAction],
) -> RecoveryAction {
    if !analysis.can_retry {
        prompt.say("This error cannot be automatically resolved.");
    }
    prompt.say("");
    prompt.say("Options:");
    for (i, action) in offered.iter().enumerate() {
        prompt.say(&format!("  {}. {}", i + 1, action.label()));
    }
    prompt.say("");

    let question = format!("Enter choice [1-{}]: ", offered.len());
    loop {
        let Some(answer) = prompt.ask(&question) else {
            return RecoveryAction::Abort;
        };

        let choice = answer
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| offered.get(i));

        match choice {
            Some(action) => return *action,
            None => prompt.say(&format!("Please enter a number from 1 to {}", offered.len())),
        }
    }
}

/// Print the failure summary shown before asking for an action
pub fn print_failure_report(build_name: &str, analysis: &ErrorAnalysis) {
    println!();
    println!("{}", "=".repeat(60));
    println!("{} {}", "BUILD FAILED:".red().bold(), build_name);
    println!("{}", "=".repeat(60));
    println!("Error Type: {}", analysis.error_type.as_str().yellow());
    println!("Message:    {}", analysis.message);
    println!("Recovery:   {}", analysis.recovery.cyan());
}
