//! oc CLI wrapper
//!
//! Wraps the OpenShift `oc` commands used to submit and supervise builds.

use crate::definition::BuildDefinition;
use crate::error::{BuildError, Result};
use crate::phase::BuildPhase;
use crate::service::{BuildService, LogTail};
use async_trait::async_trait;
use futures_util::FutureExt;
use regex::Regex;
use serde::Deserialize;
use std::io::Write;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

pub const DEFAULT_OC_BINARY: &str = "oc";

static BUILDCONFIG_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"buildconfig\.build\.openshift\.io/(\S+)").expect("buildconfig pattern is valid")
});

static BUILD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"build\.build\.openshift\.io/(\S+)").expect("build pattern is valid")
});

/// oc CLI wrapper bound to one namespace
#[derive(Debug, Clone)]
pub struct OcClient {
    program: String,
    leading_args: Vec<String>,
    namespace: String,
}

impl OcClient {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            program: DEFAULT_OC_BINARY.to_string(),
            leading_args: Vec::new(),
            namespace: namespace.into(),
        }
    }

    /// Use another `oc` executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.program = binary.into();
        self.leading_args.clear();
        self
    }

    /// Run `oc` through a wrapper, e.g. `flatpak-spawn --host oc`
    pub fn with_command<I, S>(mut self, program: impl Into<String>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.leading_args = leading_args.into_iter().map(Into::into).collect();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd.args(args);
        cmd.arg("-n").arg(&self.namespace);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("oc {} -n {}", args.join(" "), self.namespace)
    }

    /// Run an oc command and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let command = self.describe(args);
        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {}", command);

        let output = cmd.output().await.map_err(|source| BuildError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl BuildService for OcClient {
    async fn submit(&self, definition: &BuildDefinition) -> Result<String> {
        // Removed when `file` drops, whichever way this returns
        let mut file = tempfile::Builder::new()
            .prefix("buildconfig-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(definition.as_yaml().as_bytes())?;
        file.flush()?;
        let path = file.path().to_string_lossy().to_string();

        let stdout = self.run_command(&["apply", "-f", &path]).await?;

        if let Some(name) = extract_buildconfig_name(&stdout) {
            tracing::info!("Applied BuildConfig {}", name);
            return Ok(name);
        }

        tracing::warn!(
            "Unrecognised `oc apply` output, using name from definition: {}",
            stdout.trim()
        );
        definition_name_from_yaml(definition.as_yaml()).ok_or(BuildError::MissingDefinitionName)
    }

    async fn start(&self, definition_name: &str) -> Result<String> {
        let stdout = self
            .run_command(&["start-build", definition_name])
            .await?;

        Ok(extract_build_name(&stdout).unwrap_or_else(|| {
            tracing::warn!(
                "Unrecognised `oc start-build` output, assuming first build: {}",
                stdout.trim()
            );
            format!("{}-1", definition_name)
        }))
    }

    async fn resolve_image_reference(&self, stream: &str, tag: &str) -> Result<String> {
        let stdout = self
            .run_command(&["get", "imagestream", stream, "-o", "yaml"])
            .await?;

        image_reference_for_tag(&stdout, tag)?.ok_or_else(|| BuildError::TagNotFound {
            stream: stream.to_string(),
            tag: tag.to_string(),
        })
    }

    async fn phase(&self, build_name: &str) -> Result<BuildPhase> {
        let stdout = self
            .run_command(&["get", "build", build_name, "-o", "jsonpath={.status.phase}"])
            .await?;

        Ok(BuildPhase::parse(&stdout))
    }

    async fn logs(&self, build_name: &str) -> Result<String> {
        let target = format!("build/{}", build_name);
        self.run_command(&["logs", &target]).await
    }

    async fn follow_logs(&self, build_name: &str) -> Result<Box<dyn LogTail>> {
        let target = format!("build/{}", build_name);
        let args = ["logs", "-f", target.as_str()];
        let command = self.describe(&args);

        tracing::debug!("Streaming: {}", command);

        let mut child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BuildError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| BuildError::Spawn {
            command,
            source: std::io::Error::other("stdout was not captured"),
        })?;

        Ok(Box::new(ProcessLogTail {
            child,
            lines: BufReader::new(stdout).lines(),
            finished: false,
        }))
    }
}

/// `oc logs -f` child process
pub struct ProcessLogTail {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    finished: bool,
}

#[async_trait]
impl LogTail for ProcessLogTail {
    fn try_next_line(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }

        match self.lines.next_line().now_or_never() {
            None => None,
            Some(Ok(Some(line))) => Some(line),
            Some(Ok(None)) => {
                self.finished = true;
                None
            }
            Some(Err(e)) => {
                tracing::debug!("Skipping unreadable log line: {}", e);
                None
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        Ok(())
    }

    fn abort(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Log stream already stopped: {}", e);
        }
    }
}

/// `buildconfig.build.openshift.io/<name> created|configured|unchanged`
pub fn extract_buildconfig_name(stdout: &str) -> Option<String> {
    BUILDCONFIG_NAME_RE
        .captures(stdout)
        .map(|caps| caps[1].to_string())
}

/// `build.build.openshift.io/<name> started`
pub fn extract_build_name(stdout: &str) -> Option<String> {
    BUILD_NAME_RE.captures(stdout).map(|caps| caps[1].to_string())
}

/// `metadata.name` of a serialized BuildConfig
pub fn definition_name_from_yaml(yaml: &str) -> Option<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).ok()?;
    value
        .get("metadata")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// First image reference recorded for `tag` in an ImageStream document
pub fn image_reference_for_tag(imagestream_yaml: &str, tag: &str) -> Result<Option<String>> {
    let stream: ImageStream = serde_yaml::from_str(imagestream_yaml)?;

    Ok(stream
        .status
        .tags
        .into_iter()
        .filter(|t| t.tag == tag)
        .find_map(|t| {
            t.items
                .into_iter()
                .find_map(|item| item.docker_image_reference)
        }))
}

#[derive(Debug, Deserialize)]
struct ImageStream {
    #[serde(default)]
    status: ImageStreamStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ImageStreamStatus {
    #[serde(default)]
    tags: Vec<NamedTagEventList>,
}

#[derive(Debug, Deserialize)]
struct NamedTagEventList {
    tag: String,
    #[serde(default)]
    items: Vec<TagEvent>,
}

#[derive(Debug, Deserialize)]
struct TagEvent {
    #[serde(rename = "dockerImageReference")]
    docker_image_reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGESTREAM: &str = r#"
apiVersion: image.openshift.io/v1
kind: ImageStream
metadata:
  name: ml-dev-env
status:
  dockerImageRepository: image-registry.openshift-image-registry.svc:5000/test-ns/ml-dev-env
  tags:
  - tag: pytorch-2.8-numpy1
    items:
    - dockerImageReference: image-registry.openshift-image-registry.svc:5000/test-ns/ml-dev-env@sha256:old
  - tag: test-tag
    items:
    - dockerImageReference: image-registry.openshift-image-registry.svc:5000/test-ns/ml-dev-env@sha256:abc123
      generation: 2
    - dockerImageReference: image-registry.openshift-image-registry.svc:5000/test-ns/ml-dev-env@sha256:older
"#;

    #[test]
    fn test_extract_buildconfig_name() {
        assert_eq!(
            extract_buildconfig_name("buildconfig.build.openshift.io/test-build created\n"),
            Some("test-build".to_string())
        );
        assert_eq!(
            extract_buildconfig_name("buildconfig.build.openshift.io/test-build configured"),
            Some("test-build".to_string())
        );
        assert_eq!(extract_buildconfig_name("created"), None);
    }

    #[test]
    fn test_extract_build_name() {
        assert_eq!(
            extract_build_name("build.build.openshift.io/test-build-1 started\n"),
            Some("test-build-1".to_string())
        );
        assert_eq!(extract_build_name("build started"), None);
    }

    #[test]
    fn test_build_pattern_ignores_buildconfig_output() {
        assert_eq!(
            extract_build_name("buildconfig.build.openshift.io/test-build created"),
            None
        );
    }

    #[test]
    fn test_definition_name_fallback() {
        let yaml = "apiVersion: build.openshift.io/v1\nkind: BuildConfig\nmetadata:\n  name: test-build\n";
        assert_eq!(
            definition_name_from_yaml(yaml),
            Some("test-build".to_string())
        );
        assert_eq!(definition_name_from_yaml("kind: BuildConfig\n"), None);
        assert_eq!(definition_name_from_yaml(": not yaml: ["), None);
    }

    #[test]
    fn test_image_reference_for_tag() {
        let image = image_reference_for_tag(IMAGESTREAM, "test-tag").unwrap();
        assert_eq!(
            image.as_deref(),
            Some("image-registry.openshift-image-registry.svc:5000/test-ns/ml-dev-env@sha256:abc123")
        );
    }

    #[test]
    fn test_image_reference_missing_tag() {
        assert_eq!(image_reference_for_tag(IMAGESTREAM, "missing-tag").unwrap(), None);
        assert_eq!(
            image_reference_for_tag("status:\n  tags: []\n", "test-tag").unwrap(),
            None
        );
        assert_eq!(image_reference_for_tag("kind: ImageStream\n", "test-tag").unwrap(), None);
    }

    #[test]
    fn test_tag_without_items_is_not_found() {
        let yaml = "status:\n  tags:\n  - tag: test-tag\n    items: []\n";
        assert_eq!(image_reference_for_tag(yaml, "test-tag").unwrap(), None);
    }

    #[test]
    fn test_command_appends_namespace() {
        let client = OcClient::new("test-ns");
        assert_eq!(
            client.describe(&["start-build", "test-build"]),
            "oc start-build test-build -n test-ns"
        );
    }
}
