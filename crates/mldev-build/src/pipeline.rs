//! End-to-end build flow
//!
//! generate → submit → start → monitor, and on failure classify → decide.
//! A retry goes back to generation under a new BuildConfig name.

use crate::catalog::{DEFAULT_PREBUILT_TAG, internal_image_reference};
use crate::definition::{BuildDefinition, BuildSpecification};
use crate::error::Result;
use crate::generator::BuildConfigGenerator;
use crate::monitor::{BuildMonitor, BuildResult, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, interrupted};
use crate::progress::BuildProgress;
use crate::recovery::{ErrorAnalysis, RecoveryAction, RecoveryPolicy, classify, print_failure_report};
use crate::service::BuildService;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Total builds started for one request, retries included
    pub max_attempts: u32,
    /// Image used on fallback: an ImageStream tag (`tag` or `stream:tag`)
    /// in the build namespace, or a full image reference
    pub prebuilt_image: String,
    pub show_progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: 3,
            prebuilt_image: DEFAULT_PREBUILT_TAG.to_string(),
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The custom image was built and pushed
    Built { image_ref: String, result: BuildResult },
    /// The build failed and the operator chose a pre-built image
    Prebuilt {
        image: String,
        analysis: ErrorAnalysis,
    },
    /// The build failed and the operator gave up
    Aborted { analysis: ErrorAnalysis },
}

impl PipelineOutcome {
    /// Image to deploy, if any
    pub fn image(&self) -> Option<&str> {
        match self {
            PipelineOutcome::Built { image_ref, .. } => Some(image_ref),
            PipelineOutcome::Prebuilt { image, .. } => Some(image),
            PipelineOutcome::Aborted { .. } => None,
        }
    }
}

pub struct BuildPipeline<'a> {
    generator: BuildConfigGenerator,
    service: &'a dyn BuildService,
    policy: RecoveryPolicy,
    options: PipelineOptions,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(
        generator: BuildConfigGenerator,
        service: &'a dyn BuildService,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            generator,
            service,
            policy,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Run until the image is built or a recovery action ends the flow.
    /// Ctrl-C cancels the build being monitored, or aborts at the prompt.
    pub async fn run(&mut self, spec: &BuildSpecification) -> Result<PipelineOutcome> {
        self.run_until(spec, interrupted).await
    }

    /// Like [`BuildPipeline::run`], with `cancel()` supplying the
    /// cancellation signal for each monitored build and each recovery prompt.
    ///
    /// Generation and service errors are returned as `Err` straight away;
    /// failed builds go through classification and the recovery policy.
    pub async fn run_until<C, F>(
        &mut self,
        spec: &BuildSpecification,
        mut cancel: C,
    ) -> Result<PipelineOutcome>
    where
        C: FnMut() -> F,
        F: Future<Output = ()>,
    {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let attempt_spec = if attempt == 1 {
                spec.clone()
            } else {
                spec.renamed(format!("{}-retry{}", spec.build_name, attempt - 1))
            };

            tracing::info!(
                "Build attempt {}/{}: {}",
                attempt,
                max_attempts,
                attempt_spec.build_name
            );

            let definition = self.generator.generate(&attempt_spec)?;
            let handle = self.service.launch(&definition).await?;

            let mut monitor =
                BuildMonitor::new(self.service).with_poll_interval(self.options.poll_interval);
            if !self.options.show_progress {
                monitor = monitor.with_progress(BuildProgress::hidden());
            }
            let result = monitor
                .monitor_until(&handle.build_name, self.options.timeout, cancel())
                .await?;

            if result.success {
                let image_ref = match &result.image_ref {
                    Some(image_ref) => image_ref.clone(),
                    None => self.resolve_output(&definition).await,
                };
                return Ok(PipelineOutcome::Built { image_ref, result });
            }

            let analysis = classify(result.logs.as_deref().unwrap_or_default(), result.phase);
            tracing::warn!(
                "Build {} ended in {}: {} ({})",
                handle.build_name,
                result.phase,
                analysis.message,
                analysis.error_type
            );
            if self.options.show_progress {
                print_failure_report(&handle.build_name, &analysis);
            }

            let offered = if attempt < max_attempts {
                analysis.clone()
            } else {
                tracing::warn!("No build attempts left ({} used)", max_attempts);
                analysis.clone().without_retry()
            };

            match self.policy.decide_until(&offered, cancel()).await {
                RecoveryAction::Retry => {
                    attempt += 1;
                }
                RecoveryAction::UsePrebuilt => {
                    let image = self.resolve_prebuilt().await;
                    tracing::info!("Falling back to pre-built image {}", image);
                    return Ok(PipelineOutcome::Prebuilt { image, analysis });
                }
                RecoveryAction::Abort => {
                    return Ok(PipelineOutcome::Aborted { analysis });
                }
            }
        }
    }

    /// Pull reference of the configured pre-built image
    async fn resolve_prebuilt(&self) -> String {
        let prebuilt = self.options.prebuilt_image.trim();
        if prebuilt.contains('/') {
            return prebuilt.to_string();
        }

        let (stream, tag) = prebuilt
            .split_once(':')
            .unwrap_or((self.generator.image_stream(), prebuilt));
        match self.service.resolve_image_reference(stream, tag).await {
            Ok(image_ref) => image_ref,
            Err(e) => {
                tracing::debug!("Could not resolve {}:{} from ImageStream: {}", stream, tag, e);
                internal_image_reference(self.generator.namespace(), stream, tag)
            }
        }
    }

    /// Image reference for a build whose logs did not show the push
    async fn resolve_output(&self, definition: &BuildDefinition) -> String {
        let (stream, tag) = definition.output_stream_and_tag();
        match self.service.resolve_image_reference(stream, tag).await {
            Ok(image_ref) => image_ref,
            Err(e) => {
                tracing::warn!(
                    "Could not resolve {} from ImageStream: {}",
                    definition.output_image(),
                    e
                );
                definition.output_image().to_string()
            }
        }
    }
}
