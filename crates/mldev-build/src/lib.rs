//! mldev image build orchestration
//!
//! Builds custom GPU development images on OpenShift: renders a
//! BuildConfig from a template, submits it through the `oc` CLI, follows
//! the build until it finishes, and decides how to recover when it fails.

pub mod catalog;
pub mod client;
pub mod definition;
pub mod error;
pub mod generator;
pub mod monitor;
pub mod phase;
pub mod pipeline;
pub mod progress;
pub mod recovery;
pub mod service;

pub use catalog::{
    BASE_IMAGES, DEFAULT_BASE_IMAGE, DEFAULT_PREBUILT_TAG, base_image, internal_image_reference,
    resolve_base_image,
};
pub use client::OcClient;
pub use definition::{BuildDefinition, BuildHandle, BuildSpecification, PackageSource};
pub use error::{BuildError, Result};
pub use generator::BuildConfigGenerator;
pub use monitor::{BuildMonitor, BuildResult};
pub use phase::BuildPhase;
pub use pipeline::{BuildPipeline, PipelineOptions, PipelineOutcome};
pub use progress::BuildProgress;
pub use recovery::{
    ErrorAnalysis, ErrorKind, Prompt, RecoveryAction, RecoveryPolicy, StdinPrompt, classify,
};
pub use service::{BuildService, LogTail, TailSession};
