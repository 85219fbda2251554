use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("BuildConfig template not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("BuildConfig template unreadable: {path}: {source}")]
    TemplateUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid BuildConfig template {path}: {reason}")]
    InvalidTemplate { path: PathBuf, reason: String },

    #[error("Marker '{marker}' not found in dockerfile")]
    MarkerNotFound { marker: String },

    #[error("Marker '{marker}' found {count} times in dockerfile (expected exactly once)")]
    AmbiguousMarker { marker: String, count: usize },

    #[error("Requirements file unreadable: {path}: {source}")]
    RequirementsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid build specification: {0}")]
    InvalidSpec(String),

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tag '{tag}' not found in ImageStream '{stream}'")]
    TagNotFound { stream: String, tag: String },

    #[error("Could not determine the BuildConfig name from apply output or definition")]
    MissingDefinitionName,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Errors raised before anything was sent to the build service.
    pub fn is_generation(&self) -> bool {
        matches!(
            self,
            BuildError::TemplateNotFound(_)
                | BuildError::TemplateUnreadable { .. }
                | BuildError::InvalidTemplate { .. }
                | BuildError::MarkerNotFound { .. }
                | BuildError::AmbiguousMarker { .. }
                | BuildError::RequirementsUnreadable { .. }
                | BuildError::InvalidSpec(_)
        )
    }

    /// The build service rejected or failed the call itself, as opposed to
    /// the build finishing in a failed phase. A missing ImageStream tag is
    /// neither a generation nor a transport error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BuildError::CommandFailed { .. } | BuildError::Spawn { .. }
        )
    }

    /// Operator-facing message with a hint on how to proceed
    pub fn user_message(&self) -> String {
        match self {
            BuildError::TemplateNotFound(path) => {
                format!(
                    "BuildConfig template not found: {}\n\
                     \n\
                     Hint:\n\
                     1. Run mldev from the repository root, or\n\
                     2. Point template_path in mldev.yaml at a valid BuildConfig",
                    path.display()
                )
            }
            BuildError::MarkerNotFound { marker } | BuildError::AmbiguousMarker { marker, .. } => {
                format!(
                    "{}\n\
                     \n\
                     The template's package section must start with exactly one\n\
                     '# {}' comment and end before a known later stage.",
                    self, marker
                )
            }
            BuildError::RequirementsUnreadable { path, .. } => {
                format!(
                    "{}\n\
                     \n\
                     Check that {} exists and is readable.",
                    self,
                    path.display()
                )
            }
            BuildError::CommandFailed { .. } | BuildError::Spawn { .. } => {
                format!(
                    "{}\n\
                     \n\
                     Hint:\n\
                     • Check that `oc` is installed and logged in (oc whoami)\n\
                     • Check that the namespace exists and you can create builds in it",
                    self
                )
            }
            BuildError::TagNotFound { stream, .. } => {
                format!(
                    "{}\n\
                     \n\
                     Inspect available tags with: oc get imagestream {} -o yaml",
                    self, stream
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
