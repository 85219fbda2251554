//! mldev builder configuration
//!
//! Settings are read from the first config file found, then individual
//! environment variables are applied on top.

pub mod error;

pub use error::*;

use mldev_build::{DEFAULT_PREBUILT_TAG, RecoveryAction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "MLDEV_CONFIG_PATH";
pub const NAMESPACE_ENV: &str = "MLDEV_NAMESPACE";
pub const TIMEOUT_ENV: &str = "MLDEV_TIMEOUT_SECS";

const CANDIDATES: [&str; 2] = ["mldev.yaml", ".mldev.yaml"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// OpenShift project the builds run in
    pub namespace: String,
    pub oc_binary: String,
    /// BuildConfig template, relative to the working directory
    pub template_path: PathBuf,
    /// ImageStream receiving the output image
    pub image_stream: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    /// Builds started per request, retries included
    pub max_attempts: u32,
    /// Recovery action taken without a terminal (`retry`, `use_prebuilt`, `abort`)
    pub non_interactive_action: String,
    /// ImageStream tag (`tag` or `stream:tag`) or full image used when
    /// falling back
    pub prebuilt_image: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            namespace: "nccl-test".to_string(),
            oc_binary: "oc".to_string(),
            template_path: PathBuf::from("k8s/buildconfig.yaml"),
            image_stream: "ml-dev-env".to_string(),
            poll_interval_secs: 2,
            timeout_secs: 1800,
            max_attempts: 3,
            non_interactive_action: "use_prebuilt".to_string(),
            prebuilt_image: DEFAULT_PREBUILT_TAG.to_string(),
        }
    }
}

impl BuilderConfig {
    /// Load from the first config file found (or defaults), then apply
    /// environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file()? {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No config file found; using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `MLDEV_NAMESPACE` and `MLDEV_TIMEOUT_SECS` win over file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(namespace) = std::env::var(NAMESPACE_ENV) {
            if !namespace.trim().is_empty() {
                self.namespace = namespace.trim().to_string();
            }
        }

        if let Ok(value) = std::env::var(TIMEOUT_ENV) {
            self.timeout_secs = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: TIMEOUT_ENV.to_string(),
                    value,
                })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        self.recovery_default()?;
        Ok(())
    }

    /// `non_interactive_action` as a recovery action
    pub fn recovery_default(&self) -> Result<RecoveryAction> {
        self.non_interactive_action
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("non_interactive_action: {}", e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Find the config file.
///
/// Search order:
/// 1. `MLDEV_CONFIG_PATH`
/// 2. current directory: `mldev.yaml`, `.mldev.yaml`
/// 3. `<config dir>/mldev/config.yaml`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        tracing::warn!(
            "{} points to a missing file: {}",
            CONFIG_PATH_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("mldev").join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    /// Run `f` inside `dir` with no mldev variables set
    fn in_dir<R>(dir: &Path, f: impl FnOnce() -> R) -> R {
        temp_env::with_vars_unset([CONFIG_PATH_ENV, NAMESPACE_ENV, TIMEOUT_ENV], || {
            let original_dir = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir).unwrap();
            let result = f();
            std::env::set_current_dir(original_dir).unwrap();
            result
        })
    }

    #[test]
    fn test_defaults() {
        let config = BuilderConfig::default();
        assert_eq!(config.namespace, "nccl-test");
        assert_eq!(config.template_path, PathBuf::from("k8s/buildconfig.yaml"));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.timeout(), Duration::from_secs(1800));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.non_interactive_action, "use_prebuilt");
        assert_eq!(config.prebuilt_image, "pytorch-2.9-numpy2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_interactive_action_checked() {
        let mut config = BuilderConfig {
            non_interactive_action: "retry-later".to_string(),
            ..BuilderConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid(ref msg) if msg.contains("non_interactive_action"))
        );

        config.non_interactive_action = "Use-Prebuilt".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.recovery_default().unwrap(),
            RecoveryAction::UsePrebuilt
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mldev.yaml");
        fs::write(&path, "namespace: ml-team\ntimeout_secs: 3600\n").unwrap();

        let config = BuilderConfig::from_file(&path).unwrap();
        assert_eq!(config.namespace, "ml-team");
        assert_eq!(config.timeout_secs, 3600);
        assert_eq!(config.image_stream, "ml-dev-env");
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mldev.yaml");
        fs::write(&path, "\n").unwrap();

        assert_eq!(
            BuilderConfig::from_file(&path).unwrap(),
            BuilderConfig::default()
        );
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mldev.yaml");
        fs::write(&path, "timeout_secs: soon\n").unwrap();

        let err = BuilderConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    #[serial]
    fn test_find_config_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(".mldev.yaml"), "namespace: hidden\n").unwrap();
        fs::write(temp_dir.path().join("mldev.yaml"), "namespace: visible\n").unwrap();

        let found = in_dir(temp_dir.path(), find_config_file).unwrap().unwrap();

        // mldev.yaml is checked first
        assert!(found.ends_with("mldev.yaml"));
        assert!(!found.ends_with(".mldev.yaml"));
    }

    #[test]
    #[serial]
    fn test_env_path_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("custom.yaml");
        fs::write(&custom, "namespace: from-env-path\n").unwrap();
        fs::write(temp_dir.path().join("mldev.yaml"), "namespace: local\n").unwrap();

        let config = in_dir(temp_dir.path(), || {
            temp_env::with_var(CONFIG_PATH_ENV, Some(&custom), BuilderConfig::load)
        })
        .unwrap();
        assert_eq!(config.namespace, "from-env-path");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join("mldev.yaml"),
            "namespace: local\ntimeout_secs: 60\n",
        )
        .unwrap();

        let config = in_dir(temp_dir.path(), || {
            temp_env::with_vars(
                [(NAMESPACE_ENV, Some("override-ns")), (TIMEOUT_ENV, Some("900"))],
                BuilderConfig::load,
            )
        })
        .unwrap();
        assert_eq!(config.namespace, "override-ns");
        assert_eq!(config.timeout_secs, 900);
    }

    #[test]
    #[serial]
    fn test_invalid_timeout_env() {
        let temp_dir = tempfile::tempdir().unwrap();

        let result = in_dir(temp_dir.path(), || {
            temp_env::with_var(TIMEOUT_ENV, Some("half an hour"), BuilderConfig::load)
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    #[serial]
    fn test_zero_attempts_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("mldev.yaml"), "max_attempts: 0\n").unwrap();

        let result = in_dir(temp_dir.path(), BuilderConfig::load);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
