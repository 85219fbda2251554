//! What to build, and what was rendered for the build service

use std::path::PathBuf;

/// Where the user-specified Python packages come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// Keep the template's own package section
    BaseOnly,
    /// Ordered pip package specifiers
    Packages(Vec<String>),
    /// requirements.txt whose contents are embedded verbatim
    RequirementsFile(PathBuf),
}

impl PackageSource {
    /// Build a package list, dropping blank entries. An empty list means
    /// the base image only.
    pub fn packages<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let packages: Vec<String> = packages
            .into_iter()
            .map(Into::into)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if packages.is_empty() {
            PackageSource::BaseOnly
        } else {
            PackageSource::Packages(packages)
        }
    }
}

/// Immutable description of one image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpecification {
    pub base_image: String,
    pub packages: PackageSource,
    pub build_name: String,
    pub image_tag: String,
}

impl BuildSpecification {
    pub fn new(
        base_image: impl Into<String>,
        build_name: impl Into<String>,
        image_tag: impl Into<String>,
    ) -> Self {
        Self {
            base_image: base_image.into(),
            packages: PackageSource::BaseOnly,
            build_name: build_name.into(),
            image_tag: image_tag.into(),
        }
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = PackageSource::packages(packages);
        self
    }

    pub fn with_requirements(mut self, path: impl Into<PathBuf>) -> Self {
        self.packages = PackageSource::RequirementsFile(path.into());
        self
    }

    /// Same build under another BuildConfig name (used for retries)
    pub fn renamed(&self, build_name: impl Into<String>) -> Self {
        Self {
            build_name: build_name.into(),
            ..self.clone()
        }
    }
}

/// Rendered BuildConfig document plus the metadata resolved into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDefinition {
    name: String,
    namespace: String,
    output_image: String,
    yaml: String,
}

impl BuildDefinition {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        output_image: impl Into<String>,
        yaml: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            output_image: output_image.into(),
            yaml: yaml.into(),
        }
    }

    /// BuildConfig name (`metadata.name`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Output ImageStreamTag, e.g. `ml-dev-env:custom-pytorch29-20260224`
    pub fn output_image(&self) -> &str {
        &self.output_image
    }

    /// `(image stream, tag)` of the output image
    pub fn output_stream_and_tag(&self) -> (&str, &str) {
        self.output_image
            .split_once(':')
            .unwrap_or((self.output_image.as_str(), "latest"))
    }

    pub fn as_yaml(&self) -> &str {
        &self.yaml
    }
}

/// Identifiers the build service returned for a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHandle {
    pub definition_name: String,
    pub build_name: String,
}
