pub mod build;
pub mod classify;
pub mod images;
pub mod render;

use crate::ImageArgs;
use chrono::NaiveDate;
use mldev_build::catalog::{dated_build_name, dated_image_tag};
use mldev_build::{BuildConfigGenerator, BuildSpecification, DEFAULT_BASE_IMAGE, resolve_base_image};
use mldev_config::BuilderConfig;

/// Turn command-line arguments into a build specification
pub fn specification(image: &ImageArgs, today: NaiveDate) -> BuildSpecification {
    let base = image.base.as_deref().unwrap_or(DEFAULT_BASE_IMAGE);
    let name = image
        .name
        .clone()
        .unwrap_or_else(|| dated_build_name(today, 1));
    let tag = image
        .tag
        .clone()
        .unwrap_or_else(|| dated_image_tag(base, today));

    let spec = BuildSpecification::new(resolve_base_image(base), name, tag);
    match &image.requirements {
        Some(path) => spec.with_requirements(path),
        None => spec.with_packages(image.packages.iter().cloned()),
    }
}

/// Generator for the configured namespace and template, with CLI overrides
pub fn generator(config: &BuilderConfig, image: &ImageArgs) -> BuildConfigGenerator {
    let namespace = image.namespace.as_deref().unwrap_or(&config.namespace);
    let template = image.template.as_ref().unwrap_or(&config.template_path);

    BuildConfigGenerator::new(namespace, template).with_image_stream(&config.image_stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mldev_build::PackageSource;
    use std::path::PathBuf;

    fn args() -> ImageArgs {
        ImageArgs {
            base: None,
            packages: Vec::new(),
            requirements: None,
            name: None,
            tag: None,
            namespace: None,
            template: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 24).unwrap()
    }

    #[test]
    fn test_dated_defaults() {
        let spec = specification(&args(), date());
        assert_eq!(spec.base_image, "nvcr.io/nvidia/pytorch:25.09-py3");
        assert_eq!(spec.build_name, "ml-dev-custom-20260224-1");
        assert_eq!(spec.image_tag, "custom-pytorch29-20260224");
        assert_eq!(spec.packages, PackageSource::BaseOnly);
    }

    #[test]
    fn test_explicit_values_win() {
        let image = ImageArgs {
            base: Some("registry.local/pytorch:custom".to_string()),
            packages: vec!["transformers".to_string(), " ".to_string(), "datasets".to_string()],
            name: Some("my-build".to_string()),
            tag: Some("v1".to_string()),
            ..args()
        };
        let spec = specification(&image, date());

        assert_eq!(spec.base_image, "registry.local/pytorch:custom");
        assert_eq!(spec.build_name, "my-build");
        assert_eq!(spec.image_tag, "v1");
        assert_eq!(
            spec.packages,
            PackageSource::Packages(vec!["transformers".to_string(), "datasets".to_string()])
        );
    }

    #[test]
    fn test_requirements_file() {
        let image = ImageArgs {
            requirements: Some(PathBuf::from("requirements.txt")),
            ..args()
        };
        let spec = specification(&image, date());
        assert_eq!(
            spec.packages,
            PackageSource::RequirementsFile(PathBuf::from("requirements.txt"))
        );
    }

    #[test]
    fn test_generator_overrides() {
        let config = BuilderConfig::default();
        let image = ImageArgs {
            namespace: Some("other-ns".to_string()),
            ..args()
        };

        let generator = generator(&config, &image);
        assert_eq!(generator.namespace(), "other-ns");
        assert_eq!(generator.template_path(), config.template_path.as_path());
    }
}
