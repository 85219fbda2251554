//! BuildConfig generation
//!
//! Renders the BuildConfig template for one [`BuildSpecification`]: sets the
//! name, namespace and output tag, swaps the base image, and replaces the
//! template's package section with the user's packages. Everything in the
//! dockerfile outside that section is kept byte-for-byte.

use crate::definition::{BuildDefinition, BuildSpecification, PackageSource};
use crate::error::{BuildError, Result};
use regex::{NoExpand, Regex};
use serde_yaml::{Mapping, Value};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_TEMPLATE_PATH: &str = "k8s/buildconfig.yaml";
pub const DEFAULT_IMAGE_STREAM: &str = "ml-dev-env";

/// Comment that opens the replaceable package section
pub const PACKAGE_SECTION_START: &str = "Install transformers and related libraries";

/// Comments of the stages that follow the package section
pub const PACKAGE_SECTION_END: &[&str] = &[
    "Install VideoLLaMA2",
    "NumPy 1.x Required",
    "Install code-server",
];

const SECTION_HEADER: &str = "# Custom package installation (user-specified)";
const PIP_INSTALL: &str = "RUN pip install --no-cache-dir --constraint /tmp/constraints.txt";
const REQUIREMENTS_PATH: &str = "/tmp/user-requirements.txt";
const INLINE_PACKAGE_LIMIT: usize = 3;

/// Characters a shell acts on that no pip requirement specifier needs
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '$', '`', '\'', '"', '\\', '(', ')'];

/// Specifier characters that are safe unquoted in a `RUN` line
const PLAIN_WORD_CHARACTERS: &str = "._-=!~+@:/%,";

static BASE_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FROM nvcr\.io/nvidia/pytorch:\S+").expect("base image pattern is valid")
});

/// Renders BuildConfig documents from a template file
#[derive(Debug, Clone)]
pub struct BuildConfigGenerator {
    namespace: String,
    template_path: PathBuf,
    image_stream: String,
}

impl BuildConfigGenerator {
    pub fn new(namespace: impl Into<String>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
            template_path: template_path.into(),
            image_stream: DEFAULT_IMAGE_STREAM.to_string(),
        }
    }

    pub fn with_image_stream(mut self, image_stream: impl Into<String>) -> Self {
        self.image_stream = image_stream.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    pub fn image_stream(&self) -> &str {
        &self.image_stream
    }

    /// Read the template and render it for `spec`
    pub fn generate(&self, spec: &BuildSpecification) -> Result<BuildDefinition> {
        validate(spec)?;

        if !self.template_path.exists() {
            return Err(BuildError::TemplateNotFound(self.template_path.clone()));
        }
        let template = std::fs::read_to_string(&self.template_path).map_err(|source| {
            BuildError::TemplateUnreadable {
                path: self.template_path.clone(),
                source,
            }
        })?;

        self.render(&template, spec)
    }

    /// Render an already loaded template
    pub fn render(&self, template: &str, spec: &BuildSpecification) -> Result<BuildDefinition> {
        validate(spec)?;

        let mut config: Value =
            serde_yaml::from_str(template).map_err(|e| self.invalid_template(e.to_string()))?;
        if !config.is_mapping() {
            return Err(self.invalid_template("document is not a mapping"));
        }

        let output_image = format!("{}:{}", self.image_stream, spec.image_tag);

        let dockerfile = config
            .get("spec")
            .and_then(|s| s.get("source"))
            .and_then(|s| s.get("dockerfile"))
            .and_then(Value::as_str)
            .ok_or_else(|| self.invalid_template("spec.source.dockerfile is missing"))?;
        let dockerfile = render_dockerfile(dockerfile, spec)?;

        let updates = [
            (&["metadata", "name"][..], spec.build_name.as_str()),
            (&["metadata", "namespace"][..], self.namespace.as_str()),
            (&["spec", "output", "to", "name"][..], output_image.as_str()),
            (&["spec", "source", "dockerfile"][..], dockerfile.as_str()),
        ];
        for (path, value) in updates {
            set_path(&mut config, path, Value::from(value))
                .map_err(|reason| self.invalid_template(reason))?;
        }

        let yaml = serde_yaml::to_string(&config)?;

        tracing::debug!(
            "Rendered BuildConfig {} -> {} ({} bytes)",
            spec.build_name,
            output_image,
            yaml.len()
        );

        Ok(BuildDefinition::new(
            spec.build_name.clone(),
            self.namespace.clone(),
            output_image,
            yaml,
        ))
    }

    fn invalid_template(&self, reason: impl Into<String>) -> BuildError {
        BuildError::InvalidTemplate {
            path: self.template_path.clone(),
            reason: reason.into(),
        }
    }
}

fn validate(spec: &BuildSpecification) -> Result<()> {
    if spec.base_image.trim().is_empty() {
        return Err(BuildError::InvalidSpec(
            "base image must not be empty".to_string(),
        ));
    }
    if spec.build_name.trim().is_empty() {
        return Err(BuildError::InvalidSpec(
            "build name must not be empty".to_string(),
        ));
    }
    if spec.image_tag.trim().is_empty() {
        return Err(BuildError::InvalidSpec(
            "image tag must not be empty".to_string(),
        ));
    }
    if let PackageSource::Packages(packages) = &spec.packages {
        for package in packages {
            let unsafe_char = package.chars().find(|c| {
                c.is_whitespace() || c.is_control() || SHELL_METACHARACTERS.contains(c)
            });
            if let Some(c) = unsafe_char {
                return Err(BuildError::InvalidSpec(format!(
                    "package '{}' contains '{}', which is not allowed in a package specifier",
                    package.escape_default(),
                    c.escape_default()
                )));
            }
        }
    }
    Ok(())
}

/// One package as a shell word. Specifiers with glob or redirection
/// characters (`torch<2.6`, `transformers[torch]`) are single-quoted;
/// [`validate`] has already rejected anything a quote cannot contain.
fn shell_word(package: &str) -> Cow<'_, str> {
    let plain = package
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PLAIN_WORD_CHARACTERS.contains(c));
    if plain {
        Cow::Borrowed(package)
    } else {
        Cow::Owned(format!("'{}'", package))
    }
}

/// Set a nested mapping value, creating intermediate mappings
fn set_path(root: &mut Value, path: &[&str], value: Value) -> std::result::Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };

    let mut node = root;
    for key in parents {
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| format!("cannot set '{}': parent is not a mapping", path.join(".")))?;
        node = map
            .entry(Value::from(*key))
            .or_insert(Value::Mapping(Mapping::new()));
    }

    let map = node
        .as_mapping_mut()
        .ok_or_else(|| format!("cannot set '{}': parent is not a mapping", path.join(".")))?;
    map.insert(Value::from(*last), value);
    Ok(())
}

/// Apply base image and package changes to a dockerfile body
pub fn render_dockerfile(dockerfile: &str, spec: &BuildSpecification) -> Result<String> {
    let dockerfile = replace_base_image(dockerfile, &spec.base_image);

    let section = match &spec.packages {
        PackageSource::BaseOnly => return Ok(dockerfile),
        PackageSource::Packages(packages) => package_section(packages),
        PackageSource::RequirementsFile(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| {
                BuildError::RequirementsUnreadable {
                    path: path.clone(),
                    source,
                }
            })?;
            requirements_section(&content)
        }
    };

    replace_package_section(&dockerfile, &section)
}

/// Replace the first NGC PyTorch `FROM` line, keeping any stage alias
pub fn replace_base_image(dockerfile: &str, base_image: &str) -> String {
    if !BASE_IMAGE_RE.is_match(dockerfile) {
        tracing::warn!("No NGC PyTorch FROM line in template; base image left unchanged");
        return dockerfile.to_string();
    }
    BASE_IMAGE_RE
        .replacen(dockerfile, 1, NoExpand(&format!("FROM {}", base_image)))
        .into_owned()
}

/// Swap the package section for `section`.
///
/// The section starts at the only line containing
/// [`PACKAGE_SECTION_START`] and runs up to (not including) the next line
/// containing one of [`PACKAGE_SECTION_END`].
pub fn replace_package_section(dockerfile: &str, section: &[String]) -> Result<String> {
    let lines: Vec<&str> = dockerfile.split('\n').collect();

    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(PACKAGE_SECTION_START))
        .map(|(i, _)| i)
        .collect();

    let start = match starts.as_slice() {
        [] => {
            return Err(BuildError::MarkerNotFound {
                marker: PACKAGE_SECTION_START.to_string(),
            });
        }
        [start] => *start,
        _ => {
            return Err(BuildError::AmbiguousMarker {
                marker: PACKAGE_SECTION_START.to_string(),
                count: starts.len(),
            });
        }
    };

    let end = lines[start + 1..]
        .iter()
        .position(|line| PACKAGE_SECTION_END.iter().any(|m| line.contains(m)))
        .map(|offset| start + 1 + offset)
        .ok_or_else(|| BuildError::MarkerNotFound {
            marker: PACKAGE_SECTION_END.join(" | "),
        })?;

    let mut rendered: Vec<&str> = Vec::with_capacity(lines.len() + section.len());
    rendered.extend_from_slice(&lines[..start]);
    rendered.extend(section.iter().map(String::as_str));
    rendered.extend_from_slice(&lines[end..]);

    Ok(rendered.join("\n"))
}

/// Install lines for an explicit package list
pub fn package_section(packages: &[String]) -> Vec<String> {
    let mut lines = vec![
        SECTION_HEADER.to_string(),
        String::new(),
        "# Install user-specified packages".to_string(),
    ];

    let words: Vec<Cow<'_, str>> = packages.iter().map(|p| shell_word(p)).collect();
    if words.len() <= INLINE_PACKAGE_LIMIT {
        lines.push(format!("{} {}", PIP_INSTALL, words.join(" ")));
    } else {
        lines.push(format!("{} \\", PIP_INSTALL));
        let last = words.len() - 1;
        for (i, package) in words.iter().enumerate() {
            if i < last {
                lines.push(format!("    {} \\", package));
            } else {
                lines.push(format!("    {}", package));
            }
        }
    }

    lines.push(String::new());
    lines
}

/// Install lines embedding a requirements file through a quoted heredoc
pub fn requirements_section(content: &str) -> Vec<String> {
    let body = content.strip_suffix('\n').unwrap_or(content);
    let body_lines: Vec<&str> = if body.is_empty() {
        Vec::new()
    } else {
        body.split('\n').collect()
    };
    let delimiter = heredoc_delimiter(&body_lines);

    let mut lines = vec![
        SECTION_HEADER.to_string(),
        String::new(),
        "# Install packages from requirements.txt".to_string(),
        format!("RUN cat > {} <<'{}'", REQUIREMENTS_PATH, delimiter),
    ];
    lines.extend(body_lines.iter().map(|l| l.to_string()));
    lines.push(delimiter);
    lines.push(String::new());
    lines.push(format!("{} -r {}", PIP_INSTALL, REQUIREMENTS_PATH));
    lines.push(String::new());
    lines
}

/// `EOF` unless the body has a line that would end the heredoc early
fn heredoc_delimiter(body_lines: &[&str]) -> String {
    let clashes = |candidate: &str| body_lines.iter().any(|l| l.trim() == candidate);

    if !clashes("EOF") {
        return "EOF".to_string();
    }
    if !clashes("EOF_MLDEV") {
        return "EOF_MLDEV".to_string();
    }
    (1u32..)
        .map(|n| format!("EOF_MLDEV_{}", n))
        .find(|candidate| !clashes(candidate))
        .unwrap_or_else(|| "EOF_MLDEV_END".to_string())
}
