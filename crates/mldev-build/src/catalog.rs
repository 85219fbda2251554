//! Supported base images and default naming

use chrono::NaiveDate;

/// NGC PyTorch images the template is known to work with
pub const BASE_IMAGES: &[(&str, &str)] = &[
    ("pytorch-2.8", "nvcr.io/nvidia/pytorch:25.08-py3"),
    ("pytorch-2.9", "nvcr.io/nvidia/pytorch:25.09-py3"),
    ("pytorch-3.0", "nvcr.io/nvidia/pytorch:26.01-py3"),
];

pub const DEFAULT_BASE_IMAGE: &str = "pytorch-2.9";

/// In-cluster registry that serves ImageStream tags
pub const INTERNAL_REGISTRY: &str = "image-registry.openshift-image-registry.svc:5000";

/// ImageStream tag of the pre-built environment used on fallback
pub const DEFAULT_PREBUILT_TAG: &str = "pytorch-2.9-numpy2";

/// Look up a catalogue key
pub fn base_image(key: &str) -> Option<&'static str> {
    BASE_IMAGES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, image)| *image)
}

/// Accept either a catalogue key or a full image reference
pub fn resolve_base_image(key_or_ref: &str) -> String {
    base_image(key_or_ref)
        .map(str::to_string)
        .unwrap_or_else(|| key_or_ref.to_string())
}

/// Pull reference for `stream:tag` in `namespace` through the internal registry
pub fn internal_image_reference(namespace: &str, stream: &str, tag: &str) -> String {
    format!("{}/{}/{}:{}", INTERNAL_REGISTRY, namespace, stream, tag)
}

/// `ml-dev-custom-20260224-1`
pub fn dated_build_name(date: NaiveDate, sequence: u32) -> String {
    format!("ml-dev-custom-{}-{}", date.format("%Y%m%d"), sequence)
}

/// `custom-pytorch29-20260224` for `pytorch-2.9`, `custom-20260224` for
/// anything outside the catalogue
pub fn dated_image_tag(base: &str, date: NaiveDate) -> String {
    let date = date.format("%Y%m%d");
    match base.strip_prefix("pytorch-") {
        Some(version) if base_image(base).is_some() => {
            format!("custom-pytorch{}-{}", version.replace('.', ""), date)
        }
        _ => format!("custom-{}", date),
    }
}
