use crate::ImageArgs;
use mldev_config::BuilderConfig;

/// Print the BuildConfig that `build` would submit
pub fn handle(config: &BuilderConfig, image: &ImageArgs) -> anyhow::Result<()> {
    let spec = super::specification(image, chrono::Local::now().date_naive());
    let generator = super::generator(config, image);

    let definition = generator.generate(&spec).map_err(|e| {
        eprintln!("{}", e.user_message());
        e
    })?;

    tracing::debug!(
        "Rendered {} for {}",
        definition.name(),
        definition.output_image()
    );
    print!("{}", definition.as_yaml());
    Ok(())
}
