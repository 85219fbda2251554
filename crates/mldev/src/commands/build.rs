use crate::ImageArgs;
use colored::Colorize;
use mldev_build::{
    BuildPipeline, OcClient, PackageSource, PipelineOptions, PipelineOutcome, RecoveryPolicy,
};
use mldev_config::BuilderConfig;
use std::io::IsTerminal;
use std::time::Duration;

/// Run the build pipeline. Returns whether an image is available to deploy.
pub async fn handle(
    config: &BuilderConfig,
    image: &ImageArgs,
    non_interactive: bool,
    timeout: Option<u64>,
) -> anyhow::Result<bool> {
    let spec = super::specification(image, chrono::Local::now().date_naive());
    let generator = super::generator(config, image);
    let client = OcClient::new(generator.namespace()).with_binary(&config.oc_binary);

    let policy = if non_interactive || !std::io::stdin().is_terminal() {
        RecoveryPolicy::non_interactive(config.recovery_default()?)
    } else {
        RecoveryPolicy::interactive()
    };

    let options = PipelineOptions {
        timeout: timeout.map(Duration::from_secs).unwrap_or(config.timeout()),
        poll_interval: config.poll_interval(),
        max_attempts: config.max_attempts,
        prebuilt_image: config.prebuilt_image.clone(),
        show_progress: true,
    };

    println!("{}", "Building custom image".blue().bold());
    println!("  Namespace:  {}", generator.namespace().cyan());
    println!("  Base image: {}", spec.base_image.cyan());
    match &spec.packages {
        PackageSource::BaseOnly => println!("  Packages:   (template defaults)"),
        PackageSource::Packages(packages) => println!("  Packages:   {}", packages.join(", ")),
        PackageSource::RequirementsFile(path) => {
            println!("  Packages:   from {}", path.display())
        }
    }
    println!("  Build name: {}", spec.build_name);
    println!();

    let mut pipeline = BuildPipeline::new(generator, &client, policy).with_options(options);
    let outcome = match pipeline.run(&spec).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e.user_message());
            return Err(e.into());
        }
    };

    println!();
    match outcome {
        PipelineOutcome::Built { image_ref, .. } => {
            println!("{} Custom image ready", "✓".green().bold());
            println!("  Image: {}", image_ref.cyan());
            Ok(true)
        }
        PipelineOutcome::Prebuilt { image, .. } => {
            println!("{} Using pre-built image instead", "!".yellow().bold());
            println!("  Image: {}", image.cyan());
            Ok(true)
        }
        PipelineOutcome::Aborted { analysis } => {
            println!("{} Build aborted: {}", "✗".red().bold(), analysis.message);
            println!("  {}", analysis.recovery);
            Ok(false)
        }
    }
}
