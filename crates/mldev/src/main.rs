mod commands;

use clap::{Args, Parser, Subcommand};
use mldev_config::BuilderConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mldev")]
#[command(about = "Build custom GPU development images on OpenShift", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a custom image and follow it to completion
    Build {
        #[command(flatten)]
        image: ImageArgs,
        /// Never prompt; take the configured recovery action on failure
        #[arg(long)]
        non_interactive: bool,
        /// Give up on a build after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the rendered BuildConfig without submitting it
    Render {
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Classify a saved build log
    Classify {
        /// Build log file
        logfile: PathBuf,
        /// Phase the build ended in
        #[arg(long, default_value = "Failed")]
        phase: String,
        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the supported base images
    Images,
}

/// What to build
#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// Base image: catalogue key (see `mldev images`) or full image reference
    #[arg(short, long)]
    pub base: Option<String>,
    /// Comma-separated pip packages
    #[arg(short, long, value_delimiter = ',', conflicts_with = "requirements")]
    pub packages: Vec<String>,
    /// requirements.txt to embed in the image
    #[arg(short, long)]
    pub requirements: Option<PathBuf>,
    /// BuildConfig name (default: ml-dev-custom-<date>-1)
    #[arg(long)]
    pub name: Option<String>,
    /// Output image tag (default: custom-<base>-<date>)
    #[arg(long)]
    pub tag: Option<String>,
    /// OpenShift namespace
    #[arg(short, long)]
    pub namespace: Option<String>,
    /// BuildConfig template
    #[arg(long)]
    pub template: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries progress and rendered output; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Images => {
            commands::images::handle();
        }
        Commands::Classify {
            logfile,
            phase,
            json,
        } => {
            commands::classify::handle(&logfile, &phase, json)?;
        }
        Commands::Render { image } => {
            let config = BuilderConfig::load()?;
            commands::render::handle(&config, &image)?;
        }
        Commands::Build {
            image,
            non_interactive,
            timeout,
        } => {
            let config = BuilderConfig::load()?;
            let delivered = commands::build::handle(&config, &image, non_interactive, timeout).await?;
            if !delivered {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
