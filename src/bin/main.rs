use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use jobforge::config::{BuilderConfig, RegistryConfig, BASE_IMAGE};
use jobforge::engine::docker::DockerEngine;
use jobforge::package::BuildRequest;
use jobforge::pipeline::BuildPipeline;
use jobforge::progress::NullSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[clap(long, global = true, default_value_t = Level::INFO)]
    level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct PackageArgs {
    /// Extracted upload folder
    folder: PathBuf,

    /// Dotted module path the image must be able to import (repeatable)
    #[clap(long = "import", required = true)]
    imports: Vec<String>,

    /// pip requirement specifier installed next to the package (repeatable)
    #[clap(long = "requirement")]
    requirements: Vec<String>,

    /// apt package installed into the image (repeatable)
    #[clap(long = "os-package")]
    os_packages: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the package imports cleanly in a fresh environment
    Validate {
        #[command(flatten)]
        package: PackageArgs,
    },

    /// Validate, then build (and push, if a registry is given) the image
    Build {
        #[command(flatten)]
        package: PackageArgs,

        /// Image name
        #[clap(long, short)]
        name: String,

        /// Tag applied to the built image (repeatable; defaults to latest)
        #[clap(long = "tag")]
        tags: Vec<String>,

        /// Base image the manifest starts from
        #[clap(long, default_value = BASE_IMAGE)]
        base_image: String,

        /// Registry URL to push the image to
        #[clap(long)]
        registry: Option<String>,

        #[clap(long)]
        registry_username: Option<String>,

        #[clap(long)]
        registry_password: Option<String>,
    },
}

fn build_request(package: PackageArgs, name: String, tags: Vec<String>) -> BuildRequest {
    BuildRequest {
        folder: package.folder,
        image_name: name,
        tags,
        imports: package.imports,
        requirements: package.requirements,
        os_packages: package.os_packages,
        base_image: None,
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let mut subscriber = tracing_subscriber::FmtSubscriber::builder().with_max_level(cli.level);

    // when we run the command with `TRACE` or `DEBUG` level, we want to see
    // the file and line number...
    if [Level::DEBUG, Level::TRACE].contains(&cli.level) {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }
    let subscriber = subscriber.finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber");

    match cli.command {
        Command::Validate { package } => {
            let name = package
                .folder
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "package".to_string());
            let request = build_request(package, name, Vec::new());

            let engine = Arc::new(DockerEngine::new()?);
            let mut pipeline =
                BuildPipeline::new(request, BuilderConfig::default(), engine, Arc::new(NullSink));
            pipeline.validate().await?;

            println!(
                "{}",
                serde_json::json!({
                    "jobs": pipeline.state().jobs,
                    "tasks": pipeline.state().tasks,
                })
            );
        }

        Command::Build {
            package,
            name,
            tags,
            base_image,
            registry,
            registry_username,
            registry_password,
        } => {
            let config = BuilderConfig {
                base_image,
                registry: registry.map(|url| RegistryConfig {
                    url,
                    username: registry_username,
                    password: registry_password,
                }),
            };
            let request = build_request(package, name, tags);

            let engine = Arc::new(DockerEngine::new()?);
            let mut pipeline = BuildPipeline::new(request, config, engine, Arc::new(NullSink));
            pipeline.validate().await?;
            let artifact = pipeline.build().await?;

            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
    }

    Ok(())
}
