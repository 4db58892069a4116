pub mod docker;

use crate::config::RegistryConfig;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Scheme prefix the engine puts on image identifiers.
pub const ID_SCHEME_PREFIX: &str = "sha256:";

const SHORT_ID_LEN: usize = 12;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Api(#[from] bollard::errors::Error),

    #[error("{message}")]
    BuildFailed { message: String },

    #[error("push of {repo}:{tag} failed: {message}")]
    PushFailed {
        repo: String,
        tag: String,
        message: String,
    },

    #[error("engine returned no image id for {name}")]
    MissingImageId { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineImage {
    /// Full identifier, scheme prefix stripped.
    pub id: String,
    /// Engine short form: the first 12 hex characters.
    pub short_id: String,
    pub repo_tags: Vec<String>,
}

impl EngineImage {
    pub fn from_engine_id(raw: &str) -> Self {
        let id = raw.strip_prefix(ID_SCHEME_PREFIX).unwrap_or(raw).to_string();
        let short_id = id.chars().take(SHORT_ID_LEN).collect();
        Self {
            id,
            short_id,
            repo_tags: Vec::new(),
        }
    }

    pub fn with_repo_tags(mut self, repo_tags: Vec<String>) -> Self {
        self.repo_tags = repo_tags;
        self
    }
}

/// The narrow surface consumed from the container engine. Everything the
/// pipeline does with images goes through this seam.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Submit the manifest plus build context and return the built image.
    async fn build(
        &self,
        context: &Path,
        manifest: &str,
        name: &str,
    ) -> EngineResult<EngineImage>;

    async fn tag(&self, image: &str, repo: &str, tag: &str)
        -> EngineResult<()>;

    async fn login(&self, registry: &RegistryConfig) -> EngineResult<()>;

    async fn push(
        &self,
        repo: &str,
        tag: &str,
        registry: &RegistryConfig,
    ) -> EngineResult<()>;

    /// Re-read the image's metadata.
    async fn inspect(&self, name: &str) -> EngineResult<EngineImage>;
}

/// Build the image from the package root and apply every requested tag,
/// reloading metadata before returning. When a registry with a username is
/// configured, log in first so a private base image can be pulled.
pub async fn create_image(
    engine: &dyn ContainerEngine,
    root: &Path,
    manifest: &str,
    name: &str,
    tags: &[String],
    registry: Option<&RegistryConfig>,
    sink: &dyn ProgressSink,
) -> EngineResult<EngineImage> {
    if let Some(registry) = registry {
        if registry.username.is_some() {
            sink.on_debug(&format!("logging in to registry {}", registry.url));
            engine.login(registry).await?;
            sink.on_progress(&format!("Logged in to registry {}", registry.url));
        }
    }

    sink.on_progress(&format!("Building {name}"));
    engine.build(root, manifest, name).await?;

    for tag in tags {
        sink.on_progress(&format!("Adding tag {tag} to {name}"));
        engine.tag(name, name, tag).await?;
    }

    engine.inspect(name).await
}

/// Tag the image under its registry repositories and push every requested tag
/// in order, returning the pushed `repo:tag` URLs. With a username the image
/// gets both a short (`user/name`) and a full (`registry/user/name`) alias so
/// it can be pulled either way. Tags already pushed when a later one fails are
/// left in place; the registry is authoritative.
pub async fn push_image(
    engine: &dyn ContainerEngine,
    image_name: &str,
    tags: &[String],
    registry: &RegistryConfig,
    sink: &dyn ProgressSink,
) -> EngineResult<Vec<String>> {
    let registry_url = registry.url.trim_end_matches('/');
    sink.on_debug(&format!("tagging {image_name} for upload to {registry_url}"));

    let full_repo = match &registry.username {
        Some(username) => {
            let username = username.trim_end_matches('/');
            sink.on_debug(&format!("logging in to registry {username}@{registry_url}"));
            engine.login(registry).await?;
            sink.on_progress(&format!("Logged in to registry {username}@{registry_url}"));

            let short_repo = format!("{username}/{image_name}");
            for tag in tags {
                sink.on_progress(&format!("Adding registry tag {short_repo}:{tag}"));
                engine.tag(image_name, &short_repo, tag).await?;
            }

            let full_repo = format!("{registry_url}/{username}/{image_name}");
            for tag in tags {
                sink.on_progress(&format!("Adding registry tag {full_repo}:{tag}"));
                engine.tag(image_name, &full_repo, tag).await?;
            }
            full_repo
        }
        None => {
            let full_repo = format!("{registry_url}/{image_name}");
            for tag in tags {
                sink.on_progress(&format!("Adding registry tag {full_repo}:{tag}"));
                engine.tag(image_name, &full_repo, tag).await?;
            }
            full_repo
        }
    };

    let mut urls = Vec::with_capacity(tags.len());
    for tag in tags {
        sink.on_progress(&format!("Pushing image {full_repo}:{tag} ..."));
        engine.push(&full_repo, tag, registry).await?;
        urls.push(format!("{full_repo}:{tag}"));
    }

    Ok(urls)
}
