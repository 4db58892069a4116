use super::{ContainerEngine, EngineError, EngineImage, EngineResult};
use crate::config::RegistryConfig;
use crate::store::archives;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions, TagImageOptions};
use bollard::Docker;
use std::path::Path;
use tokio_stream::StreamExt;
use tracing::debug;

/// Docker Engine API client.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new() -> EngineResult<Self> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }
}

fn credentials(registry: &RegistryConfig) -> DockerCredentials {
    DockerCredentials {
        username: registry.username.clone(),
        password: registry.password.clone(),
        serveraddress: Some(registry.url.clone()),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn build(
        &self,
        context: &Path,
        manifest: &str,
        name: &str,
    ) -> EngineResult<EngineImage> {
        let context_tar = archives::pack_context(context, manifest).await?;

        let options = BuildImageOptions {
            dockerfile: archives::MANIFEST_ENTRY.to_string(),
            t: name.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut build_stream = self.docker.build_image(options, None, Some(context_tar.into()));
        let mut image_id: Option<String> = None;

        while let Some(item) = build_stream.next().await {
            let update = item?;
            if let Some(message) = update.error {
                return Err(EngineError::BuildFailed { message });
            }
            if let Some(line) = update.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!("{line}");
                }
            }
            if let Some(aux) = update.aux {
                if let Some(id) = aux.id {
                    image_id = Some(id);
                }
            }
        }

        match image_id {
            Some(id) => Ok(EngineImage::from_engine_id(&id)),
            None => Err(EngineError::MissingImageId {
                name: name.to_string(),
            }),
        }
    }

    async fn tag(&self, image: &str, repo: &str, tag: &str) -> EngineResult<()> {
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        self.docker.tag_image(image, Some(options)).await?;
        Ok(())
    }

    async fn login(&self, registry: &RegistryConfig) -> EngineResult<()> {
        // The engine API authenticates each request with the credentials it
        // carries; a ping here surfaces an unreachable daemon before any
        // tagging or pushing starts.
        self.docker.ping().await?;
        debug!("registry {} credentials ready", registry.url);
        Ok(())
    }

    async fn push(
        &self,
        repo: &str,
        tag: &str,
        registry: &RegistryConfig,
    ) -> EngineResult<()> {
        let options = PushImageOptions { tag: tag.to_string() };
        let mut push_stream =
            self.docker
                .push_image(repo, Some(options), Some(credentials(registry)));

        while let Some(item) = push_stream.next().await {
            let update = item?;
            if let Some(message) = update.error {
                return Err(EngineError::PushFailed {
                    repo: repo.to_string(),
                    tag: tag.to_string(),
                    message,
                });
            }
            if let Some(status) = update.status {
                debug!("{status}");
            }
        }

        Ok(())
    }

    async fn inspect(&self, name: &str) -> EngineResult<EngineImage> {
        let details = self.docker.inspect_image(name).await?;
        let id = details.id.ok_or_else(|| EngineError::MissingImageId {
            name: name.to_string(),
        })?;
        Ok(EngineImage::from_engine_id(&id).with_repo_tags(details.repo_tags.unwrap_or_default()))
    }
}
