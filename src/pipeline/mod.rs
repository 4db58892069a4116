//! Build orchestration: validate the uploaded package in a disposable
//! environment, then build and optionally push the runner image.

use crate::check::{self, CheckReport};
use crate::config::BuilderConfig;
use crate::engine::{self, ContainerEngine};
use crate::error::{Error, Result};
use crate::manifest;
use crate::package::{self, BuildRequest};
use crate::progress::ProgressSink;
use crate::store::temps;
use crate::venv::Venv;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Validating,
    Validated,
    Building,
    Built,
    Pushing,
    Pushed,
    Errored,
}

/// Everything discovered and produced along the way. Populated stage by
/// stage, read-only once `build()` returns.
#[derive(Debug, Default)]
pub struct BuildState {
    pub package_root: Option<PathBuf>,
    pub manifest: Option<String>,
    pub jobs: Vec<String>,
    pub tasks: Vec<String>,
    pub image_id: Option<String>,
    pub image_short_id: Option<String>,
    pub image_urls: Vec<String>,
}

/// What a successful build hands back across the boundary: identifiers, the
/// applied tags and, after a push, the registry URLs.
#[derive(Debug, Clone, Serialize)]
pub struct ImageArtifact {
    pub image_name: String,
    pub id: String,
    pub short_id: String,
    pub tags: Vec<String>,
    pub urls: Vec<String>,
}

/// One pipeline instance per build attempt. A failed pipeline stays in its
/// error state; retries get a fresh instance so state never mixes between
/// attempts.
pub struct BuildPipeline {
    request: BuildRequest,
    config: BuilderConfig,
    engine: Arc<dyn ContainerEngine>,
    sink: Arc<dyn ProgressSink>,
    phase: Phase,
    state: BuildState,
}

impl BuildPipeline {
    pub fn new(
        mut request: BuildRequest,
        config: BuilderConfig,
        engine: Arc<dyn ContainerEngine>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        if request.tags.is_empty() {
            request.tags = vec!["latest".to_string()];
        }

        Self {
            request,
            config,
            engine,
            sink,
            phase: Phase::Created,
            state: BuildState::default(),
        }
    }

    pub fn request(&self) -> &BuildRequest {
        &self.request
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    fn progress(&self, message: &str) {
        self.sink.on_progress(message);
        info!("{message}");
    }

    fn debug(&self, message: &str) {
        self.sink.on_debug(message);
        debug!("{message}");
    }

    fn fail(&mut self, err: Error) -> Error {
        self.phase = Phase::Errored;
        error!("{err}");
        self.sink.on_progress(&format!("Error : {err}"));
        err
    }

    /// Locate the package root, provision a fresh environment, install the
    /// requirements and run the import check. The environment is destroyed on
    /// every exit path; nothing from validation is reused by `build()`.
    pub async fn validate(&mut self) -> Result<()> {
        assert!(
            self.phase == Phase::Created,
            "validate() may only run once on a fresh pipeline"
        );
        self.phase = Phase::Validating;

        match self.run_validation().await {
            Ok(()) => {
                self.phase = Phase::Validated;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn run_validation(&mut self) -> Result<()> {
        self.progress("Starting validation.");
        self.progress(&format!(
            "Searching for package root folder to import {}",
            self.request.imports.join(", ")
        ));

        let package_root = package::find_package_root(&self.request.folder, &self.request.imports)?;
        self.progress(&format!("Found package root in {}", package_root.display()));
        self.state.package_root = Some(package_root.clone());

        self.progress("Creating isolated environment.");
        let venv = Venv::at(temps::create_dir().await?);

        let outcome = self.check_package(&venv, &package_root).await;
        if let Err(err) = venv.destroy().await {
            warn!("failed to remove environment {}: {err}", venv.path().display());
        }
        let report = outcome?;

        self.state.jobs = report.jobs;
        self.state.tasks = report.tasks;
        self.progress(&format!(
            "Successful import of {} - jobs found: {}",
            self.request.imports.join(","),
            self.state.jobs.join(", ")
        ));
        self.progress("Validation finished.");
        Ok(())
    }

    async fn check_package(&self, venv: &Venv, package_root: &Path) -> Result<CheckReport> {
        venv.provision().await?;

        self.progress("Installing requirements into environment...");
        venv.install(&self.request.requirements, self.sink.as_ref())
            .await?;
        self.progress("Environment ready. Requirements installed.");

        self.debug(&format!(
            "Testing import of {}",
            self.request.imports.join(",")
        ));
        check::run_check(
            &venv.python(),
            venv.path(),
            package_root,
            &self.request.imports,
            check::CHECK_TIMEOUT,
        )
        .await
    }

    /// Render the manifest, drive the image build and tagging, then push when
    /// a registry is configured. Requires a validated pipeline.
    pub async fn build(&mut self) -> Result<ImageArtifact> {
        assert!(
            self.phase == Phase::Validated,
            "build() requires a validated pipeline"
        );
        self.phase = Phase::Building;

        match self.run_build().await {
            Ok(artifact) => Ok(artifact),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn run_build(&mut self) -> Result<ImageArtifact> {
        let root = self
            .state
            .package_root
            .clone()
            .expect("validated pipeline has a package root");
        let image_name = self.request.image_name.clone();
        let tags = self.request.tags.clone();
        let base_image = self
            .request
            .base_image
            .clone()
            .unwrap_or_else(|| self.config.base_image.clone());
        let registry = self.config.registry.clone();

        self.progress("Starting build.");
        self.progress(&format!("Building manifest for {image_name}"));

        let build_hook = root.join(manifest::HOOK_SCRIPT).is_file();
        let manifest_text = manifest::render(
            &base_image,
            &self.request.os_packages,
            &self.request.requirements,
            build_hook,
            &self.request.imports,
        )?;
        self.state.manifest = Some(manifest_text.clone());

        let image = engine::create_image(
            self.engine.as_ref(),
            &root,
            &manifest_text,
            &image_name,
            &tags,
            registry.as_ref(),
            self.sink.as_ref(),
        )
        .await
        .map_err(Error::Build)?;

        self.state.image_id = Some(image.id.clone());
        self.state.image_short_id = Some(image.short_id.clone());
        self.phase = Phase::Built;
        self.progress(&format!("Image {image_name} - build success."));

        if let Some(registry) = &registry {
            self.phase = Phase::Pushing;
            let urls = engine::push_image(
                self.engine.as_ref(),
                &image_name,
                &tags,
                registry,
                self.sink.as_ref(),
            )
            .await
            .map_err(Error::Publish)?;
            self.state.image_urls = urls;
            self.phase = Phase::Pushed;
        }

        self.progress("Build finished.");
        Ok(ImageArtifact {
            image_name,
            id: image.id,
            short_id: image.short_id,
            tags,
            urls: self.state.image_urls.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::engine::testing::{EngineCall, RecordingEngine};
    use crate::error::ErrorKind;
    use crate::progress::{BufferSink, NullSink};
    use tempfile::TempDir;

    fn request(folder: PathBuf, tags: Vec<&str>) -> BuildRequest {
        BuildRequest {
            folder,
            image_name: "app".to_string(),
            tags: tags.into_iter().map(|tag| tag.to_string()).collect(),
            imports: vec!["mypkg.job".to_string()],
            requirements: vec!["requests".to_string()],
            os_packages: Vec::new(),
            base_image: None,
        }
    }

    fn validated(
        engine: Arc<RecordingEngine>,
        config: BuilderConfig,
        folder: &Path,
        tags: Vec<&str>,
    ) -> BuildPipeline {
        let mut pipeline = BuildPipeline::new(
            request(folder.to_path_buf(), tags),
            config,
            engine,
            Arc::new(NullSink),
        );
        pipeline.phase = Phase::Validated;
        pipeline.state.package_root = Some(folder.to_path_buf());
        pipeline.state.jobs = vec!["MyJob".to_string()];
        pipeline
    }

    #[test]
    fn test_empty_tags_default_to_latest() {
        let pipeline = BuildPipeline::new(
            request(PathBuf::from("/tmp/upload"), vec![]),
            BuilderConfig::default(),
            Arc::new(RecordingEngine::new()),
            Arc::new(NullSink),
        );
        assert_eq!(pipeline.request().tags, vec!["latest"]);
    }

    #[test]
    fn test_explicit_tags_kept_in_order() {
        let pipeline = BuildPipeline::new(
            request(PathBuf::from("/tmp/upload"), vec!["v2", "v1"]),
            BuilderConfig::default(),
            Arc::new(RecordingEngine::new()),
            Arc::new(NullSink),
        );
        assert_eq!(pipeline.request().tags, vec!["v2", "v1"]);
    }

    #[tokio::test]
    async fn test_build_without_registry_returns_artifact() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let engine = Arc::new(RecordingEngine::new());
        let mut pipeline = validated(
            Arc::clone(&engine),
            BuilderConfig::default(),
            tmp.path(),
            vec![],
        );

        let artifact = pipeline.build().await.expect("build failed");

        assert_eq!(artifact.tags, vec!["latest"]);
        assert!(artifact.urls.is_empty());
        assert_eq!(artifact.short_id.len(), 12);
        assert_eq!(artifact.image_name, "app");

        let calls = engine.calls();
        assert!(calls.contains(&EngineCall::Build { name: "app".to_string() }));
        assert!(!calls.iter().any(|call| matches!(call, EngineCall::Push { .. })));

        let manifest = pipeline.state().manifest.as_deref().expect("manifest not stored");
        assert!(manifest.starts_with("FROM jobforge/runner:latest"));
        assert!(!manifest.contains("apt-get"));
    }

    #[tokio::test]
    async fn test_build_with_registry_pushes_and_records_urls() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let engine = Arc::new(RecordingEngine::new());
        let config = BuilderConfig {
            registry: Some(RegistryConfig {
                url: "reg.example.com".to_string(),
                username: Some("alice".to_string()),
                password: Some("secret".to_string()),
            }),
            ..BuilderConfig::default()
        };
        let mut pipeline = validated(Arc::clone(&engine), config, tmp.path(), vec!["v1"]);

        let artifact = pipeline.build().await.expect("build failed");

        assert_eq!(artifact.urls, vec!["reg.example.com/alice/app:v1"]);
        assert_eq!(pipeline.state().image_urls, artifact.urls);
        assert!(engine.calls().contains(&EngineCall::Tag {
            image: "app".to_string(),
            repo: "alice/app".to_string(),
            tag: "v1".to_string()
        }));
    }

    #[tokio::test]
    async fn test_build_hook_detected_in_package_root() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        std::fs::write(tmp.path().join("build.sh"), "#!/bin/sh\n").expect("failed to write hook");
        let engine = Arc::new(RecordingEngine::new());
        let mut pipeline = validated(
            Arc::clone(&engine),
            BuilderConfig::default(),
            tmp.path(),
            vec![],
        );

        pipeline.build().await.expect("build failed");

        let manifest = pipeline.state().manifest.as_deref().expect("manifest not stored");
        assert!(manifest.contains("RUN /opt/lib/build.sh"));
    }

    #[tokio::test]
    async fn test_build_failure_is_reported_on_both_channels() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let mut engine = RecordingEngine::new();
        engine.fail_build = Some("no space left on device".to_string());
        let sink = Arc::new(BufferSink::new());

        let mut pipeline = BuildPipeline::new(
            request(tmp.path().to_path_buf(), vec![]),
            BuilderConfig::default(),
            Arc::new(engine),
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
        );
        pipeline.phase = Phase::Validated;
        pipeline.state.package_root = Some(tmp.path().to_path_buf());

        let err = pipeline.build().await.expect_err("build should fail");
        assert_eq!(err.kind(), ErrorKind::Build);
        assert!(err.to_string().contains("no space left on device"));
        assert_eq!(pipeline.phase, Phase::Errored);

        let progress = sink.progress_messages();
        assert!(progress.iter().any(|line| line.starts_with("Error :")));
    }

    #[tokio::test]
    #[should_panic(expected = "build() requires a validated pipeline")]
    async fn test_build_before_validate_is_a_contract_violation() {
        let mut pipeline = BuildPipeline::new(
            request(PathBuf::from("/tmp/upload"), vec![]),
            BuilderConfig::default(),
            Arc::new(RecordingEngine::new()),
            Arc::new(NullSink),
        );
        let _ = pipeline.build().await;
    }

    #[tokio::test]
    async fn test_validate_fails_fast_on_missing_package_root() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let sink = Arc::new(BufferSink::new());
        let mut pipeline = BuildPipeline::new(
            request(tmp.path().to_path_buf(), vec![]),
            BuilderConfig::default(),
            Arc::new(RecordingEngine::new()),
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
        );

        let err = pipeline.validate().await.expect_err("validation should fail");
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(pipeline.phase, Phase::Errored);
        assert!(sink
            .progress_messages()
            .iter()
            .any(|line| line.starts_with("Error :")));
    }

    #[tokio::test]
    #[should_panic(expected = "build() requires a validated pipeline")]
    async fn test_errored_pipeline_rejects_build() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let mut pipeline = BuildPipeline::new(
            request(tmp.path().to_path_buf(), vec![]),
            BuilderConfig::default(),
            Arc::new(RecordingEngine::new()),
            Arc::new(NullSink),
        );
        // Empty upload folder: validation fails and the pipeline is spent.
        let _ = pipeline.validate().await;

        let _ = pipeline.build().await;
    }
}
