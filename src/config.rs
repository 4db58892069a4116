/// Image every runner build starts from unless the request overrides it.
pub const BASE_IMAGE: &str = "jobforge/runner:latest";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Builder configuration, constructed once at startup and handed to every
/// pipeline. Never mutated afterwards; per-request overrides belong on the
/// request itself.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub base_image: String,
    pub registry: Option<RegistryConfig>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            base_image: BASE_IMAGE.to_string(),
            registry: None,
        }
    }
}
