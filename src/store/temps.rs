use std::env;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// Uniquely-named path under the OS temp dir. Uniqueness is what lets
/// concurrent pipelines provision environments without locking.
pub fn unique_path() -> PathBuf {
    env::temp_dir().join(format!("jobforge-{}", Uuid::now_v7()))
}

pub async fn create_dir() -> std::io::Result<PathBuf> {
    let temp_dir = unique_path();
    fs::create_dir(&temp_dir).await?;
    Ok(temp_dir)
}
