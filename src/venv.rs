//! Disposable Python environments: one per validation run, destroyed on every
//! exit path.

use crate::error::{Error, Result};
use crate::progress::ProgressSink;
use process_stream::{Process, ProcessExt, ProcessItem, StreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Installed into every environment ahead of the requested requirements; it
/// carries the job/task registry the import check reports from.
pub const RUNTIME_REQUIREMENT: &str = "jobforge-runtime";

pub struct Venv {
    path: PathBuf,
}

impl Venv {
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn python(&self) -> PathBuf {
        self.path.join("bin").join("python")
    }

    pub fn pip(&self) -> PathBuf {
        self.path.join("bin").join("pip")
    }

    /// Create the environment. A pre-existing interpreter at the path is
    /// reused as-is.
    pub async fn provision(&self) -> Result<()> {
        if self.python().is_file() {
            debug!("reusing existing environment at {}", self.path.display());
            return Ok(());
        }

        let Some(interpreter) = find_interpreter().await else {
            return Err(Error::Provision {
                path: self.path.clone(),
                reason: "python3 or python not found in PATH".to_string(),
            });
        };

        let output = Command::new(&interpreter)
            .arg("-m")
            .arg("venv")
            .arg(&self.path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Provision {
                path: self.path.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    /// Install the runtime-support requirement plus the requested specifiers,
    /// forwarding every installer line to the debug channel. No timeout here;
    /// large dependency sets take as long as they take. The import check that
    /// follows is the time-bounded stage.
    pub async fn install(&self, requirements: &[String], sink: &dyn ProgressSink) -> Result<()> {
        let mut args = vec!["install".to_string(), RUNTIME_REQUIREMENT.to_string()];
        args.extend(requirements.iter().cloned());

        let mut process = Process::new(self.pip());
        process.args(args);

        let mut stream = process.spawn_and_stream()?;
        let mut captured = Vec::new();
        let mut status = None;

        while let Some(item) = stream.next().await {
            match item {
                ProcessItem::Output(line) | ProcessItem::Error(line) => {
                    sink.on_debug(&line);
                    debug!("{line}");
                    captured.push(line);
                }
                ProcessItem::Exit(code) => status = Some(code),
            }
        }

        match status.as_deref() {
            Some("0") => Ok(()),
            other => Err(Error::Install {
                requirements: requirements.join(" "),
                status: other.unwrap_or("unknown").to_string(),
                output: captured.join("\n"),
            }),
        }
    }

    /// Remove every trace of the environment. Safe to call on a path that was
    /// never provisioned or is already gone.
    pub async fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

async fn find_interpreter() -> Option<PathBuf> {
    for candidate in ["python3", "python"] {
        if let Ok(output) = Command::new(candidate).arg("--version").output().await {
            if output.status.success() {
                return Some(PathBuf::from(candidate));
            }
        }
    }
    None
}
