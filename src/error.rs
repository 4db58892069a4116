use crate::engine::EngineError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure class, for callers that route on it rather than on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Environment,
    Validation,
    Build,
    Publish,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("found {found} of {expected} requested imports under {}; upload is ambiguous or incomplete", .path.display())]
    AmbiguousPackageRoot {
        path: PathBuf,
        found: usize,
        expected: usize,
    },

    #[error("no package root corresponding to '{imports}' in uploaded folder")]
    PackageRootNotFound { imports: String },

    #[error("failed to provision environment at {}: {reason}", .path.display())]
    Provision { path: PathBuf, reason: String },

    #[error("failed to install requirements '{requirements}' (exit {status}):\n{output}")]
    Install {
        requirements: String,
        status: String,
        output: String,
    },

    #[error("import check of '{imports}' timed out after {seconds}s")]
    CheckTimeout { imports: String, seconds: u64 },

    #[error("error importing package '{imports}':\n{message}")]
    ImportFailed { imports: String, message: String },

    #[error("import check produced no readable result: {reason}")]
    CheckProtocol { reason: String },

    #[error("manifest rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("image build failed: {0}")]
    Build(#[source] EngineError),

    #[error("image publish failed: {0}")]
    Publish(#[source] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AmbiguousPackageRoot { .. } | Error::PackageRootNotFound { .. } => {
                ErrorKind::Input
            }
            Error::Provision { .. } | Error::Install { .. } | Error::Io(_) => {
                ErrorKind::Environment
            }
            Error::CheckTimeout { .. } | Error::ImportFailed { .. } | Error::CheckProtocol { .. } => {
                ErrorKind::Validation
            }
            Error::Template(_) | Error::Build(_) => ErrorKind::Build,
            Error::Publish(_) => ErrorKind::Publish,
        }
    }
}
