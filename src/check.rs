//! Import check: runs uploaded code in a subprocess, never in-process.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

/// Wall-clock limit for the whole check. Imports either load quickly or hang;
/// a hang must not stall the pipeline.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const CHECKER_FILE: &str = "check_imports.py";

/// Runs inside the disposable environment's interpreter. Loads each requested
/// import and reports the runtime registry's contents as a single JSON object
/// on stdout, exiting 0 whether the imports loaded or not. A non-zero exit
/// means the checker itself broke, not the package.
const CHECKER_SCRIPT: &str = r#"
import importlib
import json
import sys


def main(imports):
    try:
        from jobforge_runtime import registry
        for name in imports:
            importlib.import_module(name)
        payload = {
            "result": "success",
            "imports": imports,
            "jobs": registry.job_names(),
            "tasks": registry.task_names(),
        }
    except Exception as exc:
        payload = {"result": "error", "imports": imports, "error": str(exc)}
    print(json.dumps(payload))
    return 0


if __name__ == "__main__":
    sys.exit(main(sys.argv[1:]))
"#;

#[derive(Debug, Deserialize)]
pub struct CheckReport {
    pub result: String,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Run the checker under `python`, with the package root on the interpreter's
/// module search path so imports resolve against the uploaded code. The
/// subprocess is killed when `timeout` expires.
pub async fn run_check(
    python: &Path,
    script_dir: &Path,
    package_root: &Path,
    imports: &[String],
    timeout: Duration,
) -> Result<CheckReport> {
    let script_path = script_dir.join(CHECKER_FILE);
    fs::write(&script_path, CHECKER_SCRIPT.trim_start()).await?;

    debug!(
        "checking imports {} under {}",
        imports.join(","),
        package_root.display()
    );

    let mut command = Command::new(python);
    command
        .arg(&script_path)
        .args(imports)
        .env("PYTHONPATH", package_root)
        .current_dir(package_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn()?;

    // Dropping the in-flight future on expiry kills the child with it.
    let output = match time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::CheckTimeout {
                imports: imports.join(","),
                seconds: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(Error::CheckProtocol {
            reason: format!(
                "checker exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let report: CheckReport =
        serde_json::from_slice(&output.stdout).map_err(|err| Error::CheckProtocol {
            reason: format!("unparseable checker output: {err}"),
        })?;

    match report.result.as_str() {
        "success" => Ok(report),
        "error" => Err(Error::ImportFailed {
            imports: imports.join(","),
            message: report
                .error
                .unwrap_or_else(|| "unspecified import error".to_string()),
        }),
        other => Err(Error::CheckProtocol {
            reason: format!("unexpected checker result {other:?}"),
        }),
    }
}
