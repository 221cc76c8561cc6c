//! External inference worker invocation.
//!
//! Each call stages the encoded image into a unique temp file, runs the
//! worker executable once, and buffers stdout/stderr fully before mapping
//! the outcome. There is no process reuse: every invocation pays the full
//! process-start cost, trading latency for isolation.

use std::{io, path::Path, time::Instant};

use tempfile::Builder;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::detect::{config::WorkerConfig, data::DetectionResponse};

/// Failure taxonomy for one dispatched detection request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to start detection process: {0}")]
    WorkerSpawnFailed(#[source] io::Error),
    #[error("worker exited with code {code}")]
    WorkerNonZeroExit { code: i32, stderr: String },
    #[error("failed to parse worker output")]
    ResultParseFailed { raw: String },
    #[error("failed to stage image payload: {0}")]
    TempFile(#[source] io::Error),
    #[error("detection queue is full")]
    Overloaded,
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// Run one worker invocation for `image`.
///
/// The temp artifact is removed on every outcome branch; a removal failure
/// is logged and swallowed so it can never mask the detection outcome.
pub async fn run(config: &WorkerConfig, image: &[u8]) -> Result<DetectionResponse, DispatchError> {
    let file = Builder::new()
        .prefix("detect-")
        .suffix(".jpg")
        .tempfile_in(&config.tmp_dir)
        .map_err(DispatchError::TempFile)?;
    let image_path = file.into_temp_path();

    let outcome = match tokio::fs::write(&image_path, image).await {
        Ok(()) => invoke(config, &image_path).await,
        Err(err) => Err(DispatchError::TempFile(err)),
    };

    if let Err(err) = image_path.close() {
        warn!("failed to remove temp image artifact: {err}");
    }

    outcome
}

async fn invoke(config: &WorkerConfig, image_path: &Path) -> Result<DetectionResponse, DispatchError> {
    let started = Instant::now();
    let output = Command::new(&config.program)
        .arg("--model")
        .arg(&config.model_path)
        .arg("--image")
        .arg(image_path)
        .output()
        .await
        .map_err(|err| {
            metrics::counter!("detect_worker_failures_total", "reason" => "spawn").increment(1);
            DispatchError::WorkerSpawnFailed(err)
        })?;

    metrics::histogram!("detect_worker_seconds").record(started.elapsed().as_secs_f64());

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        metrics::counter!("detect_worker_failures_total", "reason" => "exit").increment(1);
        warn!("worker exited with code {code}: {}", stderr.trim());
        return Err(DispatchError::WorkerNonZeroExit { code, stderr });
    }

    match serde_json::from_slice::<DetectionResponse>(&output.stdout) {
        Ok(response) => {
            debug!("worker returned {} detection(s)", response.detections.len());
            Ok(response)
        }
        Err(_) => {
            metrics::counter!("detect_worker_failures_total", "reason" => "parse").increment(1);
            Err(DispatchError::ResultParseFailed {
                raw: String::from_utf8_lossy(&output.stdout).into_owned(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{os::unix::fs::PermissionsExt, path::PathBuf};

    use super::*;

    fn stub_worker(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub worker");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod stub worker");
        path
    }

    fn config(dir: &Path, program: PathBuf) -> WorkerConfig {
        WorkerConfig {
            program,
            model_path: PathBuf::from("model.pt"),
            tmp_dir: dir.to_path_buf(),
        }
    }

    fn temp_artifacts(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .expect("read tmp dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with("detect-"))
                    .unwrap_or(false)
            })
            .collect()
    }

    #[tokio::test]
    async fn success_parses_detections_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = stub_worker(
            dir.path(),
            r#"echo '{"detections":[{"class":"vest","class_id":2,"confidence":0.8,"bbox":{"x1":1,"y1":2,"x2":3,"y2":4}}]}'"#,
        );

        let response = run(&config(dir.path(), program), b"jpeg-bytes")
            .await
            .expect("detection response");
        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].class, "vest");
        assert!(temp_artifacts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn worker_receives_model_and_image_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args_file = dir.path().join("args.txt");
        let program = stub_worker(
            dir.path(),
            &format!("echo \"$@\" > {}\necho '{{\"detections\":[]}}'", args_file.display()),
        );

        run(&config(dir.path(), program), b"jpeg-bytes")
            .await
            .expect("detection response");

        let args = std::fs::read_to_string(args_file).expect("recorded args");
        assert!(args.starts_with("--model model.pt --image "));
        assert!(args.contains("detect-"));
        assert!(args.trim_end().ends_with(".jpg"));
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = stub_worker(dir.path(), "echo 'model not found' >&2\nexit 1");

        let err = run(&config(dir.path(), program), b"jpeg-bytes")
            .await
            .expect_err("worker failure");
        match err {
            DispatchError::WorkerNonZeroExit { code, stderr } => {
                assert_eq!(code, 1);
                assert!(stderr.contains("model not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(temp_artifacts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn malformed_stdout_surfaces_raw_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = stub_worker(dir.path(), "echo 'not json at all'");

        let err = run(&config(dir.path(), program), b"jpeg-bytes")
            .await
            .expect_err("parse failure");
        match err {
            DispatchError::ResultParseFailed { raw } => assert!(raw.contains("not json at all")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(temp_artifacts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run(
            &config(dir.path(), PathBuf::from("/nonexistent/worker")),
            b"jpeg-bytes",
        )
        .await
        .expect_err("spawn failure");
        assert!(matches!(err, DispatchError::WorkerSpawnFailed(_)));
        assert!(temp_artifacts(dir.path()).is_empty());
    }
}
