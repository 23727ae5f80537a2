//! Dataset upload to OSF storage, with a local CSV fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::UploadError;
use crate::experiment_config::UploadSettings;
use crate::export::{CsvLayout, export_file_name, to_csv};
use crate::orchestrator::state::ExperimentState;

/// One file to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_name: String,
    pub csv: String,
}

impl UploadRequest {
    /// The upload-layout CSV of `state`, named for the participant and `date`.
    pub fn from_state(state: &ExperimentState, date: NaiveDate) -> Self {
        Self {
            file_name: export_file_name(state.participant_id(), date),
            csv: to_csv(state, CsvLayout::Upload),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub file_name: String,
    /// Download link reported by the provider, when it sends one.
    pub download_url: Option<String>,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError>;
}

/// `PUT`s the CSV into a node's osfstorage provider.
pub struct OsfUploader {
    client: reqwest::Client,
    settings: UploadSettings,
}

impl OsfUploader {
    pub fn new(settings: UploadSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    /// Token and target node, or the reason they are unavailable.
    fn credentials(&self) -> Result<(&str, &str), UploadError> {
        let token = self
            .settings
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| UploadError::MissingCredentials("no upload token configured".into()))?;
        let node = self
            .settings
            .target_node()
            .ok_or_else(|| UploadError::MissingCredentials("no project id configured".into()))?;
        Ok((token, node))
    }

    pub fn endpoint(&self, node: &str) -> String {
        format!(
            "{}/v1/resources/{}/providers/osfstorage/",
            self.settings.base_url.trim_end_matches('/'),
            node
        )
    }
}

#[async_trait]
impl Uploader for OsfUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let (token, node) = self.credentials()?;
        let url = self.endpoint(node);

        let response = self
            .client
            .put(&url)
            .query(&[("name", request.file_name.as_str()), ("kind", "file")])
            .bearer_auth(token)
            .header(CONTENT_TYPE, "text/csv")
            .body(request.csv.clone())
            .send()
            .await
            .map_err(UploadError::Transport)?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("upload failed")
                        .to_string()
                });
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(UploadReceipt {
            file_name: request.file_name.clone(),
            download_url: body
                .pointer("/data/links/download")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// What happened to the dataset at the end of a session.
#[derive(Debug)]
pub enum UploadOutcome {
    Uploaded(UploadReceipt),
    /// The upload failed; the CSV was written to `path` instead.
    SavedLocally { path: PathBuf, error: UploadError },
    /// Neither the upload nor the local copy succeeded.
    Lost {
        error: UploadError,
        fallback_error: anyhow::Error,
    },
    /// The upload was triggered by an earlier run that did not report back.
    /// The CSV was written to `path` for a manual upload.
    Deferred { path: PathBuf },
}

/// Upload `request`, writing it into `fallback_dir` if the upload fails.
pub async fn upload_with_fallback(
    uploader: &dyn Uploader,
    request: &UploadRequest,
    fallback_dir: &Path,
) -> UploadOutcome {
    match uploader.upload(request).await {
        Ok(receipt) => {
            info!(
                file = %receipt.file_name,
                download = receipt.download_url.as_deref().unwrap_or("-"),
                "Dataset uploaded"
            );
            UploadOutcome::Uploaded(receipt)
        }
        Err(error) => {
            warn!(error = %error, retryable = error.is_retryable(), "Upload failed; saving locally");
            match save_locally(request, fallback_dir) {
                Ok(path) => UploadOutcome::SavedLocally { path, error },
                Err(fallback_error) => UploadOutcome::Lost {
                    error,
                    fallback_error,
                },
            }
        }
    }
}

/// Write the request's CSV into `dir` under its upload file name.
pub fn save_locally(request: &UploadRequest, dir: &Path) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(&request.file_name);
    std::fs::write(&path, &request.csv)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Run the upload in the background. Phase progression never waits on it;
/// the host joins the handle before exiting.
pub fn spawn_upload(
    uploader: Arc<dyn Uploader>,
    request: UploadRequest,
    fallback_dir: PathBuf,
) -> JoinHandle<UploadOutcome> {
    tokio::spawn(async move { upload_with_fallback(uploader.as_ref(), &request, &fallback_dir).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseId;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct RecordingUploader {
        calls: Mutex<Vec<String>>,
        fail_with: Option<u16>,
    }

    #[async_trait]
    impl Uploader for RecordingUploader {
        async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
            self.calls.lock().unwrap().push(request.file_name.clone());
            match self.fail_with {
                Some(status) => Err(UploadError::Rejected {
                    status,
                    message: "nope".into(),
                }),
                None => Ok(UploadReceipt {
                    file_name: request.file_name.clone(),
                    download_url: None,
                }),
            }
        }
    }

    fn request() -> UploadRequest {
        let state = ExperimentState::new("p-42", PhaseId::Consent);
        UploadRequest::from_state(&state, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap())
    }

    #[test]
    fn test_request_from_state() {
        let req = request();
        assert_eq!(req.file_name, "experiment-data-p-42-2025-01-02.csv");
        assert!(req.csv.starts_with("participant_id,phase,trial_number"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_network() {
        let uploader = OsfUploader::new(UploadSettings {
            base_url: "http://127.0.0.1:9".into(),
            project_id: None,
            node_id: None,
            token: Some("t".into()),
        });
        let err = uploader.upload(&request()).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingCredentials(_)));

        let uploader = OsfUploader::new(UploadSettings {
            base_url: "http://127.0.0.1:9".into(),
            project_id: Some("abcde".into()),
            node_id: None,
            token: None,
        });
        let err = uploader.upload(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_endpoint_prefers_node_id() {
        let uploader = OsfUploader::new(UploadSettings {
            base_url: "https://files.example.org/".into(),
            project_id: Some("proj".into()),
            node_id: Some("node".into()),
            token: Some("t".into()),
        });
        let (_, node) = uploader.credentials().unwrap();
        assert_eq!(node, "node");
        assert_eq!(
            uploader.endpoint(node),
            "https://files.example.org/v1/resources/node/providers/osfstorage/"
        );
    }

    #[tokio::test]
    async fn test_failure_writes_fallback_file() {
        let dir = tempdir().unwrap();
        let uploader = RecordingUploader {
            calls: Mutex::new(Vec::new()),
            fail_with: Some(503),
        };
        let outcome = upload_with_fallback(&uploader, &request(), dir.path()).await;
        match outcome {
            UploadOutcome::SavedLocally { path, error } => {
                assert!(path.exists());
                assert!(error.is_retryable());
            }
            other => panic!("Expected SavedLocally, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawned_upload_succeeds_once() {
        let dir = tempdir().unwrap();
        let uploader = Arc::new(RecordingUploader {
            calls: Mutex::new(Vec::new()),
            fail_with: None,
        });
        let handle = spawn_upload(uploader.clone(), request(), dir.path().to_path_buf());
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded(_)));
        assert_eq!(uploader.calls.lock().unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
