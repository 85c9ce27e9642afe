//! HTTP client for the hosting API.
//!
//! Every call goes to the single API endpoint with an `action` query
//! parameter, authenticated with the API key and secret.

pub mod types;

use crate::catalog::{CatalogSource, EntryChecksumCatalog, NestedJarHashCatalog};
use crate::config::ServerConfig;
use crate::deploy::{DeployRequest, Uploader};
use crate::transfer::{
    format_bytes, format_duration, format_speed, ProgressCallback, ProgressStream, ProgressTracker,
};
use crate::utils::errors::{DeployError, Result};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use types::{CheckSumsResponse, DeployArchiveResponse, ErrorEnvelope, JarHashesResponse};

/// How long an uploaded archive stays valid on the server side.
const UPLOAD_EXPIRY_HOURS: i64 = 4;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ServerConfig,
}

impl ApiClient {
    pub fn new(config: ServerConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(DeployError::Config("server url is empty".to_string()));
        }
        if config.api_key.is_empty() || config.secret.is_empty() {
            return Err(DeployError::Config(
                "api_key and secret are required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("deploy-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, config })
    }

    fn request(&self, method: reqwest::Method, action: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, &self.config.url)
            .query(&[
                ("action", action),
                ("format", self.config.format.as_str()),
                ("v", self.config.api_version.as_str()),
            ])
            .basic_auth(&self.config.api_key, Some(&self.config.secret))
    }

    /// Checksums of the top-level entries of the deployed archive.
    pub async fn application_check_sums(&self, app_id: &str) -> Result<EntryChecksumCatalog> {
        let resp = self
            .request(reqwest::Method::GET, "application.checkSums")
            .query(&[("app_id", app_id)])
            .send()
            .await?;

        let body: CheckSumsResponse = read_response(resp).await?;
        debug!("Server reported {} entry checksums", body.check_sums.len());
        Ok(body.check_sums)
    }

    /// Which of `hashes` the server already holds.
    pub async fn application_jar_hashes(
        &self,
        app_id: &str,
        hashes: &NestedJarHashCatalog,
    ) -> Result<NestedJarHashCatalog> {
        let form = Form::new()
            .text("app_id", app_id.to_string())
            .text("hashes", serde_json::to_string(hashes)?);

        let resp = self
            .request(reqwest::Method::POST, "application.jarHashes")
            .multipart(form)
            .send()
            .await?;

        let body: JarHashesResponse = read_response(resp).await?;
        debug!("Server holds {} of {} nested entries", body.jar_hash.len(), hashes.len());
        Ok(body.jar_hash)
    }

    /// Upload `payload` as the new version of `request.app_id`.
    pub async fn application_deploy_archive(
        &self,
        request: &DeployRequest,
        payload: &Path,
    ) -> Result<DeployArchiveResponse> {
        let expires = chrono::Utc::now() + chrono::Duration::hours(UPLOAD_EXPIRY_HOURS);

        let mut form = Form::new()
            .text("app_id", request.app_id.clone())
            .text("archive_type", request.kind.as_str())
            .text("create", request.create.to_string())
            .text("expires", expires.timestamp().to_string())
            .text("parameters", serde_json::to_string(&request.parameters)?)
            .text("variables", serde_json::to_string(&request.variables)?)
            .part("archive", streamed_part(payload, true).await?);

        if let Some(environment) = &request.environment {
            form = form.text("environment", environment.clone());
        }
        if let Some(description) = &request.description {
            form = form.text("description", description.clone());
        }
        if let Some(src) = &request.src_archive {
            form = form.part("src", streamed_part(src, false).await?);
        }

        let resp = self
            .request(reqwest::Method::POST, "application.deployArchive")
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeployError::Upload(e.to_string()))?;

        read_response(resp).await
    }
}

impl CatalogSource for ApiClient {
    async fn fetch_checksums(&self, app_id: &str) -> Result<EntryChecksumCatalog> {
        self.application_check_sums(app_id).await
    }

    async fn fetch_jar_hashes(
        &self,
        app_id: &str,
        local: &NestedJarHashCatalog,
    ) -> Result<NestedJarHashCatalog> {
        if local.is_empty() {
            return Ok(NestedJarHashCatalog::default());
        }
        self.application_jar_hashes(app_id, local).await
    }
}

impl Uploader for ApiClient {
    async fn upload(
        &self,
        request: &DeployRequest,
        payload: &Path,
        is_delta: bool,
    ) -> Result<DeployArchiveResponse> {
        info!(
            "Uploading {} archive {}",
            if is_delta { "delta" } else { "full" },
            payload.display()
        );
        self.application_deploy_archive(request, payload).await
    }
}

/// A multipart file part read from disk as it is sent.
async fn streamed_part(path: &Path, report_progress: bool) -> Result<Part> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());

    let body = if report_progress {
        let tracker = Arc::new(Mutex::new(ProgressTracker::new(len)));
        let callback: ProgressCallback = Arc::new(move |sent| {
            if let Ok(mut tracker) = tracker.lock() {
                let progress = tracker.update(sent).clone();
                if progress.is_complete() {
                    info!(
                        "Sent {} in {} (avg {})",
                        format_bytes(progress.transferred_bytes),
                        format_duration(tracker.elapsed().as_secs()),
                        format_speed(tracker.average_speed())
                    );
                } else {
                    info!(
                        "Uploaded {} / {} ({:.0}%, {}, ETA {})",
                        format_bytes(progress.transferred_bytes),
                        format_bytes(progress.total_bytes),
                        progress.percent_complete,
                        format_speed(progress.bytes_per_second),
                        format_duration(progress.eta_seconds)
                    );
                }
            }
        });
        reqwest::Body::wrap_stream(ProgressStream::new(ReaderStream::new(file), callback))
    } else {
        reqwest::Body::wrap_stream(ReaderStream::new(file))
    };

    Ok(Part::stream_with_length(body, len)
        .file_name(file_name)
        .mime_str("application/octet-stream")?)
}

async fn read_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => DeployError::Api {
                code: envelope.error.code,
                message: envelope.error.message,
            },
            Err(_) => DeployError::Api {
                code: status.as_u16().to_string(),
                message: text,
            },
        });
    }

    Ok(serde_json::from_str(&text)?)
}
