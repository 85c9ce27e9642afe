//! One deployment attempt: pick the payload, upload it, clean up after it.

use crate::api::types::DeployArchiveResponse;
use crate::archive::ArchiveKind;
use crate::catalog::CatalogSource;
use crate::delta::{DeltaOrchestrator, DeltaSettings};
use crate::utils::errors::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Everything the user asked for in one deploy command.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub app_id: String,
    pub archive: PathBuf,
    pub kind: ArchiveKind,
    pub environment: Option<String>,
    pub description: Option<String>,
    /// Source archive uploaded alongside the application archive
    pub src_archive: Option<PathBuf>,
    pub create: bool,
    pub delta: bool,
    pub parameters: BTreeMap<String, String>,
    pub variables: BTreeMap<String, String>,
}

impl DeployRequest {
    /// A request with the archive kind taken from the file extension.
    pub fn new(app_id: impl Into<String>, archive: impl Into<PathBuf>) -> Self {
        let archive = archive.into();
        Self {
            app_id: app_id.into(),
            kind: ArchiveKind::from_path(&archive),
            archive,
            environment: None,
            description: None,
            src_archive: None,
            create: false,
            delta: true,
            parameters: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }
}

/// Sends the chosen payload to the hosting service.
pub trait Uploader {
    /// `payload` is either the request's archive or a delta synthesized from it.
    fn upload(
        &self,
        request: &DeployRequest,
        payload: &Path,
        is_delta: bool,
    ) -> impl Future<Output = Result<DeployArchiveResponse>> + Send;
}

#[derive(Debug, Clone)]
pub struct DeployReport {
    pub response: DeployArchiveResponse,
    pub uploaded_path: PathBuf,
    pub uploaded_bytes: u64,
    pub archive_bytes: u64,
    pub delta: bool,
}

/// Deploy `request.archive`, uploading a delta when the remote side allows it.
///
/// Delta archives created for the attempt are deleted whether the upload
/// succeeds or not.
pub async fn deploy_archive<C>(
    client: &C,
    request: &DeployRequest,
    settings: &DeltaSettings,
) -> Result<DeployReport>
where
    C: CatalogSource + Uploader + Sync,
{
    let attempt = Uuid::new_v4();
    let span = tracing::info_span!("deploy", app_id = %request.app_id, %attempt);

    async move {
        let archive_bytes = tokio::fs::metadata(&request.archive).await?.len();

        let orchestrator = DeltaOrchestrator::new(client, settings);
        let prepared = orchestrator
            .prepare_payload(&request.archive, &request.app_id, request.delta, request.kind)
            .await?;

        let payload = prepared.payload.path().to_path_buf();
        let is_delta = prepared.payload.is_delta();
        let uploaded_bytes = tokio::fs::metadata(&payload).await?.len();

        info!(
            "Deploying {} ({} of {} bytes{})",
            request.archive.display(),
            uploaded_bytes,
            archive_bytes,
            if is_delta { ", delta" } else { "" }
        );

        let result = client.upload(request, &payload, is_delta).await;
        let removed = prepared.cleanup.release();
        if removed > 0 {
            info!("Removed {} temporary delta archive(s)", removed);
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!("Upload failed: {}", e);
                return Err(e);
            }
        };

        info!("Application {} deployed: {}", response.id, response.url);
        Ok(DeployReport {
            response,
            uploaded_path: payload,
            uploaded_bytes,
            archive_bytes,
            delta: is_delta,
        })
    }
    .instrument(span)
    .await
}
