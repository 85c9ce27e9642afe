//! Two-stage delta orchestration.
//!
//! Runs the entry-level diff, then the nested-jar diff on whatever archive is
//! current, and decides which file gets uploaded. Every synthesized archive is
//! registered in a [`CleanupList`] the moment it exists; a stage-1 delta that
//! gets superseded is deleted right away, everything else goes when the list
//! is released or dropped.

use crate::archive::{build_delta, build_nested_delta, local_jar_hashes, ArchiveKind, DeltaArchive};
use crate::catalog::CatalogSource;
use crate::utils::errors::{DeployError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Knobs for delta preparation that come from configuration.
#[derive(Debug, Clone)]
pub struct DeltaSettings {
    /// Archive kinds the remote side can reassemble from a delta.
    pub delta_kinds: Vec<ArchiveKind>,
    /// Where synthesized archives go. Defaults to the archive's own directory.
    pub work_dir: Option<PathBuf>,
}

impl Default for DeltaSettings {
    fn default() -> Self {
        Self {
            delta_kinds: vec![ArchiveKind::War],
            work_dir: None,
        }
    }
}

impl DeltaSettings {
    pub fn supports(&self, kind: ArchiveKind) -> bool {
        self.delta_kinds.contains(&kind)
    }
}

/// The archive handed to the upload step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentPayload {
    /// The local archive itself; nothing could be diffed away.
    Original(PathBuf),
    Delta(DeltaArchive),
}

impl DeploymentPayload {
    pub fn path(&self) -> &Path {
        match self {
            DeploymentPayload::Original(path) => path,
            DeploymentPayload::Delta(delta) => &delta.path,
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, DeploymentPayload::Delta(_))
    }
}

/// Synthesized archives awaiting deletion.
///
/// Files are deleted by [`CleanupList::release`], or on drop if the list was
/// never released, so an early return or `?` cannot leak them.
#[derive(Debug, Default)]
pub struct CleanupList {
    files: Vec<PathBuf>,
}

impl CleanupList {
    fn register(&mut self, path: PathBuf) {
        debug!("Registered for cleanup: {}", path.display());
        self.files.push(path);
    }

    /// Delete `path` now and deregister it. On failure the file stays
    /// registered, so `release` or drop tries again.
    fn discard(&mut self, path: &Path) -> std::io::Result<()> {
        remove_if_present(path)?;
        self.files.retain(|p| p != path);
        Ok(())
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Delete every registered file. Returns how many were removed.
    pub fn release(mut self) -> usize {
        self.delete_all()
    }

    /// Disarm the list and hand the files over to the caller.
    pub fn keep(mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.files)
    }

    fn delete_all(&mut self) -> usize {
        self.files
            .drain(..)
            .filter(|path| remove_quietly(path))
            .count()
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        if !self.files.is_empty() {
            let removed = self.delete_all();
            debug!("Cleanup on drop removed {} delta archive(s)", removed);
        }
    }
}

/// `Ok(false)` when the file was already gone.
fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted delta archive {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn remove_quietly(path: &Path) -> bool {
    remove_if_present(path).unwrap_or_else(|e| {
        warn!("Failed to delete delta archive {}: {}", path.display(), e);
        false
    })
}

/// Payload chosen for upload plus the files to delete once it is consumed.
#[derive(Debug)]
pub struct PreparedPayload {
    pub payload: DeploymentPayload,
    pub cleanup: CleanupList,
}

/// Progress through the two stages.
#[derive(Debug)]
enum Candidate {
    NoDelta,
    Stage1(DeltaArchive),
    Stage2(DeltaArchive),
}

impl Candidate {
    fn path<'a>(&'a self, original: &'a Path) -> &'a Path {
        match self {
            Candidate::NoDelta => original,
            Candidate::Stage1(delta) | Candidate::Stage2(delta) => &delta.path,
        }
    }

    /// Move to the nested delta. A synthesized predecessor is useless from
    /// here on and is deleted immediately.
    fn supersede(self, mut next: DeltaArchive, cleanup: &mut CleanupList) -> Candidate {
        match self {
            Candidate::NoDelta => {}
            Candidate::Stage1(previous) | Candidate::Stage2(previous) => {
                info!("Superseding delta archive {}", previous.path.display());
                if let Err(e) = cleanup.discard(&previous.path) {
                    warn!(
                        "Could not delete superseded delta archive {} (left for cleanup): {}",
                        previous.path.display(),
                        e
                    );
                }
                next.superseded_previous = true;
            }
        }
        cleanup.register(next.path.clone());
        Candidate::Stage2(next)
    }

    fn into_payload(self, original: &Path) -> DeploymentPayload {
        match self {
            Candidate::NoDelta => DeploymentPayload::Original(original.to_path_buf()),
            Candidate::Stage1(delta) | Candidate::Stage2(delta) => DeploymentPayload::Delta(delta),
        }
    }
}

fn catalog_failure(catalog: &'static str, err: DeployError) -> DeployError {
    match err {
        DeployError::CatalogFetch { .. } => err,
        other => DeployError::CatalogFetch {
            catalog,
            reason: other.to_string(),
        },
    }
}

/// Sequences the entry diff and the nested-jar diff for one deployment attempt.
pub struct DeltaOrchestrator<'a, S> {
    source: &'a S,
    settings: &'a DeltaSettings,
}

impl<'a, S: CatalogSource + Sync> DeltaOrchestrator<'a, S> {
    pub fn new(source: &'a S, settings: &'a DeltaSettings) -> Self {
        Self { source, settings }
    }

    fn output_dir(&self, local_archive: &Path) -> PathBuf {
        match &self.settings.work_dir {
            Some(dir) => dir.clone(),
            None => match local_archive.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }

    /// Work out what to upload for `local_archive`.
    ///
    /// On error, any delta archive created along the way has already been
    /// deleted. `local_archive` itself is never modified or removed.
    pub async fn prepare_payload(
        &self,
        local_archive: &Path,
        app_id: &str,
        delta_enabled: bool,
        kind: ArchiveKind,
    ) -> Result<PreparedPayload> {
        let mut cleanup = CleanupList::default();

        if !delta_enabled || !self.settings.supports(kind) {
            info!(
                "Delta upload not used for {} ({}), uploading full archive",
                local_archive.display(),
                if delta_enabled { "unsupported archive kind" } else { "disabled" }
            );
            return Ok(PreparedPayload {
                payload: DeploymentPayload::Original(local_archive.to_path_buf()),
                cleanup,
            });
        }

        let output_dir = self.output_dir(local_archive);
        let mut candidate = Candidate::NoDelta;

        // Stage 1: top-level entries
        info!("Fetching existing checksums for {}", app_id);
        let checksums = self
            .source
            .fetch_checksums(app_id)
            .await
            .map_err(|e| catalog_failure("checksum", e))?;

        if checksums.is_empty() {
            info!("No existing checksums, keeping full archive for stage 1");
        } else {
            debug!("Remote holds {} entries", checksums.len());
            let source = local_archive.to_path_buf();
            let out = output_dir.clone();
            let stage1 =
                tokio::task::spawn_blocking(move || build_delta(&source, &checksums, &out))
                    .await??;
            if let Some(delta) = stage1 {
                cleanup.register(delta.path.clone());
                candidate = Candidate::Stage1(delta);
            }
        }

        // Stage 2: entries inside nested jars of whatever is current
        let current = candidate.path(local_archive).to_path_buf();
        let hashed = current.clone();
        let local_hashes = tokio::task::spawn_blocking(move || local_jar_hashes(&hashed)).await??;

        info!(
            "Fetching existing jar hashes for {} ({} local nested entries)",
            app_id,
            local_hashes.len()
        );
        let jar_hashes = self
            .source
            .fetch_jar_hashes(app_id, &local_hashes)
            .await
            .map_err(|e| catalog_failure("jar hash", e))?;

        if jar_hashes.is_empty() {
            info!("No existing jar entries");
        } else {
            let out = output_dir.clone();
            let stage2 = tokio::task::spawn_blocking(move || {
                build_nested_delta(&current, &jar_hashes, &out)
            })
            .await??;
            if let Some(delta) = stage2 {
                candidate = candidate.supersede(delta, &mut cleanup);
            }
        }

        let payload = candidate.into_payload(local_archive);
        if payload.is_delta() {
            info!("Uploading delta archive: {}", payload.path().display());
        }

        Ok(PreparedPayload { payload, cleanup })
    }
}
