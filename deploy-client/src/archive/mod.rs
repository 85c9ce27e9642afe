//! Archive diffing against remote catalogs.
//!
//! Two builders share the plumbing here:
//! - [`entry_diff`] drops top-level entries the remote already holds (CRC-32 match)
//! - [`jar_diff`] prunes entries inside nested jars (SHA-256 match)
//!
//! Directory entries are always carried over and never looked up in a catalog,
//! at both levels.

pub mod entry_diff;
pub mod jar_diff;

#[cfg(test)]
pub(crate) mod testutil;

pub use entry_diff::build_delta;
pub use jar_diff::{build_nested_delta, local_jar_hashes};

use crate::utils::errors::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use zip::{ZipArchive, ZipWriter};

/// Kind of deployable archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    War,
    Ear,
}

impl ArchiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::War => "war",
            ArchiveKind::Ear => "ear",
        }
    }

    /// Guess from the file extension; anything that is not `.ear` deploys as a war.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ear") => ArchiveKind::Ear,
            _ => ArchiveKind::War,
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "war" => Ok(ArchiveKind::War),
            "ear" => Ok(ArchiveKind::Ear),
            other => Err(DeployError::Config(format!(
                "unknown archive kind '{}' (expected war or ear)",
                other
            ))),
        }
    }
}

/// A synthesized archive holding only what the remote side is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaArchive {
    pub path: PathBuf,
    /// Entries written to the delta (including carried-over directories).
    pub entries_written: usize,
    /// Entries left out because the remote already holds them.
    pub entries_omitted: usize,
    /// Set when this delta replaced an earlier synthesized delta.
    pub superseded_previous: bool,
}

pub(crate) type ArchiveReader = ZipArchive<BufReader<File>>;

pub(crate) fn open_archive(path: &Path) -> Result<ArchiveReader> {
    let file = File::open(path)?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| DeployError::from_zip(path, e))
}

/// Output archive backed by a uniquely named temporary file in the output
/// directory. Dropping it before [`DeltaWriter::finish`] removes the file.
pub(crate) struct DeltaWriter {
    zip: ZipWriter<NamedTempFile>,
    path: PathBuf,
}

impl DeltaWriter {
    /// `label` ends up in the file name, e.g. `app-delta-XXXXXX.war`.
    pub(crate) fn create(source: &Path, output_dir: &Path, label: &str) -> Result<Self> {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("archive");
        let suffix = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let tmp = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", stem, label))
            .suffix(&suffix)
            .tempfile_in(output_dir)?;
        let path = tmp.path().to_path_buf();

        Ok(Self {
            zip: ZipWriter::new(tmp),
            path,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn zip(&mut self) -> &mut ZipWriter<NamedTempFile> {
        &mut self.zip
    }

    /// Write the central directory and keep the file on disk.
    pub(crate) fn finish(mut self) -> Result<PathBuf> {
        let tmp = self
            .zip
            .finish()
            .map_err(|e| DeployError::from_zip(&self.path, e))?;
        let (_file, path) = tmp.keep().map_err(|e| DeployError::Io(e.error))?;
        Ok(path)
    }
}
