//! Remote catalogs of what the hosting service already holds for an application.
//!
//! Both catalogs are immutable snapshots fetched once per deployment attempt.
//! Paths are matched as exact, case-sensitive strings, the same way the remote
//! side keys them.

use crate::utils::errors::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

/// Archive path → CRC-32 of the entry content, as last deployed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryChecksumCatalog(HashMap<String, u32>);

impl EntryChecksumCatalog {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, path: &str) -> Option<u32> {
        self.0.get(path).copied()
    }

    /// True when the remote side already holds `path` with exactly this checksum.
    pub fn holds(&self, path: &str, crc32: u32) -> bool {
        self.get(path) == Some(crc32)
    }

    /// Load a catalog from a JSON object file (`{"path": crc, ...}`).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl FromIterator<(String, u32)> for EntryChecksumCatalog {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Nested entry key (`{jar path}/{inner path}`) → lowercase hex SHA-256.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestedJarHashCatalog(HashMap<String, String>);

impl NestedJarHashCatalog {
    /// Key under which an entry of a nested jar is catalogued.
    pub fn nested_key(jar_path: &str, inner_path: &str) -> String {
        format!("{}/{}", jar_path, inner_path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn holds(&self, jar_path: &str, inner_path: &str, hash: &str) -> bool {
        self.get(&Self::nested_key(jar_path, inner_path)) == Some(hash)
    }

    pub fn insert(&mut self, key: String, hash: String) {
        self.0.insert(key, hash);
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.0
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl FromIterator<(String, String)> for NestedJarHashCatalog {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Where the delta engine gets the remote side's catalogs from.
///
/// Implementations must report failures as errors; an empty catalog means
/// "nothing to diff against" and is only returned when that is actually the
/// remote answer.
pub trait CatalogSource {
    fn fetch_checksums(
        &self,
        app_id: &str,
    ) -> impl Future<Output = Result<EntryChecksumCatalog>> + Send;

    /// `local` carries the nested hashes of the archive about to be diffed.
    fn fetch_jar_hashes(
        &self,
        app_id: &str,
        local: &NestedJarHashCatalog,
    ) -> impl Future<Output = Result<NestedJarHashCatalog>> + Send;
}

/// Catalogs known up front, e.g. loaded from JSON files for an offline diff.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogSource {
    pub checksums: EntryChecksumCatalog,
    pub jar_hashes: NestedJarHashCatalog,
}

impl StaticCatalogSource {
    pub fn new(checksums: EntryChecksumCatalog, jar_hashes: NestedJarHashCatalog) -> Self {
        Self {
            checksums,
            jar_hashes,
        }
    }

    /// Load from JSON files. A missing jar-hash file means an empty catalog.
    pub fn from_files(checksums: &Path, jar_hashes: Option<&Path>) -> Result<Self> {
        let checksums = EntryChecksumCatalog::from_json_file(checksums).map_err(|e| {
            DeployError::CatalogFetch {
                catalog: "checksum",
                reason: format!("{}: {}", checksums.display(), e),
            }
        })?;
        let jar_hashes = match jar_hashes {
            Some(path) => NestedJarHashCatalog::from_json_file(path).map_err(|e| {
                DeployError::CatalogFetch {
                    catalog: "jar hash",
                    reason: format!("{}: {}", path.display(), e),
                }
            })?,
            None => NestedJarHashCatalog::default(),
        };
        Ok(Self::new(checksums, jar_hashes))
    }
}

impl CatalogSource for StaticCatalogSource {
    async fn fetch_checksums(&self, _app_id: &str) -> Result<EntryChecksumCatalog> {
        Ok(self.checksums.clone())
    }

    /// Answers like the remote side does: only the known entries that the
    /// local archive also has.
    async fn fetch_jar_hashes(
        &self,
        _app_id: &str,
        local: &NestedJarHashCatalog,
    ) -> Result<NestedJarHashCatalog> {
        Ok(self
            .jar_hashes
            .as_map()
            .iter()
            .filter(|(key, _)| local.get(key).is_some())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
