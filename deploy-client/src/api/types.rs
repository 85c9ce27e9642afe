//! Wire types of the hosting API (JSON format).

use crate::catalog::{EntryChecksumCatalog, NestedJarHashCatalog};
use serde::{Deserialize, Serialize};

/// `application.checkSums`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSumsResponse {
    #[serde(rename = "checkSums")]
    pub check_sums: EntryChecksumCatalog,
}

/// `application.jarHashes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JarHashesResponse {
    #[serde(rename = "jarHash")]
    pub jar_hash: NestedJarHashCatalog,
}

/// `application.deployArchive`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployArchiveResponse {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    pub message: String,
}
