//! First-level delta: top-level archive entries against the checksum catalog.
//!
//! The checksum used for an entry is the CRC-32 the zip format records for its
//! uncompressed content, which is also what the remote side catalogues.
//! Kept entries are copied raw, so their compressed bytes are not touched.

use super::{open_archive, DeltaArchive, DeltaWriter};
use crate::catalog::EntryChecksumCatalog;
use crate::utils::errors::{DeployError, Result};
use std::path::Path;
use tracing::{debug, info, trace};

/// Build an archive holding only the entries of `source` the remote side does
/// not already have.
///
/// Returns `Ok(None)` when the catalog is empty: there is nothing to diff
/// against and the caller should upload `source` as is.
pub fn build_delta(
    source: &Path,
    catalog: &EntryChecksumCatalog,
    output_dir: &Path,
) -> Result<Option<DeltaArchive>> {
    if catalog.is_empty() {
        debug!("Empty checksum catalog, no delta for {}", source.display());
        return Ok(None);
    }

    let mut archive = open_archive(source)?;
    let mut writer = DeltaWriter::create(source, output_dir, "delta")?;
    debug!("Writing delta of {} to {}", source.display(), writer.path().display());

    let mut written = 0usize;
    let mut omitted = 0usize;

    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| DeployError::from_zip(source, e))?;

        if !entry.is_dir() && catalog.holds(entry.name(), entry.crc32()) {
            trace!("Unchanged: {}", entry.name());
            omitted += 1;
            continue;
        }

        trace!("Keeping: {} (crc {:08x})", entry.name(), entry.crc32());
        writer
            .zip()
            .raw_copy_file(entry)
            .map_err(|e| DeployError::from_zip(source, e))?;
        written += 1;
    }

    let path = writer.finish()?;

    info!(
        "Delta archive {}: {} entries kept, {} already deployed",
        path.display(),
        written,
        omitted
    );

    Ok(Some(DeltaArchive {
        path,
        entries_written: written,
        entries_omitted: omitted,
        superseded_previous: false,
    }))
}
