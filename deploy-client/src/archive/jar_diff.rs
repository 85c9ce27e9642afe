//! Second-level delta: entries inside nested jars against the jar hash catalog.
//!
//! Library jars bundled in a web archive rarely change, so their inner entries
//! are compared one by one (SHA-256 of the uncompressed bytes). A jar that
//! loses entries is rewritten in place; every other top-level entry is copied
//! through raw. Top-level inclusion is not re-evaluated here.

use super::{open_archive, DeltaArchive, DeltaWriter};
use crate::catalog::NestedJarHashCatalog;
use crate::utils::errors::{DeployError, Result};
use sha2::{Digest, Sha256};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};
use zip::read::ZipFile;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Top-level entries with this suffix are treated as nested jars.
const JAR_SUFFIX: &str = ".jar";

pub fn is_nested_jar(name: &str) -> bool {
    name.ends_with(JAR_SUFFIX)
}

/// Display path for an entry inside a nested jar (`app.war!/WEB-INF/lib/a.jar`).
fn nested_path(source: &Path, jar_name: &str) -> PathBuf {
    PathBuf::from(format!("{}!/{}", source.display(), jar_name))
}

/// Upper bound on the buffer reserved up front; header sizes are untrusted.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

fn prealloc_hint(declared_size: u64) -> usize {
    declared_size.min(MAX_PREALLOC) as usize
}

/// Read a whole entry. A checksum or inflate failure means the archive is
/// corrupt, not that the disk failed. The zip reader reports a CRC mismatch
/// as `ErrorKind::Other`.
fn read_entry(entry: &mut ZipFile<'_>, archive: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(prealloc_hint(entry.size()));
    entry.read_to_end(&mut data).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other => {
            DeployError::MalformedArchive {
                path: archive.to_path_buf(),
                reason: format!("{}: {}", entry.name(), e),
            }
        }
        _ => DeployError::Io(e),
    })?;
    Ok(data)
}

fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn open_nested(source: &Path, jar_name: &str, bytes: Vec<u8>) -> Result<ZipArchive<Cursor<Vec<u8>>>> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DeployError::from_zip(&nested_path(source, jar_name), e))
}

/// Hash every non-directory entry of every nested jar in `archive_path`.
///
/// This is what gets sent to the remote side, which answers with the subset
/// it already holds.
pub fn local_jar_hashes(archive_path: &Path) -> Result<NestedJarHashCatalog> {
    let mut archive = open_archive(archive_path)?;
    let mut hashes = NestedJarHashCatalog::default();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| DeployError::from_zip(archive_path, e))?;
        if entry.is_dir() || !is_nested_jar(entry.name()) {
            continue;
        }

        let jar_name = entry.name().to_string();
        let bytes = read_entry(&mut entry, archive_path)?;
        drop(entry);

        let jar_path = nested_path(archive_path, &jar_name);
        let mut jar = open_nested(archive_path, &jar_name, bytes)?;
        for j in 0..jar.len() {
            let mut inner = jar
                .by_index(j)
                .map_err(|e| DeployError::from_zip(&jar_path, e))?;
            if inner.is_dir() {
                continue;
            }
            let data = read_entry(&mut inner, &jar_path)?;
            hashes.insert(
                NestedJarHashCatalog::nested_key(&jar_name, inner.name()),
                content_hash(&data),
            );
        }
    }

    debug!(
        "Computed {} nested entry hashes for {}",
        hashes.len(),
        archive_path.display()
    );
    Ok(hashes)
}

/// A nested jar with the already-deployed entries removed.
struct PrunedJar {
    bytes: Vec<u8>,
    omitted: usize,
}

/// Rebuild `jar_name` without the entries the catalog already holds.
/// Returns `None` when nothing could be pruned.
fn prune_jar(
    source: &Path,
    jar_name: &str,
    jar_bytes: Vec<u8>,
    catalog: &NestedJarHashCatalog,
) -> Result<Option<PrunedJar>> {
    let jar_path = nested_path(source, jar_name);
    let mut jar = open_nested(source, jar_name, jar_bytes)?;
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let mut omitted = 0usize;

    for j in 0..jar.len() {
        let keep = {
            let mut inner = jar
                .by_index(j)
                .map_err(|e| DeployError::from_zip(&jar_path, e))?;
            if inner.is_dir() {
                true
            } else {
                let hash = content_hash(&read_entry(&mut inner, &jar_path)?);
                let held = catalog.holds(jar_name, inner.name(), &hash);
                if held {
                    trace!("Unchanged: {}/{}", jar_name, inner.name());
                }
                !held
            }
        };

        if keep {
            let raw = jar
                .by_index_raw(j)
                .map_err(|e| DeployError::from_zip(&jar_path, e))?;
            out.raw_copy_file(raw)
                .map_err(|e| DeployError::from_zip(&jar_path, e))?;
        } else {
            omitted += 1;
        }
    }

    if omitted == 0 {
        return Ok(None);
    }

    let bytes = out
        .finish()
        .map_err(|e| DeployError::from_zip(&jar_path, e))?
        .into_inner();
    Ok(Some(PrunedJar { bytes, omitted }))
}

/// Build an archive in which every nested jar only carries the inner entries
/// the remote side does not already have.
///
/// Returns `Ok(None)` when the catalog is empty.
/// `entries_omitted` on the result counts pruned nested entries.
pub fn build_nested_delta(
    source: &Path,
    catalog: &NestedJarHashCatalog,
    output_dir: &Path,
) -> Result<Option<DeltaArchive>> {
    if catalog.is_empty() {
        debug!("Empty jar hash catalog, no nested delta for {}", source.display());
        return Ok(None);
    }

    let mut archive = open_archive(source)?;
    let mut writer = DeltaWriter::create(source, output_dir, "jardelta")?;
    debug!("Writing delta of {} to {}", source.display(), writer.path().display());

    let mut written = 0usize;
    let mut omitted = 0usize;
    let mut jars_rewritten = 0usize;

    for i in 0..archive.len() {
        let (name, is_jar) = {
            let entry = archive
                .by_index_raw(i)
                .map_err(|e| DeployError::from_zip(source, e))?;
            let name = entry.name().to_string();
            let is_jar = !entry.is_dir() && is_nested_jar(&name);
            (name, is_jar)
        };

        if is_jar {
            let (bytes, options) = {
                let mut entry = archive
                    .by_index(i)
                    .map_err(|e| DeployError::from_zip(source, e))?;
                let mut options = FileOptions::default()
                    .compression_method(CompressionMethod::Stored)
                    .last_modified_time(entry.last_modified());
                if let Some(mode) = entry.unix_mode() {
                    options = options.unix_permissions(mode);
                }
                (read_entry(&mut entry, source)?, options)
            };

            if let Some(pruned) = prune_jar(source, &name, bytes, catalog)? {
                debug!("Rewrote {}: {} nested entries dropped", name, pruned.omitted);
                let options = options.large_file(pruned.bytes.len() as u64 > u32::MAX as u64);
                writer
                    .zip()
                    .start_file(name.as_str(), options)
                    .map_err(|e| DeployError::from_zip(source, e))?;
                writer.zip().write_all(&pruned.bytes)?;
                omitted += pruned.omitted;
                jars_rewritten += 1;
                written += 1;
                continue;
            }
        }

        let entry = archive
            .by_index_raw(i)
            .map_err(|e| DeployError::from_zip(source, e))?;
        writer
            .zip()
            .raw_copy_file(entry)
            .map_err(|e| DeployError::from_zip(source, e))?;
        written += 1;
    }

    let path = writer.finish()?;

    info!(
        "Nested delta archive {}: {} jars rewritten, {} nested entries already deployed",
        path.display(),
        jars_rewritten,
        omitted
    );

    Ok(Some(DeltaArchive {
        path,
        entries_written: written,
        entries_omitted: omitted,
        superseded_previous: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testutil::{
        entry_names, file_count, read_jar, read_zip, sha256_hex, ZipBuilder,
    };
    use tempfile::TempDir;

    fn catalog(entries: &[(&str, &str)]) -> NestedJarHashCatalog {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_catalog_yields_no_delta() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        let lib = ZipBuilder::new().file("X.class", b"x").bytes();
        ZipBuilder::new().file("lib.jar", &lib).write(&war);

        assert!(build_nested_delta(&war, &NestedJarHashCatalog::default(), out.path())?.is_none());
        assert_eq!(file_count(out.path()), 0);
        Ok(())
    }

    #[test]
    fn test_known_nested_entries_are_pruned() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        let lib = ZipBuilder::new().file("X.class", b"class X").file("Y.class", b"class Y").bytes();
        ZipBuilder::new().file("index.html", b"<html/>").file("lib.jar", &lib).write(&war);

        let hashes = catalog(&[("lib.jar/X.class", &sha256_hex(b"class X"))]);
        let delta = build_nested_delta(&war, &hashes, out.path())?.expect("delta expected");

        assert_eq!(entry_names(&delta.path), vec!["index.html", "lib.jar"]);
        let produced = read_zip(&delta.path);
        let inner = read_jar(&produced["lib.jar"]);
        assert_eq!(inner.keys().collect::<Vec<_>>(), vec!["Y.class"]);
        assert_eq!(inner["Y.class"], b"class Y");
        assert_eq!(produced["index.html"], b"<html/>");
        assert_eq!(delta.entries_omitted, 1);
        Ok(())
    }

    #[test]
    fn test_changed_nested_entry_is_kept() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        let lib = ZipBuilder::new().file("X.class", b"class X v2").file("Y.class", b"class Y").bytes();
        ZipBuilder::new().file("WEB-INF/lib/lib.jar", &lib).write(&war);

        let hashes = catalog(&[
            ("WEB-INF/lib/lib.jar/X.class", &sha256_hex(b"class X v1")),
            ("WEB-INF/lib/lib.jar/Y.class", &sha256_hex(b"class Y")),
        ]);
        let delta = build_nested_delta(&war, &hashes, out.path())?.expect("delta expected");

        let produced = read_zip(&delta.path);
        let inner = read_jar(&produced["WEB-INF/lib/lib.jar"]);
        assert_eq!(inner.keys().collect::<Vec<_>>(), vec!["X.class"]);
        assert_eq!(inner["X.class"], b"class X v2");
        Ok(())
    }

    #[test]
    fn test_untouched_jar_is_copied_verbatim() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        let lib = ZipBuilder::new().file("X.class", b"class X").bytes();
        let other = ZipBuilder::new().file("Z.class", b"class Z").bytes();
        ZipBuilder::new().file("lib.jar", &lib).file("other.jar", &other).write(&war);

        let hashes = catalog(&[("lib.jar/X.class", &sha256_hex(b"class X"))]);
        let delta = build_nested_delta(&war, &hashes, out.path())?.expect("delta expected");

        let produced = read_zip(&delta.path);
        assert_eq!(produced["other.jar"], other);
        assert!(read_jar(&produced["lib.jar"]).is_empty());
        Ok(())
    }

    #[test]
    fn test_nested_directories_are_kept() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        let lib = ZipBuilder::new().dir("com/").file("com/X.class", b"class X").bytes();
        ZipBuilder::new().file("lib.jar", &lib).write(&war);

        let hashes = catalog(&[("lib.jar/com/X.class", &sha256_hex(b"class X"))]);
        let delta = build_nested_delta(&war, &hashes, out.path())?.expect("delta expected");

        let inner = read_jar(&read_zip(&delta.path)["lib.jar"]);
        assert_eq!(inner.keys().collect::<Vec<_>>(), vec!["com/"]);
        Ok(())
    }

    #[test]
    fn test_local_jar_hashes() -> Result<()> {
        let dir = TempDir::new()?;
        let war = dir.path().join("app.war");
        let lib = ZipBuilder::new().dir("META-INF/").file("X.class", b"class X").bytes();
        ZipBuilder::new()
            .file("index.html", b"<html/>")
            .file("WEB-INF/lib/lib.jar", &lib)
            .write(&war);

        let hashes = local_jar_hashes(&war)?;

        assert_eq!(hashes.len(), 1);
        assert_eq!(
            hashes.get("WEB-INF/lib/lib.jar/X.class"),
            Some(sha256_hex(b"class X").as_str())
        );
        Ok(())
    }

    #[test]
    fn test_corrupt_nested_jar_is_malformed() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        ZipBuilder::new().file("lib.jar", b"this is not a jar at all, just text").write(&war);

        let hashes = catalog(&[("lib.jar/X.class", "00")]);
        let err = build_nested_delta(&war, &hashes, out.path()).unwrap_err();
        match err {
            DeployError::MalformedArchive { path, .. } => {
                assert!(path.to_string_lossy().ends_with("!/lib.jar"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(file_count(out.path()), 0);

        assert!(matches!(
            local_jar_hashes(&war),
            Err(DeployError::MalformedArchive { .. })
        ));
        Ok(())
    }

    /// `lib.jar` with X.class stored uncompressed and one content byte flipped.
    fn jar_with_bad_crc() -> Vec<u8> {
        let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = FileOptions::default().compression_method(CompressionMethod::Stored);
        zw.start_file("X.class", opts).unwrap();
        zw.write_all(b"class X body").unwrap();
        zw.start_file("Y.class", opts).unwrap();
        zw.write_all(b"class Y").unwrap();
        let mut bytes = zw.finish().unwrap().into_inner();

        let at = bytes
            .windows(b"class X body".len())
            .position(|w| w == b"class X body")
            .unwrap();
        bytes[at] ^= 0xff;
        bytes
    }

    #[test]
    fn test_nested_checksum_mismatch_is_malformed() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        ZipBuilder::new().file("lib.jar", jar_with_bad_crc()).write(&war);

        match local_jar_hashes(&war) {
            Err(DeployError::MalformedArchive { path, reason }) => {
                assert!(path.to_string_lossy().ends_with("!/lib.jar"));
                assert!(reason.contains("X.class"));
            }
            other => panic!("expected malformed archive, got {:?}", other.map(|_| ())),
        }

        let hashes = catalog(&[("lib.jar/Y.class", &sha256_hex(b"class Y"))]);
        assert!(matches!(
            build_nested_delta(&war, &hashes, out.path()),
            Err(DeployError::MalformedArchive { .. })
        ));
        assert_eq!(file_count(out.path()), 0);
        Ok(())
    }

    #[test]
    fn test_source_is_left_untouched() -> Result<()> {
        let dir = TempDir::new()?;
        let out = TempDir::new()?;
        let war = dir.path().join("app.war");
        let lib = ZipBuilder::new().file("X.class", b"class X").file("Y.class", b"class Y").bytes();
        ZipBuilder::new().file("lib.jar", &lib).write(&war);
        let before = std::fs::read(&war)?;

        let hashes = catalog(&[("lib.jar/X.class", &sha256_hex(b"class X"))]);
        build_nested_delta(&war, &hashes, out.path())?;

        assert_eq!(std::fs::read(&war)?, before);
        Ok(())
    }

    #[test]
    fn test_declared_size_does_not_drive_allocation() {
        assert_eq!(prealloc_hint(0), 0);
        assert_eq!(prealloc_hint(4096), 4096);
        assert_eq!(prealloc_hint(1 << 60), MAX_PREALLOC as usize);
        assert_eq!(prealloc_hint(u64::MAX), MAX_PREALLOC as usize);
    }

    #[test]
    fn test_jar_detection() {
        assert!(is_nested_jar("WEB-INF/lib/commons.jar"));
        assert!(!is_nested_jar("WEB-INF/lib/"));
        assert!(!is_nested_jar("index.jsp"));
        assert!(!is_nested_jar("notes.jar.txt"));
    }
}
