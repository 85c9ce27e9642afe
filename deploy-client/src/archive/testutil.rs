//! Helpers for building and inspecting archives in tests.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Archive contents assembled in order; names ending in `/` are directories.
#[derive(Default)]
pub(crate) struct ZipBuilder {
    entries: Vec<(String, Option<Vec<u8>>)>,
}

impl ZipBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn file(mut self, name: &str, data: impl AsRef<[u8]>) -> Self {
        self.entries.push((name.to_string(), Some(data.as_ref().to_vec())));
        self
    }

    pub(crate) fn dir(mut self, name: &str) -> Self {
        self.entries.push((name.to_string(), None));
        self
    }

    fn write_to<W: Write + Seek>(&self, zw: &mut ZipWriter<W>) {
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in &self.entries {
            match data {
                Some(data) => {
                    zw.start_file(name.as_str(), opts).unwrap();
                    zw.write_all(data).unwrap();
                }
                None => zw.add_directory(name.as_str(), opts).unwrap(),
            }
        }
    }

    pub(crate) fn write(&self, path: &Path) {
        let mut zw = ZipWriter::new(File::create(path).unwrap());
        self.write_to(&mut zw);
        zw.finish().unwrap();
    }

    /// Build in memory, e.g. a jar to nest inside another archive.
    pub(crate) fn bytes(&self) -> Vec<u8> {
        let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
        self.write_to(&mut zw);
        zw.finish().unwrap().into_inner()
    }
}

fn contents_of<R: Read + Seek>(mut archive: ZipArchive<R>) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        out.insert(file.name().to_string(), data);
    }
    out
}

/// Entry name → uncompressed bytes.
pub(crate) fn read_zip(path: &Path) -> BTreeMap<String, Vec<u8>> {
    contents_of(ZipArchive::new(File::open(path).unwrap()).unwrap())
}

pub(crate) fn read_jar(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    contents_of(ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap())
}

/// Entry names in archive order.
pub(crate) fn entry_names(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index_raw(i).unwrap().name().to_string())
        .collect()
}

/// CRC-32 recorded for `name` in the archive at `path`.
pub(crate) fn crc_of(path: &Path, name: &str) -> u32 {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let crc = archive.by_name(name).unwrap().crc32();
    crc
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

/// Count files in `dir` (non-recursive).
pub(crate) fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
