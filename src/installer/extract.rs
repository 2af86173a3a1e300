use crate::error::InstallError;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

/// Copy buffer used for every file entry.
pub const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Seekable byte source an archive is read from.
pub trait ArchiveReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveReader for T {}

/// Where the language pack archive comes from.
pub trait ArchiveSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn ArchiveReader>>;

    fn describe(&self) -> String;
}

/// Archive stored on disk.
pub struct FileArchive {
    path: PathBuf,
}

impl FileArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArchiveSource for FileArchive {
    fn open(&self) -> io::Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(io::BufReader::new(File::open(&self.path)?)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Archive held in memory, e.g. embedded in the binary.
#[derive(Clone)]
pub struct BundledArchive {
    bytes: Arc<[u8]>,
}

impl BundledArchive {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl ArchiveSource for BundledArchive {
    fn open(&self) -> io::Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(Cursor::new(self.bytes.clone())))
    }

    fn describe(&self) -> String {
        format!("bundled archive ({} bytes)", self.bytes.len())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
}

/// Extracts the zip behind `reader` into `root`, one entry at a time in archive order.
///
/// Sizes come from the central directory, so entries whose local headers defer them to a
/// trailing data descriptor are read like any other. Stops at the first error. Entries
/// finished before that stay on disk; the entry being written when the error hit is
/// removed.
pub fn extract_archive<R: Read + Seek>(reader: R, root: &Path) -> Result<ExtractSummary, InstallError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut summary = ExtractSummary::default();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| InstallError::UnsafeEntry(entry.name().to_string()))?;
        let target = root.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| InstallError::entry(&target, e))?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| InstallError::entry(parent, e))?;
        }
        write_entry(&mut entry, &target, &mut buf).map_err(|e| InstallError::entry(&target, e))?;
        debug!("Installed {}", target.display());
        summary.files += 1;
    }

    Ok(summary)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Copies one payload next to its target and renames it into place once complete.
fn write_entry(entry: &mut impl Read, target: &Path, buf: &mut [u8]) -> io::Result<()> {
    let partial = partial_path(target);

    let result = (|| {
        let mut out = File::create(&partial)?;
        loop {
            let n = entry.read(buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
        }
        out.sync_all()?;
        drop(out);
        fs::rename(&partial, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}
