// src/archive.rs

//! Archive codec for zip-structured application packages
//!
//! An [`Archive`] is the whole package held in memory as an ordered list of
//! entries. Entries keep their original name, order, compression method,
//! modification time and permissions, so writing an archive that was only
//! partially modified reproduces everything else exactly.
//!
//! # Example
//!
//! ```ignore
//! use bundleguard::archive::{Archive, WriteOptions};
//!
//! let mut archive = Archive::open("build/Runner.ipa")?;
//! archive.replace_data("Payload/Runner.app/Info.plist", new_plist)?;
//! archive.write(Path::new("build/Runner.fixed.ipa"), &WriteOptions::default())?;
//! ```

use crate::config::MAX_COMPRESSION_LEVEL;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::result::ZipError;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Zip signatures accepted at the start of a file
///
/// - `PK\x03\x04`: local file header (any non-empty archive)
/// - `PK\x05\x06`: end of central directory (empty archive)
/// - `PK\x07\x08`: spanned archive marker
const ZIP_MAGIC: [[u8; 4]; 3] = [
    [0x50, 0x4b, 0x03, 0x04],
    [0x50, 0x4b, 0x05, 0x06],
    [0x50, 0x4b, 0x07, 0x08],
];

/// Entries at or above this size need zip64 headers
const ZIP64_THRESHOLD: usize = u32::MAX as usize;

/// Upper bound on buffer pre-allocation from a declared entry size
const MAX_PREALLOC: u64 = 1 << 20;

/// File type bits of a unix mode
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Check whether data starts with a zip signature
pub fn has_zip_magic(data: &[u8]) -> bool {
    data.len() >= 4 && ZIP_MAGIC.iter().any(|magic| data[..4] == magic[..])
}

/// A single entry of an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
    compression: CompressionMethod,
    last_modified: Option<DateTime>,
    unix_mode: Option<u32>,
    rewritten: bool,
}

impl ArchiveEntry {
    /// Entry path exactly as stored in the archive
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed contents (empty for directories)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Whether the entry is a symbolic link (its data is the link target)
    pub fn is_symlink(&self) -> bool {
        self.unix_mode
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
    }

    /// Whether the entry was stored without compression
    pub fn is_stored(&self) -> bool {
        self.compression == CompressionMethod::Stored
    }

    /// Whether the entry's contents were replaced since opening
    pub fn is_rewritten(&self) -> bool {
        self.rewritten
    }

    fn file_options(&self, level: i64) -> SimpleFileOptions {
        let mut options = if self.is_stored() || self.is_dir {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(level))
        };
        options = options.last_modified_time(self.last_modified.unwrap_or_default());
        if let Some(mode) = self.unix_mode {
            options = options.unix_permissions(mode);
        }
        if self.data.len() >= ZIP64_THRESHOLD {
            options = options.large_file(true);
        }
        options
    }
}

/// Settings for serializing an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Deflate level applied to compressed entries
    pub compression_level: i64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression_level: MAX_COMPRESSION_LEVEL,
        }
    }
}

/// An application package loaded into memory
#[derive(Debug, Clone)]
pub struct Archive {
    source: PathBuf,
    entries: Vec<ArchiveEntry>,
    index: HashMap<String, usize>,
}

impl Archive {
    /// Open and fully read a zip archive
    ///
    /// Non-zip input is rejected from its leading bytes before the zip
    /// reader runs, so callers get `CorruptArchive` rather than an IO error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }

        let mut file = File::open(path).map_err(|e| open_error(path, e))?;
        let mut magic = [0u8; 4];
        let read = read_prefix(&mut file, &mut magic).map_err(|e| open_error(path, e))?;
        if !has_zip_magic(&magic[..read]) {
            return Err(Error::CorruptArchive {
                path: path.to_path_buf(),
                reason: "not a zip archive".to_string(),
            });
        }
        file.rewind().map_err(|e| open_error(path, e))?;

        Self::from_reader(file, path)
    }

    /// Read an archive from any seekable reader
    ///
    /// `source` is only used for error messages.
    pub fn from_reader<R: Read + Seek>(reader: R, source: &Path) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptArchive {
            path: source.to_path_buf(),
            reason,
        };

        let mut zip = ZipArchive::new(reader).map_err(|e| corrupt(e.to_string()))?;
        let mut entries = Vec::with_capacity(zip.len());
        let mut index = HashMap::with_capacity(zip.len());

        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| corrupt(format!("entry #{}: {}", i, e)))?;
            let name = file.name().to_string();

            if index.contains_key(&name) {
                return Err(corrupt(format!("duplicate entry name {}", name)));
            }

            let mut data = Vec::with_capacity(file.size().min(MAX_PREALLOC) as usize);
            if !file.is_dir() {
                file.read_to_end(&mut data)
                    .map_err(|e| corrupt(format!("failed to read {}: {}", name, e)))?;
            }

            index.insert(name.clone(), entries.len());
            entries.push(ArchiveEntry {
                is_dir: file.is_dir(),
                compression: file.compression(),
                last_modified: file.last_modified(),
                unix_mode: file.unix_mode(),
                rewritten: false,
                name,
                data,
            });
        }

        debug!(
            "Read {} entries from {}",
            entries.len(),
            source.display()
        );

        Ok(Self {
            source: source.to_path_buf(),
            entries,
            index,
        })
    }

    /// Path the archive was read from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// All entries in archive order
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Look up an entry by its exact path
    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the uncompressed sizes of all entries
    pub fn uncompressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.data.len() as u64).sum()
    }

    /// Entries whose contents were replaced
    pub fn rewritten_entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|e| e.rewritten)
    }

    /// Replace the contents of an existing file entry
    pub fn replace_data(&mut self, name: &str, data: Vec<u8>) -> Result<()> {
        let i = *self.index.get(name).ok_or_else(|| {
            Error::InvalidInput(format!("archive has no entry named {}", name))
        })?;
        let entry = &mut self.entries[i];
        if entry.is_dir || entry.is_symlink() {
            return Err(Error::InvalidInput(format!(
                "cannot replace contents of non-file entry {}",
                name
            )));
        }
        entry.data = data;
        entry.rewritten = true;
        Ok(())
    }

    /// Serialize the archive into a writer, returning the writer
    pub fn write_to<W: Write + Seek>(
        &self,
        writer: W,
        options: &WriteOptions,
    ) -> zip::result::ZipResult<W> {
        let mut zip = ZipWriter::new(writer);
        for entry in &self.entries {
            let file_options = entry.file_options(options.compression_level);
            if entry.is_dir {
                zip.add_directory(entry.name.as_str(), file_options)?;
            } else if entry.is_symlink() {
                let target = std::str::from_utf8(&entry.data).map_err(|_| {
                    ZipError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("symlink target of {} is not UTF-8", entry.name),
                    ))
                })?;
                zip.add_symlink(entry.name.as_str(), target, file_options)?;
            } else {
                zip.start_file(entry.name.as_str(), file_options)?;
                zip.write_all(&entry.data)?;
            }
        }
        zip.finish()
    }

    /// Serialize the archive to a file path
    pub fn write(&self, dest: &Path, options: &WriteOptions) -> Result<()> {
        let file = File::create(dest).map_err(|e| Error::write(dest, e))?;
        let file = self
            .write_to(file, options)
            .map_err(|e| Error::write(dest, zip_io_error(e)))?;
        file.sync_all().map_err(|e| Error::write(dest, e))?;
        Ok(())
    }
}

/// Read up to `buf.len()` bytes, stopping early only at end of file
fn read_prefix<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Classify a failure to read the archive file itself
///
/// These happen before the zip reader runs, so the input is unusable
/// rather than corrupt.
fn open_error(path: &Path, err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        _ => Error::InvalidInput(format!("cannot read {}: {}", path.display(), err)),
    }
}

/// Flatten a zip error into an IO error for write failures
pub(crate) fn zip_io_error(err: ZipError) -> std::io::Error {
    match err {
        ZipError::Io(e) => e,
        other => std::io::Error::other(other.to_string()),
    }
}
