//! File backend: one file per archive set.
//!
//! File layout (integers big endian):
//!
//! ```plain
//! | "RRDKIT01" | crc32 of payload (u32) | payload length (u32) | payload (CBOR) |
//! ```
//!
//! Files are rewritten as a whole through a temporary file renamed over the old one.
use std::{
    fs,
    io::{self, Read, Write},
    ops::RangeInclusive,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use crc32fast::Hasher;

use super::{check_name, Backend, StoredRrd};
use crate::{
    error::{BackendError, RrdError},
    rrd::{archive::ArchiveRow, RrdState},
    Timestamp,
};

const FILE_HEADER: &[u8; 8] = b"RRDKIT01";
const FILE_EXTENSION: &str = "rrd";

/// Backend storing archive sets as files of a directory.
#[derive(Debug)]
pub struct FileBackend {
    directory: PathBuf,
    // Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileBackend {
    /// Use (and create if needed) `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, RrdError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        Ok(Self {
            directory,
            lock: Mutex::new(()),
        })
    }

    fn path(&self, name: &str) -> Result<PathBuf, RrdError> {
        check_name(name)?;
        Ok(self.directory.join(format!("{name}.{FILE_EXTENSION}")))
    }

    fn read(&self, name: &str) -> Result<StoredRrd, RrdError> {
        let path = self.path(name)?;

        let file = fs::File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RrdError::NotFound(name.into()),
            _ => e.into(),
        })?;

        Ok(decode(io::BufReader::new(file))?)
    }

    fn write(&self, name: &str, stored: &StoredRrd) -> Result<(), RrdError> {
        let path = self.path(name)?;
        let temporary = self.directory.join(format!(".{name}.{FILE_EXTENSION}.tmp"));

        let mut file = fs::File::create(&temporary)?;
        file.write_all(&encode(stored)?)?;
        file.sync_all()?;

        fs::rename(&temporary, &path)?;
        tracing::trace!("Wrote {path:?}");

        Ok(())
    }

    fn modify(
        &self,
        name: &str,
        f: impl FnOnce(&mut StoredRrd) -> Result<(), RrdError>,
    ) -> Result<(), RrdError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stored = self.read(name)?;
        f(&mut stored)?;
        self.write(name, &stored)
    }
}

fn encode(stored: &StoredRrd) -> Result<Vec<u8>, BackendError> {
    let mut payload = vec![];
    ciborium::into_writer(stored, &mut payload)
        .map_err(|e| BackendError::Codec(e.to_string().into()))?;

    let length = u32::try_from(payload.len()).map_err(|_| BackendError::NonMatchingLength)?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);

    let mut buffer = Vec::with_capacity(16 + payload.len());
    buffer.extend_from_slice(FILE_HEADER);
    buffer.extend_from_slice(&hasher.finalize().to_be_bytes());
    buffer.extend_from_slice(&length.to_be_bytes());
    buffer.extend_from_slice(&payload);

    Ok(buffer)
}

fn decode<R: Read>(mut reader: R) -> Result<StoredRrd, BackendError> {
    let mut header = [0u8; 16];
    reader.read_exact(&mut header)?;

    if &header[0..8] != FILE_HEADER {
        return Err(BackendError::InvalidConstantString);
    }

    let checksum = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    let length = u32::from_be_bytes([header[12], header[13], header[14], header[15]]) as usize;

    let mut payload = Vec::with_capacity(length);
    reader.read_to_end(&mut payload)?;

    if payload.len() != length {
        return Err(BackendError::NonMatchingLength);
    }

    let mut hasher = Hasher::new();
    hasher.update(&payload);

    if hasher.finalize() != checksum {
        return Err(BackendError::InvalidChecksum);
    }

    ciborium::from_reader(payload.as_slice()).map_err(|e| BackendError::Codec(e.to_string().into()))
}

impl Backend for FileBackend {
    fn exists(&self, name: &str) -> Result<bool, RrdError> {
        Ok(self.path(name)?.try_exists()?)
    }

    fn list(&self) -> Result<Vec<String>, RrdError> {
        let mut names = vec![];

        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();

            if path.extension().is_some_and(|ext| ext == FILE_EXTENSION) {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    if check_name(name).is_ok() {
                        names.push(name.to_string());
                    }
                }
            }
        }

        names.sort_unstable();
        Ok(names)
    }

    fn create(&self, name: &str, state: &RrdState) -> Result<(), RrdError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.exists(name)? {
            return Err(RrdError::AlreadyExists(name.into()));
        }

        self.write(name, &StoredRrd::new(state))?;
        tracing::debug!("Created {:?}", self.path(name)?);

        Ok(())
    }

    fn store_state(&self, name: &str, state: &RrdState) -> Result<(), RrdError> {
        self.modify(name, |stored| {
            stored.state = state.clone();
            Ok(())
        })
    }

    fn load_state(&self, name: &str) -> Result<RrdState, RrdError> {
        Ok(self.read(name)?.state)
    }

    fn append_rows(
        &self,
        name: &str,
        archive: usize,
        rows: &[ArchiveRow],
    ) -> Result<(), RrdError> {
        self.modify(name, |stored| {
            stored.archive(archive)?.append(rows);
            Ok(())
        })
    }

    fn read_rows(
        &self,
        name: &str,
        archive: usize,
        range: RangeInclusive<Timestamp>,
    ) -> Result<Vec<ArchiveRow>, RrdError> {
        Ok(self.read(name)?.archive(archive)?.read(range))
    }

    fn delete(&self, name: &str) -> Result<(), RrdError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        fs::remove_file(self.path(name)?).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RrdError::NotFound(name.into()),
            _ => e.into(),
        })
    }

    /// Single file rewrite for the whole update.
    fn commit(
        &self,
        name: &str,
        state: &RrdState,
        rows: &[Vec<ArchiveRow>],
    ) -> Result<(), RrdError> {
        self.modify(name, |stored| {
            for (archive, rows) in rows.iter().enumerate() {
                stored.archive(archive)?.append(rows);
            }

            stored.state = state.clone();
            Ok(())
        })
    }
}
