//! File-processing primitives: locking, ordered header-last writes, and the
//! ENOENT-retry-with-`create_dir_all` discipline every leaf file in a
//! session/channel/segment tree follows (§5, §7).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Behavior, MedError, Result};
use crate::types::UNIVERSAL_HEADER_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A single on-disk MED file: a universal header at offset 0 followed by a
/// type-specific body. Writers stage the body first and the header last, so
/// a reader never observes a header claiming a body that isn't fully
/// written yet (§5).
pub struct FileProcessor {
    file: File,
    path: PathBuf,
}

impl FileProcessor {
    /// Create `path`, retrying once with `create_dir_all` on the parent
    /// directory if the first attempt fails with `ENOENT` (§7).
    pub fn allocate(path: impl AsRef<Path>, behavior: Behavior) -> Result<FileProcessor> {
        let path = path.as_ref().to_path_buf();
        let open = || {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
        };

        let file = match open() {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && behavior.retry_once => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                open()?
            }
            Err(e) => return Err(MedError::Io(e)),
        };

        Ok(FileProcessor { file, path })
    }

    /// Open an existing file for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<FileProcessor> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(FileProcessor { file, path })
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<FileProcessor> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(FileProcessor { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire an advisory lock on the whole file. Held until [`Self::unlock`]
    /// or the `FileProcessor` is dropped (§5: concurrent readers are safe,
    /// concurrent writers to the same file are not).
    pub fn lock(&self, mode: LockMode) -> Result<()> {
        match mode {
            LockMode::Shared => self.file.lock_shared()?,
            LockMode::Exclusive => self.file.lock_exclusive()?,
        }
        Ok(())
    }

    pub fn unlock(&self) -> Result<()> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        Ok(offset)
    }

    /// Write `body` starting at `UNIVERSAL_HEADER_BYTES`, flush, then write
    /// `header` (exactly `UNIVERSAL_HEADER_BYTES` long) at offset 0 and
    /// flush again — the header is always the last thing to land on disk.
    pub fn write_body_then_header(&mut self, body: &[u8], header: &[u8; UNIVERSAL_HEADER_BYTES]) -> Result<()> {
        self.write_at(UNIVERSAL_HEADER_BYTES as u64, body)?;
        self.file.flush()?;
        self.write_at(0, header)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn read_header(&mut self) -> Result<[u8; UNIVERSAL_HEADER_BYTES]> {
        let bytes = self.read_at(0, UNIVERSAL_HEADER_BYTES)?;
        bytes
            .try_into()
            .map_err(|_| MedError::MalformedData("short universal header".to_string()))
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("file.tdat");
        let fp = FileProcessor::allocate(&path, Behavior::RETRY_ONCE);
        assert!(fp.is_ok());
        assert!(path.exists());
    }

    #[test]
    fn allocate_without_retry_fails_on_missing_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("file.tdat");
        let fp = FileProcessor::allocate(&path, Behavior::RETURN_ON_FAIL);
        assert!(fp.is_err());
    }

    #[test]
    fn header_is_written_after_body() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.tdat");
        let mut fp = FileProcessor::allocate(&path, Behavior::RETRY_ONCE).unwrap();

        let body = vec![0xABu8; 64];
        let mut header = [0u8; UNIVERSAL_HEADER_BYTES];
        header[0] = 0x42;
        fp.write_body_then_header(&body, &header).unwrap();

        let read_back_header = fp.read_header().unwrap();
        assert_eq!(read_back_header[0], 0x42);
        let read_back_body = fp.read_at(UNIVERSAL_HEADER_BYTES as u64, body.len()).unwrap();
        assert_eq!(read_back_body, body);
    }

    #[test]
    fn shared_lock_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.tdat");
        let fp = FileProcessor::allocate(&path, Behavior::RETRY_ONCE).unwrap();
        fp.lock(LockMode::Shared).unwrap();
        fp.unlock().unwrap();
    }
}
