//! Files served by one engine.
//!
//! A logical file is striped over physical files on several disks; the
//! partition lists the physical files an engine is responsible for, each under
//! its own file id. Deciding the layout belongs to the configuration layer.

use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use log::debug;

use crate::common::config::{FileId, INVALID_FILE_ID};
use crate::storage::disk::direct_io::{DirectIoConfig, open_direct_io};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub file_id: FileId,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct LogicalFilePartition {
    files: Vec<FileSpec>,
}

impl LogicalFilePartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file_id: FileId, path: impl Into<PathBuf>) -> Self {
        self.add_file(file_id, path);
        self
    }

    pub fn add_file(&mut self, file_id: FileId, path: impl Into<PathBuf>) {
        self.files.push(FileSpec {
            file_id,
            path: path.into(),
        });
    }

    pub fn files(&self) -> &[FileSpec] {
        &self.files
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Id of the first file, or `INVALID_FILE_ID` for an empty partition.
    pub fn file_id(&self) -> FileId {
        self.files.first().map_or(INVALID_FILE_ID, |f| f.file_id)
    }
}

/// A physical file opened for kernel asynchronous I/O.
pub struct OpenFile {
    file_id: FileId,
    path: PathBuf,
    file: File,
}

impl OpenFile {
    pub fn open(spec: &FileSpec, direct: &DirectIoConfig) -> io::Result<Self> {
        let file = open_direct_io(&spec.path, true, direct)?;
        debug!("opened file {} at {}", spec.file_id, spec.path.display());
        Ok(Self {
            file_id: spec.file_id,
            path: spec.path.clone(),
            file,
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("fd", &self.fd())
            .finish()
    }
}
