use std::fmt;

use crate::common::config::{FileId, INVALID_FILE_ID, INVALID_OFFSET};

/// A byte position inside one file of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataLoc {
    file_id: FileId,
    offset: i64,
}

/// Marks "no location".
pub const INVALID_DATA_LOC: DataLoc = DataLoc {
    file_id: INVALID_FILE_ID,
    offset: INVALID_OFFSET,
};

impl DataLoc {
    pub const fn new(file_id: FileId, offset: i64) -> Self {
        Self { file_id, offset }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn is_valid(&self) -> bool {
        *self != INVALID_DATA_LOC
    }
}

impl Default for DataLoc {
    fn default() -> Self {
        INVALID_DATA_LOC
    }
}

impl fmt::Display for DataLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.file_id, self.offset)
    }
}
