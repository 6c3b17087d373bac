use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use ulid::Ulid;

use super::META_FILENAME;
use crate::error::BlockUploadError;

// ASCII digits only; `\d` would also match other Unicode decimal digits.
static BLOCK_FILE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(index|chunks/[0-9]{6})$").expect("invalid block file pattern"));

pub fn parse_block_id(raw: &str) -> Result<Ulid, BlockUploadError> {
    Ulid::from_string(raw).map_err(|_| BlockUploadError::InvalidIdentifier(raw.to_string()))
}

/// Destination of an uploaded block file, relative to the block directory.
///
/// Only `index` and `chunks/NNNNNN` are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFilePath(String);

impl BlockFilePath {
    pub fn parse(raw: Option<&str>) -> Result<Self, BlockUploadError> {
        let raw = match raw {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(BlockUploadError::MissingPath),
        };
        if base_name(raw) == META_FILENAME {
            return Err(BlockUploadError::MetaFileNotAllowed);
        }
        if !BLOCK_FILE_PATH.is_match(raw) {
            return Err(BlockUploadError::InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn object_key(&self, block_id: Ulid) -> String {
        format!("{}/{}", block_id, self.0)
    }
}

impl fmt::Display for BlockFilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

/// A file upload must declare a non-zero length.
pub fn validate_content_length(content_length: Option<u64>) -> Result<u64, BlockUploadError> {
    match content_length {
        Some(len) if len > 0 => Ok(len),
        _ => Err(BlockUploadError::EmptyBody),
    }
}
