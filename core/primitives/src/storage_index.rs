use std::fmt;
use std::str::FromStr;

/// Opaque 16-byte identifier of a share group.
///
/// The ASCII rendering is 32 lowercase hex characters; the first two of them
/// form the prefix bucket under which all shares of the group are keyed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageIndex([u8; 16]);

impl StorageIndex {
    pub const LENGTH: usize = 16;

    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The two-character bucket used as the first path component under
    /// `shares/`.
    pub fn prefix(&self) -> String {
        self.to_string()[..2].to_string()
    }
}

impl From<[u8; 16]> for StorageIndex {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for StorageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for StorageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageIndex({})", self)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseStorageIndexError {
    #[error("storage index must be 32 hex characters, got {0}")]
    BadLength(usize),
    #[error("storage index is not valid hex: {0}")]
    BadHex(String),
}

impl FromStr for StorageIndex {
    type Err = ParseStorageIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 * Self::LENGTH {
            return Err(ParseStorageIndexError::BadLength(s.len()));
        }
        let bytes =
            hex::decode(s).map_err(|err| ParseStorageIndexError::BadHex(err.to_string()))?;
        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}
