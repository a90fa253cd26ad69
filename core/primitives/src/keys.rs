//! Codec for the container keyspace.
//!
//! The container holds keys of the form `shares/<P>/<SI>/<N>[.<C>]` where `P`
//! is the two-character prefix bucket, `SI` the full hex storage index, `N`
//! the share number and `C` the chunk index. Chunk 0 is stored at the bare
//! share key so that stores written before chunking was introduced read back
//! without migration.

use crate::storage_index::StorageIndex;

/// Key prefix under which every share of a share group lives, with a trailing
/// slash so it can be handed directly to a prefix listing.
pub fn share_prefix(si: &StorageIndex) -> String {
    let sistr = si.to_string();
    format!("shares/{}/{}/", &sistr[..2], sistr)
}

/// Object key of a share, which doubles as the key of its chunk 0.
pub fn share_key(si: &StorageIndex, shnum: u64) -> String {
    let sistr = si.to_string();
    format!("shares/{}/{}/{}", &sistr[..2], sistr, shnum)
}

/// Object key of chunk `chunknum` of the share stored under `share_key`.
///
/// Chunk 0 maps to the bare share key; a `.0` suffix is never produced.
pub fn chunk_key(share_key: &str, chunknum: u64) -> String {
    if chunknum == 0 {
        share_key.to_string()
    } else {
        format!("{}.{}", share_key, chunknum)
    }
}

/// Recovers the chunk number from a full object key, or `None` if the key
/// does not look like a chunk of any share.
///
/// A key parses when it has exactly four path segments; a missing `.` suffix
/// means chunk 0. The suffix must be a decimal integer without leading zeros.
pub fn parse_chunk_number(key: &str) -> Option<u64> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() != 4 {
        return None;
    }
    let name = segments[3];
    let suffix = match name.split_once('.') {
        Some((_, suffix)) => suffix,
        None => "0",
    };
    parse_decimal(suffix)
}

fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}
