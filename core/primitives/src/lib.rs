//! Primitive types shared by the skyvault storage client: share identifiers,
//! the container keyspace codec, and chunk geometry helpers.

pub mod chunkdata;
pub mod keys;
pub mod storage_index;

pub use crate::chunkdata::{PREFERRED_CHUNK_SIZE, chunk_count, zero_chunkdata};
pub use crate::keys::{chunk_key, parse_chunk_number, share_key, share_prefix};
pub use crate::storage_index::StorageIndex;
