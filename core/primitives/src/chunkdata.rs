use bytes::Bytes;
use std::sync::LazyLock;

/// Chunk size chosen for freshly created shares.
pub const PREFERRED_CHUNK_SIZE: usize = 512 * 1024;

/// Process-wide immutable zero buffer. `Bytes` hands out cheap slices, so
/// sparse writers can zero-pad without allocating per call.
static ZERO_CHUNKDATA: LazyLock<Bytes> =
    LazyLock::new(|| Bytes::from(vec![0u8; PREFERRED_CHUNK_SIZE]));

/// Returns `size` zero bytes. Requests up to [`PREFERRED_CHUNK_SIZE`] are
/// slices of the shared buffer; larger requests allocate one-shot.
pub fn zero_chunkdata(size: usize) -> Bytes {
    if size <= PREFERRED_CHUNK_SIZE {
        ZERO_CHUNKDATA.slice(..size)
    } else {
        Bytes::from(vec![0u8; size])
    }
}

/// Number of chunks a share of `total_size` bytes occupies.
pub fn chunk_count(total_size: u64, chunksize: u64) -> u64 {
    assert!(chunksize > 0, "chunksize must be positive");
    total_size.div_ceil(chunksize)
}
