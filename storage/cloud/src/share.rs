//! Shares stored as chunk sequences in a cloud container.
//!
//! A [`CloudShare`] translates byte-range reads and scatter-gather read
//! vectors into chunk fetches routed through its [`ChunkCache`], and deletes
//! itself by enumerating and unlinking every chunk object.

use crate::cache::ChunkCache;
use crate::config::CloudStoreConfig;
use crate::error::CloudError;
use crate::retry::RetryingContainer;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use skyvault_primitives::{StorageIndex, chunk_count, parse_chunk_number, share_key};
use std::sync::Arc;

/// What a share exposes to the layers above, independent of where its bytes
/// live.
pub trait ShareBase: Send + Sync {
    fn storage_index(&self) -> StorageIndex;

    /// ASCII rendering of the storage index.
    fn storage_index_string(&self) -> String {
        self.storage_index().to_string()
    }

    fn shnum(&self) -> u64;

    /// Length of the payload, excluding headers and leases.
    fn data_length(&self) -> u64;

    /// Total object bytes across all chunks.
    fn size(&self) -> u64;

    /// Supported cloud services charge for object data only, so used space
    /// equals size.
    fn used_space(&self) -> u64 {
        self.size()
    }

    /// Deletes every chunk object of this share.
    fn unlink(&self) -> BoxFuture<'_, Result<(), CloudError>>;
}

/// Dimensions of an existing share, provided by the layer that understands
/// the share header.
#[derive(Debug, Clone, Copy)]
pub struct ShareParams {
    /// Length of the payload, excluding the header.
    pub data_length: u64,
    /// Total sharefile size, header included.
    pub total_size: u64,
    /// Chunk size the share was created with.
    pub chunksize: u64,
    /// Header length; payload offset 0 lives here in the sharefile.
    pub data_offset: u64,
}

pub struct CloudShare {
    container: Arc<RetryingContainer>,
    storage_index: StorageIndex,
    shnum: u64,
    key: String,
    data_length: u64,
    total_size: u64,
    chunksize: u64,
    data_offset: u64,
    cache: ChunkCache,
}

impl CloudShare {
    /// `params` describes the share as written (its chunk size is fixed at
    /// creation); `config` tunes the read cache around it.
    pub fn new(
        container: Arc<RetryingContainer>,
        storage_index: StorageIndex,
        shnum: u64,
        params: ShareParams,
        config: &CloudStoreConfig,
    ) -> Self {
        assert!(params.chunksize > 0, "chunksize must be positive");
        let key = share_key(&storage_index, shnum);
        let nchunks = chunk_count(params.total_size, params.chunksize);
        let cache = ChunkCache::new(container.clone(), key.clone(), nchunks, config);
        Self {
            container,
            storage_index,
            shnum,
            key,
            data_length: params.data_length,
            total_size: params.total_size,
            chunksize: params.chunksize,
            data_offset: params.data_offset,
            cache,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads `length` payload bytes starting at `offset`.
    ///
    /// Reads past the end of the payload are truncated; reads that start
    /// past the end return empty. Chunks are admitted to the fetch pipeline
    /// strictly in ascending order, one admission at a time, while their
    /// bytes are free to arrive out of order; the result is concatenated in
    /// chunk order.
    pub async fn read_share_data(&self, offset: u64, length: u64) -> Result<Bytes, CloudError> {
        let actual = length.min(self.data_length.saturating_sub(offset));
        if actual == 0 {
            return Ok(Bytes::new());
        }
        let seek = self.data_offset + offset;
        let last = seek + actual - 1;
        let first_chunk = seek / self.chunksize;
        let first_off = (seek % self.chunksize) as usize;
        let last_chunk = last / self.chunksize;
        let last_off = (last % self.chunksize) as usize;

        let mut parts = Vec::with_capacity((last_chunk - first_chunk + 1) as usize);
        for chunknum in first_chunk..=last_chunk {
            let start = if chunknum == first_chunk { first_off } else { 0 };
            let end =
                if chunknum == last_chunk { last_off + 1 } else { self.chunksize as usize };
            let (admission, data) = self.cache.get(chunknum);
            parts.push((data, start, end));
            // Respect backpressure before asking for the next chunk.
            admission.wait().await?;
        }

        if let [(data, start, end)] = &parts[..] {
            let chunk = data.wait().await?;
            return Ok(chunk.slice(*start..*end));
        }
        let mut assembled = BytesMut::with_capacity(actual as usize);
        for (data, start, end) in parts {
            let chunk = data.wait().await?;
            assembled.extend_from_slice(&chunk[start..end]);
        }
        Ok(assembled.freeze())
    }

    /// Scatter-gather read. Fetches are issued in (offset, length) order so
    /// adjacent ranges coalesce in the cache, but results come back in the
    /// caller's order.
    pub async fn readv(&self, readv: &[(u64, u64)]) -> Result<Vec<Bytes>, CloudError> {
        let mut order: Vec<usize> = (0..readv.len()).collect();
        order.sort_by_key(|&i| readv[i]);
        let reads = order.into_iter().map(|i| {
            let (offset, length) = readv[i];
            async move { Ok::<_, CloudError>((i, self.read_share_data(offset, length).await?)) }
        });
        let mut datav = vec![Bytes::new(); readv.len()];
        for (i, data) in futures::future::try_join_all(reads).await? {
            datav[i] = data;
        }
        Ok(datav)
    }

    /// Corrects the cache's idea of the chunk count once the share header
    /// has been read.
    pub fn set_nchunks(&self, nchunks: u64) {
        self.cache.set_nchunks(nchunks);
    }

    /// Tears down the cache; in-flight fetches drain in the background.
    fn discard(&self) {
        let _ = self.cache.close();
    }
}

impl ShareBase for CloudShare {
    fn storage_index(&self) -> StorageIndex {
        self.storage_index
    }

    fn shnum(&self) -> u64 {
        self.shnum
    }

    fn data_length(&self) -> u64 {
        self.data_length
    }

    fn size(&self) -> u64 {
        self.total_size
    }

    fn unlink(&self) -> BoxFuture<'_, Result<(), CloudError>> {
        Box::pin(async move {
            self.discard();
            delete_share_chunks(&self.container, &self.key, 0).await
        })
    }
}

impl std::fmt::Debug for CloudShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudShare")
            .field("key", &self.key)
            .field("data_length", &self.data_length)
            .field("total_size", &self.total_size)
            .field("chunksize", &self.chunksize)
            .finish()
    }
}

/// Deletes every chunk object of the share at `share_key` whose chunk number
/// is at least `from_chunknum`.
///
/// Deletions are serialized; callers wanting parallelism pipeline the whole
/// unlink at a higher layer. A 404 means the object was already gone, which
/// is success for a delete; any other error halts further deletes and is
/// surfaced.
pub async fn delete_share_chunks(
    container: &RetryingContainer,
    share_key: &str,
    from_chunknum: u64,
) -> Result<(), CloudError> {
    let listing = container.list_objects(share_key).await?;
    for entry in &listing.contents {
        assert!(
            entry.key.starts_with(share_key),
            "listed key {:?} does not belong to share {:?}",
            entry.key,
            share_key
        );
        let Some(chunknum) = parse_chunk_number(&entry.key) else {
            continue;
        };
        if chunknum < from_chunknum {
            continue;
        }
        match container.delete_object(&entry.key).await {
            Ok(()) => {}
            Err(err) if err.status() == Some(404) => {
                tracing::debug!(target: "cloud", key = %entry.key, "chunk was already gone");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
