//! Per-share chunk cache with single-flight fetches.
//!
//! The map holds a shared handle per chunk, pending or resolved, so any
//! number of concurrent readers of the same chunk multiplex onto one GET.
//! Fetches are submitted through an owned [`BackpressurePipeline`]; a cache
//! hit never stalls, a miss stalls only on pipeline admission, never on data
//! arrival.

use crate::config::CloudStoreConfig;
use crate::error::CloudError;
use crate::handle::{Handle, promise};
use crate::metrics;
use crate::pipeline::BackpressurePipeline;
use crate::retry::RetryingContainer;
use bytes::Bytes;
use parking_lot::Mutex;
use skyvault_primitives::chunk_key;
use std::collections::HashMap;
use std::sync::Arc;

/// Handle to a chunk's bytes: pending while the GET is in flight, resolved
/// afterwards. Clones all observe the same outcome.
pub type ChunkHandle = Handle<Result<Bytes, CloudError>>;

/// Admission handle: resolves when the cache's pipeline accepts more work.
pub type AdmissionHandle = Handle<Result<(), CloudError>>;

struct CacheMap {
    /// Total chunk count of the share; may be corrected once the share
    /// header has been read. Drives the retention set.
    nchunks: u64,
    map: HashMap<u64, ChunkHandle>,
}

pub struct ChunkCache {
    container: Arc<RetryingContainer>,
    share_key: String,
    state: Mutex<CacheMap>,
    pipeline: BackpressurePipeline,
    /// Entry count below which the retention pass stops evicting.
    min_cached: usize,
}

impl ChunkCache {
    /// `config` supplies the fetch pipeline depth and the retention floor.
    pub fn new(
        container: Arc<RetryingContainer>,
        share_key: String,
        nchunks: u64,
        config: &CloudStoreConfig,
    ) -> Self {
        Self {
            container,
            share_key,
            state: Mutex::new(CacheMap { nchunks: nchunks.max(1), map: HashMap::new() }),
            pipeline: BackpressurePipeline::new(config.pipeline_depth),
            min_cached: config.min_cached_chunks,
        }
    }

    /// Corrects the chunk count after the share header has been read.
    pub fn set_nchunks(&self, nchunks: u64) {
        self.state.lock().nchunks = nchunks.max(1);
    }

    /// Chunk indices the retention pass refuses to evict: the first chunk
    /// (it carries the share header and is re-read on seeks) and the final
    /// two (hot during sequential tails and tail recovery).
    fn retained(nchunks: u64) -> [u64; 3] {
        [0, nchunks.saturating_sub(2), nchunks.saturating_sub(1)]
    }

    /// Returns `(admission, data)` for `chunknum`.
    ///
    /// A hit returns a resolved admission and the existing data handle. A
    /// miss registers a new handle, submits the GET through the pipeline and
    /// returns the pipeline's admission handle; the caller awaits admission
    /// for backpressure and the data handle for the bytes. At most one GET
    /// per chunknum is ever in flight from one cache.
    pub fn get(&self, chunknum: u64) -> (AdmissionHandle, ChunkHandle) {
        let mut state = self.state.lock();
        if let Some(data) = state.map.get(&chunknum) {
            metrics::CHUNK_CACHE_HITS.inc();
            return (Handle::resolved(Ok(())), data.clone());
        }
        metrics::CHUNK_CACHE_MISSES.inc();

        let (resolver, data) = promise();
        state.map.insert(chunknum, data.clone());

        // Retention pass: evict everything outside the retained set, oldest
        // index first, until at most `min_cached` entries remain. The floor
        // prevents thrash when a reader alternates between adjacent chunks.
        // The entry registered above is exempt this pass.
        if state.map.len() > self.min_cached {
            let retained = Self::retained(state.nchunks);
            let mut candidates: Vec<u64> = state
                .map
                .keys()
                .copied()
                .filter(|c| *c != chunknum && !retained.contains(c))
                .collect();
            candidates.sort_unstable();
            for candidate in candidates {
                if state.map.len() <= self.min_cached {
                    break;
                }
                tracing::trace!(
                    target: "cloud::cache",
                    share_key = %self.share_key,
                    chunknum = candidate,
                    "evicting cached chunk"
                );
                state.map.remove(&candidate);
            }
        }

        let container = self.container.clone();
        let key = chunk_key(&self.share_key, chunknum);
        let admission = self.pipeline.submit(1, async move {
            let res = container.get_object(&key).await;
            let outcome = res.as_ref().map(|_| ()).map_err(Clone::clone);
            resolver.resolve(res);
            outcome
        });
        (admission, data)
    }

    /// Drops the map entry, if present. Readers already holding the data
    /// handle still resolve normally; an in-flight fetch is not aborted.
    pub fn flush_chunk(&self, chunknum: u64) {
        self.state.lock().map.remove(&chunknum);
    }

    /// Drops all entries and closes the pipeline. The returned handle
    /// resolves when no fetches remain in flight.
    pub fn close(&self) -> AdmissionHandle {
        self.state.lock().map.clear();
        self.pipeline.close()
    }

    #[cfg(test)]
    pub(crate) fn cached_chunknums(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.state.lock().map.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::testonly::{InMemoryContainer, Op};
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use skyvault_primitives::share_key;
    use skyvault_primitives::storage_index::StorageIndex;

    fn test_share_key() -> String {
        share_key(&StorageIndex::new([7; 16]), 0)
    }

    fn populated_with_config(
        nchunks: u64,
        config: &CloudStoreConfig,
    ) -> (Arc<InMemoryContainer>, ChunkCache) {
        let container = InMemoryContainer::new("bucket");
        let key = test_share_key();
        for c in 0..nchunks {
            container.put_for_test(&chunk_key(&key, c), format!("chunk{}", c).as_bytes());
        }
        let retrying =
            Arc::new(RetryingContainer::new(container.clone() as Arc<dyn Container>));
        let cache = ChunkCache::new(retrying, key, nchunks, config);
        (container, cache)
    }

    fn populated(nchunks: u64) -> (Arc<InMemoryContainer>, ChunkCache) {
        populated_with_config(nchunks, &CloudStoreConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_fetch() {
        let (container, cache) = populated(3);
        let (adm_a, data_a) = cache.get(1);
        let (adm_b, data_b) = cache.get(1);
        adm_a.wait().await.unwrap();
        adm_b.wait().await.unwrap();
        assert_eq!(&data_a.wait().await.unwrap()[..], b"chunk1");
        assert_eq!(&data_b.wait().await.unwrap()[..], b"chunk1");
        assert_eq!(container.op_count(Op::Get), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_scan_retains_header_and_tail() {
        let (_container, cache) = populated(7);
        for chunknum in 0..7 {
            let (admission, data) = cache.get(chunknum);
            admission.wait().await.unwrap();
            data.wait().await.unwrap();
        }
        assert_eq!(cache.cached_chunknums(), vec![0, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_nchunks_moves_the_retained_tail() {
        let (_container, cache) = populated(10);
        // The share header turned out to describe a 7-chunk share.
        cache.set_nchunks(7);
        for chunknum in 0..7 {
            let (admission, data) = cache.get(chunknum);
            admission.wait().await.unwrap();
            data.wait().await.unwrap();
        }
        assert_eq!(cache.cached_chunknums(), vec![0, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_pipeline_depth_gates_admission() {
        let config = CloudStoreConfig { pipeline_depth: 1, ..CloudStoreConfig::default() };
        let (_container, cache) = populated_with_config(3, &config);
        // At depth 1 every miss fills the pipeline, so its own admission
        // only resolves once the fetch completes.
        let (admission, data) = cache.get(0);
        assert!(admission.wait().now_or_never().is_none());
        data.wait().await.unwrap();
        admission.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn configured_retention_floor_shrinks_the_cache() {
        let config = CloudStoreConfig { min_cached_chunks: 1, ..CloudStoreConfig::default() };
        let (_container, cache) = populated_with_config(5, &config);
        for chunknum in 0..5 {
            let (admission, data) = cache.get(chunknum);
            admission.wait().await.unwrap();
            data.wait().await.unwrap();
        }
        // With a floor of one, only the retained set survives the scan.
        assert_eq!(cache.cached_chunknums(), vec![0, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_chunk_does_not_abort_inflight_readers() {
        let (container, cache) = populated(3);
        let (admission, data) = cache.get(2);
        cache.flush_chunk(2);
        admission.wait().await.unwrap();
        assert_eq!(&data.wait().await.unwrap()[..], b"chunk2");
        // The entry is gone: a new get fetches again.
        let (admission, data) = cache.get(2);
        admission.wait().await.unwrap();
        data.wait().await.unwrap();
        assert_eq!(container.op_count(Op::Get), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_reaches_every_reader() {
        let (container, cache) = populated(2);
        container.fail_next(Op::Get, &chunk_key(&test_share_key(), 1), &[403]);
        let (admission, data) = cache.get(1);
        admission.wait().await.unwrap();
        assert_matches!(data.wait().await, Err(CloudError::Service { .. }));
        // The fault poisoned the pipeline; further misses are refused.
        let (admission, _) = cache.get(0);
        assert_matches!(admission.wait().await, Err(CloudError::PipelineClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_the_pipeline() {
        let (_container, cache) = populated(3);
        let (admission, data) = cache.get(0);
        admission.wait().await.unwrap();
        cache.close().wait().await.unwrap();
        // Readers holding the handle across close still resolve.
        assert_eq!(&data.wait().await.unwrap()[..], b"chunk0");
    }
}
