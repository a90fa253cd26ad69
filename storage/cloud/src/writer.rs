//! Write-side producer: splits an unbounded byte stream into chunk objects
//! and PUTs them through a backpressure pipeline.
//!
//! The pipeline gauge is measured in in-flight bytes here, so a slow store
//! bounds the producer's memory instead of letting queued PUTs pile up.

use crate::config::CloudStoreConfig;
use crate::error::CloudError;
use crate::pipeline::BackpressurePipeline;
use crate::retry::RetryingContainer;
use bytes::BytesMut;
use skyvault_primitives::{chunk_key, zero_chunkdata};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ChunkWriter {
    container: Arc<RetryingContainer>,
    share_key: String,
    chunksize: usize,
    pipeline: BackpressurePipeline,
    buffer: BytesMut,
    next_chunknum: u64,
    written: u64,
}

impl ChunkWriter {
    /// New shares are chunked at `config.preferred_chunk_size`, with
    /// `config.pipeline_depth` chunk-sized PUTs in flight before `write`
    /// starts suspending.
    pub fn new(container: Arc<RetryingContainer>, share_key: String, config: &CloudStoreConfig) -> Self {
        let chunksize = config.preferred_chunk_size;
        assert!(chunksize > 0, "chunksize must be positive");
        assert!(config.pipeline_depth > 0, "pipeline depth must be positive");
        Self {
            container,
            share_key,
            chunksize,
            pipeline: BackpressurePipeline::new(config.pipeline_depth * chunksize),
            buffer: BytesMut::with_capacity(chunksize),
            next_chunknum: 0,
            written: 0,
        }
    }

    /// Total bytes accepted so far, including bytes still buffered.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends `data` to the share, launching a PUT for every completed
    /// chunk. Suspends while the pipeline is above capacity; fails with the
    /// pipeline's fault once any PUT has failed.
    pub async fn write(&mut self, mut data: &[u8]) -> Result<(), CloudError> {
        self.written += data.len() as u64;
        while !data.is_empty() {
            let take = (self.chunksize - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.chunksize {
                self.put_buffered_chunk().await?;
            }
        }
        Ok(())
    }

    /// Zero-fills up to `offset`, which must not be behind the write head.
    pub async fn pad_to(&mut self, offset: u64) -> Result<(), CloudError> {
        assert!(
            offset >= self.written,
            "pad_to({}) is behind the write head at {}",
            offset,
            self.written
        );
        while self.written < offset {
            let span = (offset - self.written).min(self.chunksize as u64) as usize;
            let zeros = zero_chunkdata(span);
            self.write(&zeros).await?;
        }
        Ok(())
    }

    /// Flushes the partial last chunk, drains all in-flight PUTs and
    /// returns the total share size written.
    pub async fn finish(mut self) -> Result<u64, CloudError> {
        if !self.buffer.is_empty() {
            self.put_buffered_chunk().await?;
        }
        self.pipeline.close().wait().await?;
        Ok(self.written)
    }

    async fn put_buffered_chunk(&mut self) -> Result<(), CloudError> {
        let chunk = std::mem::take(&mut self.buffer).freeze();
        self.buffer.reserve(self.chunksize);
        let key = chunk_key(&self.share_key, self.next_chunknum);
        self.next_chunknum += 1;
        let size = chunk.len();
        let container = self.container.clone();
        let admission = self.pipeline.submit(size, async move {
            let metadata = BTreeMap::new();
            container.put_object(&key, chunk, None, &metadata).await
        });
        admission.wait().await
    }
}
