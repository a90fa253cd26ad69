use prometheus::{
    IntCounter, IntCounterVec, IntGauge, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};
use std::sync::LazyLock;

pub(crate) static CONTAINER_OP_FAILED_TRIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "skyvault_container_op_failed_tries_total",
        "Failed tries of container operations, including tries that were later retried",
        &["operation"]
    )
    .unwrap()
});

pub(crate) static CONTAINER_INCIDENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "skyvault_container_incidents_total",
        "Container operations that failed at least once, whatever the final outcome",
        &["operation"]
    )
    .unwrap()
});

pub(crate) static CHUNK_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "skyvault_chunk_cache_hits_total",
        "Chunk reads served from an existing cache entry"
    )
    .unwrap()
});

pub(crate) static CHUNK_CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "skyvault_chunk_cache_misses_total",
        "Chunk reads that had to fetch from the container"
    )
    .unwrap()
});

pub(crate) static PIPELINE_INFLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "skyvault_pipeline_inflight",
        "Sum of live slot sizes across all backpressure pipelines"
    )
    .unwrap()
});

pub(crate) static PIPELINE_FAULTS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "skyvault_pipeline_faults_total",
        "Pipelines poisoned by a failed operation"
    )
    .unwrap()
});
