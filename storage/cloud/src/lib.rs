//! Share I/O against a cloud object container.
//!
//! Shares are stored as sequences of fixed-size chunk objects in a flat
//! key/value container (S3-style LIST/GET/PUT/HEAD/DELETE). This crate
//! provides read-side chunked access with prefetch pipelining and a bounded
//! chunk cache, write-side backpressure over an unbounded producer of object
//! writes, retry handling for transient server errors and paginated listing
//! for keyspaces larger than one page.
//!
//! The call graph, outermost first: [`CloudShare`] reads consult the
//! [`ChunkCache`], which on a miss submits a fetch through its
//! [`BackpressurePipeline`]; every container round trip goes through
//! [`RetryingContainer`], which drives a raw [`Container`] implementation.

pub mod cache;
pub mod config;
pub mod container;
mod error;
pub mod handle;
mod metrics;
pub mod pipeline;
pub mod retry;
pub mod share;
pub mod testonly;
pub mod writer;

pub use crate::cache::ChunkCache;
pub use crate::config::CloudStoreConfig;
pub use crate::container::{
    Container, ContainerListing, ListingEntry, ObjectMetadata, ServiceError,
};
pub use crate::error::CloudError;
pub use crate::pipeline::BackpressurePipeline;
pub use crate::retry::RetryingContainer;
pub use crate::share::{CloudShare, ShareBase, ShareParams, delete_share_chunks};
pub use crate::writer::ChunkWriter;
