//! The thinnest possible adapter over a remote object container.
//!
//! Implementations translate these calls into whatever wire protocol the
//! service speaks and report failures as [`ServiceError`] with the HTTP-style
//! status code preserved. No retries happen at this layer; see
//! [`crate::retry::RetryingContainer`].

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Failure of a single container round trip.
///
/// `body` is the raw error document returned by the service, when there was
/// one. It may be large; it is never logged by this crate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("status {status}: {reason}")]
pub struct ServiceError {
    pub status: u16,
    pub reason: String,
    pub body: Option<String>,
}

impl ServiceError {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self { status, reason: reason.into(), body: None }
    }

    pub fn with_body(status: u16, reason: impl Into<String>, body: impl Into<String>) -> Self {
        Self { status, reason: reason.into(), body: Some(body.into()) }
    }

    /// Transient server-side failure, worth retrying.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// One entry of a LIST page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub key: String,
    pub size: u64,
    /// Last-modified timestamp as rendered by the service.
    pub modified: String,
    pub etag: String,
}

/// One page of a LIST response, or the synthetic concatenation of all pages
/// produced by [`crate::retry::RetryingContainer::list_objects`].
///
/// `contents` is sorted lexicographically by key; `marker` is the key after
/// which this page starts.
#[derive(Debug, Clone)]
pub struct ContainerListing {
    pub name: String,
    pub prefix: String,
    pub marker: Option<String>,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub contents: Vec<ListingEntry>,
}

/// Metadata of a stored object as returned by HEAD.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A cloud container holding objects under string keys.
///
/// Every operation is a single round trip completing asynchronously; errors
/// carry the service's numeric status. `list_some_objects` returns at most
/// one page (implementations are assumed to cap a page at 1000 entries) and
/// sets `is_truncated` when more keys exist past the page.
///
/// `delete_object` of a missing key may report 404; callers for whom
/// "already gone" is success (share deletion) suppress it themselves.
#[async_trait]
pub trait Container: Send + Sync + 'static {
    /// Create the container itself.
    async fn create(&self) -> Result<(), ServiceError>;

    /// Delete the container. Services may require it to be empty first.
    async fn delete(&self) -> Result<(), ServiceError>;

    /// Fetch one page of keys starting with `prefix`, strictly after
    /// `marker`.
    async fn list_some_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ContainerListing, ServiceError>;

    /// Store an object, replacing any existing object of the same key.
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ServiceError>;

    async fn get_object(&self, key: &str) -> Result<Bytes, ServiceError>;

    async fn head_object(&self, key: &str) -> Result<ObjectMetadata, ServiceError>;

    async fn delete_object(&self, key: &str) -> Result<(), ServiceError>;
}
