//! Retry handling and paginated listing around a raw [`Container`].
//!
//! Transient server errors (5xx) are retried on a fixed backoff schedule;
//! anything else escalates immediately. A call that failed at least once
//! emits exactly one incident record at warn level once its final outcome is
//! known, with per-try failures at debug. Only operation descriptions and
//! keys are logged; payload bytes never are.

use crate::container::{Container, ContainerListing, ObjectMetadata, ServiceError};
use crate::error::CloudError;
use crate::metrics;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Seconds to wait before each retry of a 5xx failure. The length of the
/// schedule bounds the number of retries.
pub const BACKOFF_SECONDS_FOR_5XX: [u64; 3] = [0, 2, 10];

/// Error bodies mentioning this token embed the whole signed request,
/// including credentials material, and are redacted before surfacing.
const SIGNATURE_MISMATCH_TOKEN: &str = "signaturedoesnotmatch";
const SIGNATURE_MISMATCH_PLACEHOLDER: &str = "SignatureDoesNotMatch response redacted";

fn redact(mut err: ServiceError) -> ServiceError {
    if let Some(body) = &err.body {
        if body.to_lowercase().contains(SIGNATURE_MISMATCH_TOKEN) {
            err.body = Some(SIGNATURE_MISMATCH_PLACEHOLDER.to_string());
        }
    }
    err
}

/// A [`Container`] with retry handling on every operation, plus the
/// repeat-until-untruncated listing helper.
pub struct RetryingContainer {
    inner: Arc<dyn Container>,
    backoff: Vec<Duration>,
}

impl RetryingContainer {
    pub fn new(inner: Arc<dyn Container>) -> Self {
        Self {
            inner,
            backoff: BACKOFF_SECONDS_FOR_5XX.iter().map(|&s| Duration::from_secs(s)).collect(),
        }
    }

    /// Overrides the default 5xx backoff schedule.
    pub fn with_backoff(inner: Arc<dyn Container>, backoff: Vec<Duration>) -> Self {
        Self { inner, backoff }
    }

    /// Drives one container operation through the retry schedule.
    ///
    /// On exhaustion the *first* error is surfaced, not the last: early
    /// errors frequently carry more diagnostic context. `shown_args` is the
    /// loggable argument summary (a key, a prefix), never payload data.
    async fn do_request<T, F, Fut>(
        &self,
        description: &'static str,
        shown_args: &str,
        mut op: F,
    ) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut first_err: Option<ServiceError> = None;
        let mut trynum = 1usize;
        loop {
            match op().await {
                Ok(value) => {
                    if first_err.is_some() {
                        self.incident(description, shown_args, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let err = redact(err);
                    metrics::CONTAINER_OP_FAILED_TRIES.with_label_values(&[description]).inc();
                    tracing::debug!(
                        target: "cloud",
                        description,
                        args = shown_args,
                        trynum,
                        status = err.status,
                        reason = %err.reason,
                        "container operation try failed"
                    );
                    let first = first_err.get_or_insert_with(|| err.clone());
                    if !err.is_server_error() {
                        // A non-5xx response is definitive even on a retry.
                        self.incident(description, shown_args, "failed");
                        return Err(CloudError::Service {
                            description: description.to_string(),
                            first: err,
                        });
                    }
                    if trynum > self.backoff.len() {
                        let first = first.clone();
                        self.incident(description, shown_args, "failed");
                        return Err(CloudError::Service {
                            description: description.to_string(),
                            first,
                        });
                    }
                    tokio::time::sleep(self.backoff[trynum - 1]).await;
                    trynum += 1;
                }
            }
        }
    }

    fn incident(&self, description: &'static str, shown_args: &str, outcome: &'static str) {
        metrics::CONTAINER_INCIDENTS.with_label_values(&[description]).inc();
        tracing::warn!(
            target: "cloud",
            description,
            args = shown_args,
            outcome,
            "error(s) on cloud container operation"
        );
    }

    pub async fn create(&self) -> Result<(), CloudError> {
        self.do_request("create container", "", || self.inner.create()).await
    }

    pub async fn delete(&self) -> Result<(), CloudError> {
        self.do_request("delete container", "", || self.inner.delete()).await
    }

    pub async fn get_object(&self, key: &str) -> Result<Bytes, CloudError> {
        self.do_request("GET object", key, || self.inner.get_object(key)).await
    }

    pub async fn head_object(&self, key: &str) -> Result<ObjectMetadata, CloudError> {
        self.do_request("HEAD object", key, || self.inner.head_object(key)).await
    }

    pub async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), CloudError> {
        self.do_request("PUT object", key, || {
            self.inner.put_object(key, data.clone(), content_type, metadata)
        })
        .await
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), CloudError> {
        self.do_request("DELETE object", key, || self.inner.delete_object(key)).await
    }

    pub async fn list_some_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ContainerListing, CloudError> {
        self.do_request("list objects", prefix, || self.inner.list_some_objects(prefix, marker))
            .await
    }

    /// Lists every key starting with `prefix`, repeating the page request
    /// with the continuation marker until the truncation flag clears.
    ///
    /// The returned listing carries the concatenation of all pages and
    /// `is_truncated = false`. Each page's last key must sort strictly after
    /// the previous marker; a store that hands back a non-advancing marker
    /// would loop forever and is reported as [`CloudError::ListingStalled`].
    pub async fn list_objects(&self, prefix: &str) -> Result<ContainerListing, CloudError> {
        let mut pages: Vec<ContainerListing> = Vec::new();
        let mut marker: Option<String> = None;
        let last_page = loop {
            let page = self.list_some_objects(prefix, marker.as_deref()).await?;
            if !page.is_truncated {
                break page;
            }
            assert!(!page.contents.is_empty(), "truncated listing page has no contents");
            let next = page.contents.last().expect("page is non-empty").key.clone();
            if let Some(prev) = &marker {
                if next <= *prev {
                    tracing::warn!(
                        target: "cloud",
                        prefix,
                        marker = %next,
                        "listing marker did not advance"
                    );
                    return Err(CloudError::ListingStalled { marker: next });
                }
            }
            marker = Some(next);
            pages.push(page);
        };

        // One pre-sized buffer, one copy of each entry.
        let total = pages.iter().map(|p| p.contents.len()).sum::<usize>() + last_page.contents.len();
        let mut contents = Vec::with_capacity(total);
        for page in pages {
            contents.extend(page.contents);
        }
        let ContainerListing { name, prefix, marker, max_keys, contents: tail, .. } = last_page;
        contents.extend(tail);
        Ok(ContainerListing { name, prefix, marker, max_keys, is_truncated: false, contents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testonly::{InMemoryContainer, Op};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts warn-level incident records emitted under the `cloud` target
    /// while the guard lives. Subscribers are thread-local, which is exactly
    /// right for a current-thread test runtime.
    struct IncidentCounter {
        count: Arc<AtomicUsize>,
        _guard: tracing::subscriber::DefaultGuard,
    }

    impl IncidentCounter {
        fn install() -> Self {
            use tracing_subscriber::layer::SubscriberExt;
            let count = Arc::new(AtomicUsize::new(0));
            let layer = CountingLayer(count.clone());
            let subscriber = tracing_subscriber::registry().with(layer);
            let _guard = tracing::subscriber::set_default(subscriber);
            Self { count, _guard }
        }

        fn get(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    struct CountingLayer(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CountingLayer {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let meta = event.metadata();
            if meta.target() == "cloud" && *meta.level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn retrying(container: &Arc<InMemoryContainer>) -> RetryingContainer {
        RetryingContainer::new(container.clone() as Arc<dyn Container>)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_5xx_is_retried_with_one_incident() {
        let container = InMemoryContainer::new("bucket");
        container.put_for_test("k", b"payload");
        container.fail_next(Op::Get, "k", &[503, 503]);
        let incidents = IncidentCounter::install();

        let retrying = retrying(&container);
        let data = retrying.get_object("k").await.unwrap();
        assert_eq!(&data[..], b"payload");
        assert_eq!(container.op_count(Op::Get), 3);
        assert_eq!(incidents.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_first_error() {
        let container = InMemoryContainer::new("bucket");
        container.put_for_test("k", b"payload");
        container.fail_next(Op::Get, "k", &[500, 501, 502, 503]);
        let incidents = IncidentCounter::install();

        let retrying = retrying(&container);
        let err = retrying.get_object("k").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        // Initial try plus one per backoff slot.
        assert_eq!(container.op_count(Op::Get), 1 + BACKOFF_SECONDS_FOR_5XX.len());
        assert_eq!(incidents.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_5xx_escalates_immediately() {
        let container = InMemoryContainer::new("bucket");
        container.fail_next(Op::Get, "missing", &[404]);
        let incidents = IncidentCounter::install();

        let retrying = retrying(&container);
        let err = retrying.get_object("missing").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(container.op_count(Op::Get), 1);
        assert_eq!(incidents.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_5xx_on_a_retry_surfaces_that_error() {
        let container = InMemoryContainer::new("bucket");
        container.put_for_test("k", b"payload");
        container.fail_next(Op::Get, "k", &[503, 403]);

        let retrying = retrying(&container);
        let err = retrying.get_object("k").await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(container.op_count(Op::Get), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn signature_mismatch_bodies_are_redacted() {
        let container = InMemoryContainer::new("bucket");
        container.fail_next_with_body(
            Op::Get,
            "k",
            403,
            "<Error><Code>SignatureDoesNotMatch</Code><StringToSign>AWS secret</StringToSign></Error>",
        );

        let retrying = retrying(&container);
        let err = retrying.get_object("k").await.unwrap_err();
        assert_matches!(err, CloudError::Service { first: ServiceError { body: Some(body), .. }, .. } => {
            assert_eq!(body, SIGNATURE_MISMATCH_PLACEHOLDER);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn success_emits_no_incident() {
        let container = InMemoryContainer::new("bucket");
        container.put_for_test("k", b"payload");
        let incidents = IncidentCounter::install();

        let retrying = retrying(&container);
        retrying.get_object("k").await.unwrap();
        assert_eq!(incidents.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn listing_concatenates_pages_in_order() {
        let container = InMemoryContainer::new("bucket").with_max_keys(3);
        for i in 0..8 {
            container.put_for_test(&format!("prefix/{:02}", i), b"x");
        }
        container.put_for_test("other/0", b"x");

        let retrying = retrying(&container);
        let listing = retrying.list_objects("prefix/").await.unwrap();
        assert!(!listing.is_truncated);
        assert_eq!(listing.contents.len(), 8);
        let keys: Vec<&str> = listing.contents.iter().map(|e| e.key.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(container.op_count(Op::List), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_marker_is_a_protocol_error() {
        let container = InMemoryContainer::new("bucket").with_max_keys(2);
        for i in 0..6 {
            container.put_for_test(&format!("prefix/{}", i), b"x");
        }
        container.stall_listings();

        let retrying = retrying(&container);
        assert_matches!(
            retrying.list_objects("prefix/").await,
            Err(CloudError::ListingStalled { .. })
        );
    }
}
