//! Test doubles for the container layer.
//!
//! [`InMemoryContainer`] keeps the keyspace in a `BTreeMap`, serves
//! single-page listings with a configurable page cap, counts every operation
//! and can be scripted to fail upcoming calls with chosen status codes.

use crate::container::{Container, ContainerListing, ListingEntry, ObjectMetadata, ServiceError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Default page cap of S3-style stores.
const DEFAULT_MAX_KEYS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    DeleteContainer,
    List,
    Get,
    Head,
    Put,
    Delete,
}

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
    etag: String,
    modified: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    faults: HashMap<(Op, String), VecDeque<ServiceError>>,
    counters: HashMap<Op, usize>,
    max_keys: usize,
    stall_listings: bool,
    clock: u64,
}

pub struct InMemoryContainer {
    name: String,
    state: Mutex<State>,
}

impl InMemoryContainer {
    pub fn new(name: &str) -> Arc<Self> {
        let state = State { max_keys: DEFAULT_MAX_KEYS, ..Default::default() };
        Arc::new(Self { name: name.to_string(), state: Mutex::new(state) })
    }

    /// Lowers the listing page cap so pagination kicks in with few keys.
    pub fn with_max_keys(self: Arc<Self>, max_keys: usize) -> Arc<Self> {
        self.state.lock().max_keys = max_keys;
        self
    }

    /// Stores an object without going through (or counting as) a PUT.
    pub fn put_for_test(&self, key: &str, data: &[u8]) {
        let mut state = self.state.lock();
        let object = Self::make_object(&mut state, Bytes::copy_from_slice(data), None, &BTreeMap::new());
        state.objects.insert(key.to_string(), object);
    }

    /// Scripts the next calls of `op` on `key` to fail with `statuses`,
    /// in order, before real handling resumes.
    pub fn fail_next(&self, op: Op, key: &str, statuses: &[u16]) {
        let mut state = self.state.lock();
        let queue = state.faults.entry((op, key.to_string())).or_default();
        for &status in statuses {
            queue.push_back(ServiceError::new(status, "injected failure"));
        }
    }

    /// Like [`fail_next`](Self::fail_next) with a response body attached.
    pub fn fail_next_with_body(&self, op: Op, key: &str, status: u16, body: &str) {
        let mut state = self.state.lock();
        state
            .faults
            .entry((op, key.to_string()))
            .or_default()
            .push_back(ServiceError::with_body(status, "injected failure", body));
    }

    /// Makes every future listing repeat its first page with the truncation
    /// flag set, as a looping store would.
    pub fn stall_listings(&self) {
        self.state.lock().stall_listings = true;
    }

    pub fn op_count(&self, op: Op) -> usize {
        *self.state.lock().counters.get(&op).unwrap_or(&0)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).map(|o| o.data.clone())
    }

    fn make_object(
        state: &mut State,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) -> StoredObject {
        state.clock += 1;
        StoredObject {
            etag: format!("\"{:016x}\"", fnv1a(&data)),
            modified: format!("2030-01-01T00:00:{:02}Z", state.clock % 60),
            data,
            content_type: content_type.map(str::to_string),
            metadata: metadata.clone(),
        }
    }

    /// Counts the call and pops a scripted fault, if one is queued.
    fn enter(&self, op: Op, key: &str) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        *state.counters.entry(op).or_default() += 1;
        if let Some(queue) = state.faults.get_mut(&(op, key.to_string())) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Container for InMemoryContainer {
    async fn create(&self) -> Result<(), ServiceError> {
        self.enter(Op::Create, "")
    }

    async fn delete(&self) -> Result<(), ServiceError> {
        self.enter(Op::DeleteContainer, "")?;
        let state = self.state.lock();
        if !state.objects.is_empty() {
            return Err(ServiceError::new(409, "container is not empty"));
        }
        Ok(())
    }

    async fn list_some_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ContainerListing, ServiceError> {
        self.enter(Op::List, prefix)?;
        let state = self.state.lock();
        let effective_marker = if state.stall_listings { None } else { marker };
        let matching: Vec<(&String, &StoredObject)> = state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| effective_marker.is_none_or(|m| key.as_str() > m))
            .collect();
        let page: Vec<ListingEntry> = matching
            .iter()
            .take(state.max_keys)
            .map(|(key, object)| ListingEntry {
                key: (*key).clone(),
                size: object.data.len() as u64,
                modified: object.modified.clone(),
                etag: object.etag.clone(),
            })
            .collect();
        let is_truncated = state.stall_listings && !page.is_empty()
            || matching.len() > state.max_keys;
        Ok(ContainerListing {
            name: self.name.clone(),
            prefix: prefix.to_string(),
            marker: marker.map(str::to_string),
            max_keys: state.max_keys,
            is_truncated,
            contents: page,
        })
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ServiceError> {
        self.enter(Op::Put, key)?;
        let mut state = self.state.lock();
        let object = Self::make_object(&mut state, data, content_type, metadata);
        state.objects.insert(key.to_string(), object);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, ServiceError> {
        self.enter(Op::Get, key)?;
        let state = self.state.lock();
        match state.objects.get(key) {
            Some(object) => Ok(object.data.clone()),
            None => Err(ServiceError::new(404, format!("no such object: {}", key))),
        }
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMetadata, ServiceError> {
        self.enter(Op::Head, key)?;
        let state = self.state.lock();
        match state.objects.get(key) {
            Some(object) => Ok(ObjectMetadata {
                size: object.data.len() as u64,
                content_type: object.content_type.clone(),
                etag: Some(object.etag.clone()),
                metadata: object.metadata.clone(),
            }),
            None => Err(ServiceError::new(404, format!("no such object: {}", key))),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), ServiceError> {
        self.enter(Op::Delete, key)?;
        let mut state = self.state.lock();
        match state.objects.remove(key) {
            Some(_) => Ok(()),
            None => Err(ServiceError::new(404, format!("no such object: {}", key))),
        }
    }
}

/// Installs a human-readable log subscriber for tests. Safe to call from
/// every test; only the first call wins.
pub fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
