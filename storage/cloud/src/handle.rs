//! One-shot result handles that can be awaited by any number of readers.
//!
//! The chunk cache needs to hand out a handle for a fetch that has not
//! resolved yet, give clones of it to every concurrent reader, and resolve
//! all of them from the single underlying GET. A `futures` oneshot receiver
//! made [`Shared`] is exactly that shape.

use crate::error::CloudError;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;

/// The resolving side of a handle. Consumed by the single resolution.
pub struct Promise<T>(oneshot::Sender<T>);

impl<T> Promise<T> {
    /// Resolves every clone of the paired [`Handle`]. A promise whose
    /// handles were all dropped resolves into the void, which is fine.
    pub fn resolve(self, value: T) {
        let _ = self.0.send(value);
    }
}

/// A cloneable, await-many handle to a value that resolves at most once.
///
/// Dropping the [`Promise`] without resolving makes every waiter observe
/// [`CloudError::Aborted`].
#[derive(Clone)]
pub struct Handle<T: Clone>(Shared<oneshot::Receiver<T>>);

/// Creates an unresolved handle and its resolver.
pub fn promise<T: Clone>() -> (Promise<T>, Handle<T>) {
    let (tx, rx) = oneshot::channel();
    (Promise(tx), Handle(rx.shared()))
}

impl<T: Clone> Handle<Result<T, CloudError>> {
    /// An already-resolved handle; awaiting it never suspends.
    pub fn resolved(value: Result<T, CloudError>) -> Self {
        let (promise, handle) = promise();
        promise.resolve(value);
        handle
    }

    pub async fn wait(&self) -> Result<T, CloudError> {
        self.0.clone().await.unwrap_or(Err(CloudError::Aborted))
    }

    /// The resolved value, if resolution has already happened.
    pub fn peek(&self) -> Option<Result<T, CloudError>> {
        self.0.peek().and_then(|res| res.as_ref().ok()).cloned()
    }
}
