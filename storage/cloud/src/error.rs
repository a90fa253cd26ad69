use crate::container::ServiceError;

/// User-visible failure of a cloud share operation.
///
/// Clonable so a single failure can fan out through every shared handle that
/// was waiting on the operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// A container operation failed after retry handling. Wraps the *first*
    /// error observed, which tends to carry the most diagnostic context.
    #[error("cloud container operation failed: {description}: {first}")]
    Service {
        description: String,
        #[source]
        first: ServiceError,
    },
    /// A paginated listing returned a marker that did not advance; the store
    /// is looping and the listing can never terminate.
    #[error("object listing is not making progress past marker {marker:?}")]
    ListingStalled { marker: String },
    /// Work was submitted to a pipeline that has already been closed or has
    /// absorbed a fault.
    #[error("pipeline is closed")]
    PipelineClosed,
    /// The operation backing a handle was dropped before it could resolve.
    #[error("operation was abandoned before completing")]
    Aborted,
}

impl CloudError {
    /// Status code of the underlying service failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Service { first, .. } => Some(first.status),
            _ => None,
        }
    }
}
