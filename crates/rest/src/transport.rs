use std::future::Future;
use std::pin::Pin;

use crate::{RestError, RestRequest, RestResponse};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Abstract connection to a store.
///
/// The file-system layer only ever talks to a store through this trait, so
/// it can run against [`HttpTransport`](crate::HttpTransport) in production
/// and [`MemoryTransport`](crate::MemoryTransport) in tests.
pub trait RestTransport: Send + Sync {
    /// Performs one call. Non-success replies come back as `Err`.
    fn call(&self, request: RestRequest) -> BoxFuture<'_, Result<RestResponse, RestError>>;

    /// Stable identifier of the store (e.g. its account name).
    fn identity(&self) -> &str;
}
