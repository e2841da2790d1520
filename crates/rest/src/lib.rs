//! REST transport for the lakestore client.
//!
//! [`RestTransport`] is the seam between the file-system layer and the
//! wire. [`HttpTransport`] talks WebHDFS over HTTPS; [`MemoryTransport`]
//! keeps a whole store in memory and can inject faults, which is what the
//! higher layers test against.

pub mod error;
pub mod http;
pub mod memory;
pub mod request;
pub mod transport;

pub use error::RestError;
pub use http::{HttpConfig, HttpTransport};
pub use memory::{Fault, MemoryTransport, RecordedCall};
pub use request::{RestRequest, RestResponse};
pub use transport::{BoxFuture, RestTransport};
