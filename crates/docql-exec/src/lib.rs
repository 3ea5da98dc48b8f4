#![forbid(unsafe_code)]
//! docql-exec: running compiled queries against a document store.
//!
//! - `executor`: blocking and async entry points, continuation-token pages
//! - `cache`: compiled plans keyed by structural signature
//! - `transport`: the store seam; `memory` is an in-process implementation
//! - `materialize`: stored documents back to model-shaped values
//! - `context`: per-invocation recorder injection

pub mod cache;
pub mod context;
pub mod error;
pub mod executor;
pub mod materialize;
pub mod memory;
pub mod metrics;
pub mod transport;

pub use cache::{CacheStats, QueryCache};
pub use context::{CommandLog, QueryContext, QueryRecorder};
pub use error::{ExecError, Result, TransportError};
pub use executor::{Executor, Page, Prepared, QueryOutput};
pub use materialize::Materializer;
pub use memory::MemoryTransport;
pub use transport::{AsyncDocumentTransport, DocumentTransport, FeedPage, FeedRequest, ReadRequest, Transport};
