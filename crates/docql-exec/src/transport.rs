//! The store seam: what the executor sends and what it gets back.

use std::collections::HashMap;

use async_trait::async_trait;
use docql_core::sql::SelectExpr;
use serde_json::Value;
use uuid::Uuid;

use crate::error::TransportError;

/// One page request of a dialect query.
#[derive(Debug, Clone)]
pub struct FeedRequest<'a> {
    pub container: &'a str,
    pub select: &'a SelectExpr,
    pub text: &'a str,
    pub parameters: &'a HashMap<String, Value>,
    /// Maximum documents per page; `None` lets the store decide.
    pub page_size: Option<usize>,
    /// Token returned with the previous page.
    pub continuation: Option<&'a str>,
    pub activity_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub documents: Vec<Value>,
    /// `None` when the result is exhausted.
    pub continuation: Option<String>,
}

/// Direct fetch of one document.
#[derive(Debug, Clone)]
pub struct ReadRequest<'a> {
    pub container: &'a str,
    pub id: &'a str,
    /// Stored property name and value of the partition key.
    pub partition_key: Option<(&'a str, &'a Value)>,
    pub activity_id: Uuid,
}

pub trait DocumentTransport: Send + Sync {
    /// Whether the blocking methods below are available.
    fn supports_sync(&self) -> bool {
        true
    }

    fn query(&self, request: &FeedRequest<'_>) -> Result<FeedPage, TransportError>;

    fn read_item(&self, request: &ReadRequest<'_>) -> Result<Option<Value>, TransportError>;
}

#[async_trait]
pub trait AsyncDocumentTransport: Send + Sync {
    async fn query_async(&self, request: &FeedRequest<'_>) -> Result<FeedPage, TransportError>;

    async fn read_item_async(&self, request: &ReadRequest<'_>) -> Result<Option<Value>, TransportError>;
}

/// A transport usable from both entry points.
pub trait Transport: DocumentTransport + AsyncDocumentTransport {}

impl<T: DocumentTransport + AsyncDocumentTransport + ?Sized> Transport for T {}
