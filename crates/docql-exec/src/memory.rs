//! In-memory document containers.
//!
//! Runs compiled statements through the operators crate, so the documents
//! a test sees are the ones the dialect text would select. Continuation
//! tokens are `<statement hash>:<offset>`, where the hash covers the text
//! and the parameter values, so a token only resumes the exact request
//! that issued it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use docql_core::hash::SignatureHasher;
use docql_operators::execute_select;
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::{AsyncDocumentTransport, DocumentTransport, FeedPage, FeedRequest, ReadRequest};

#[derive(Debug, Default)]
pub struct MemoryTransport {
    containers: RwLock<HashMap<String, Vec<Value>>>,
    async_only: bool,
    reject_next: Mutex<Option<String>>,
    requests: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose blocking path is unavailable.
    pub fn async_only() -> Self {
        Self {
            async_only: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, container: &str, document: Value) {
        if let Ok(mut c) = self.containers.write() {
            c.entry(container.to_string()).or_default().push(document);
        }
    }

    pub fn insert_many(&self, container: &str, documents: impl IntoIterator<Item = Value>) {
        if let Ok(mut c) = self.containers.write() {
            c.entry(container.to_string()).or_default().extend(documents);
        }
    }

    pub fn len(&self, container: &str) -> usize {
        self.containers
            .read()
            .map(|c| c.get(container).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Fail the next request with `message`.
    pub fn reject_next(&self, message: impl Into<String>) {
        if let Ok(mut r) = self.reject_next.lock() {
            *r = Some(message.into());
        }
    }

    /// Number of requests served, failed ones included.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let pending = self.reject_next.lock().ok().and_then(|mut r| r.take());
        match pending {
            Some(message) => Err(TransportError::BadRequest(message)),
            None => Ok(()),
        }
    }

    fn run_query(&self, request: &FeedRequest<'_>) -> Result<FeedPage, TransportError> {
        self.begin()?;
        let statement = statement_key(request)?;
        let offset = match request.continuation {
            None => 0,
            Some(token) => token
                .split_once(':')
                .filter(|(h, _)| *h == statement)
                .and_then(|(_, o)| o.parse::<usize>().ok())
                .ok_or_else(|| TransportError::InvalidContinuation(token.to_string()))?,
        };

        let containers = self
            .containers
            .read()
            .map_err(|_| TransportError::Unavailable("container lock poisoned".into()))?;
        let documents = containers
            .get(request.container)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let rows = execute_select(request.select, documents, request.parameters)
            .map_err(|e| TransportError::BadRequest(e.to_string()))?;

        let Some(size) = request.page_size else {
            return Ok(FeedPage {
                documents: rows,
                continuation: None,
            });
        };
        let end = offset.saturating_add(size.max(1)).min(rows.len());
        let start = offset.min(end);
        let continuation = (end < rows.len()).then(|| format!("{statement}:{end}"));
        Ok(FeedPage {
            documents: rows[start..end].to_vec(),
            continuation,
        })
    }

    fn run_read(&self, request: &ReadRequest<'_>) -> Result<Option<Value>, TransportError> {
        self.begin()?;
        let containers = self
            .containers
            .read()
            .map_err(|_| TransportError::Unavailable("container lock poisoned".into()))?;
        let found = containers.get(request.container).and_then(|docs| {
            docs.iter().find(|d| {
                d.get("id").and_then(Value::as_str) == Some(request.id)
                    && request
                        .partition_key
                        .map_or(true, |(path, value)| d.get(path) == Some(value))
            })
        });
        Ok(found.cloned())
    }
}

/// Short hash of the statement text and its sorted parameter values.
fn statement_key(request: &FeedRequest<'_>) -> Result<String, TransportError> {
    let parameters: BTreeMap<&String, &Value> = request.parameters.iter().collect();
    let mut hasher = SignatureHasher::new("docql.continuation.v1");
    hasher
        .part("text", &request.text)
        .and_then(|h| h.part("parameters", &parameters))
        .map_err(|e| TransportError::BadRequest(e.to_string()))?;
    Ok(hasher.finish().short_hex())
}

impl DocumentTransport for MemoryTransport {
    fn supports_sync(&self) -> bool {
        !self.async_only
    }

    fn query(&self, request: &FeedRequest<'_>) -> Result<FeedPage, TransportError> {
        self.run_query(request)
    }

    fn read_item(&self, request: &ReadRequest<'_>) -> Result<Option<Value>, TransportError> {
        self.run_read(request)
    }
}

#[async_trait]
impl AsyncDocumentTransport for MemoryTransport {
    async fn query_async(&self, request: &FeedRequest<'_>) -> Result<FeedPage, TransportError> {
        tokio::task::yield_now().await;
        self.run_query(request)
    }

    async fn read_item_async(&self, request: &ReadRequest<'_>) -> Result<Option<Value>, TransportError> {
        tokio::task::yield_now().await;
        self.run_read(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::sql::{FromClause, Ordering as SqlOrdering, SelectExpr, SqlExpr};
    use serde_json::json;
    use uuid::Uuid;

    fn transport() -> MemoryTransport {
        let t = MemoryTransport::new();
        t.insert_many("Store", (1..=5).map(|i| json!({"id": format!("k{i}"), "n": i, "region": "eu"})));
        t
    }

    fn ordered() -> SelectExpr {
        let mut s = SelectExpr::new(SqlExpr::alias("c"), FromClause::Root { alias: "c".into() });
        s.orderings.push(SqlOrdering {
            expr: SqlExpr::alias("c").prop("n"),
            descending: false,
        });
        s
    }

    #[test]
    fn pages_resume_from_their_token() {
        let t = transport();
        let select = ordered();
        let text = select.to_text();
        let params = HashMap::new();
        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let request = FeedRequest {
                container: "Store",
                select: &select,
                text: &text,
                parameters: &params,
                page_size: Some(2),
                continuation: token.as_deref(),
                activity_id: Uuid::new_v4(),
            };
            let page = t.query(&request).unwrap();
            seen.extend(page.documents.iter().map(|d| d["n"].clone()));
            token = page.continuation;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(t.request_count(), 3);
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        let t = transport();
        let select = ordered();
        let params = HashMap::new();
        let request = FeedRequest {
            container: "Store",
            select: &select,
            text: "SELECT VALUE c FROM root c",
            parameters: &params,
            page_size: Some(2),
            continuation: Some("0123456789abcdef:2"),
            activity_id: Uuid::new_v4(),
        };
        assert!(matches!(t.query(&request), Err(TransportError::InvalidContinuation(_))));
    }

    #[test]
    fn tokens_are_bound_to_parameter_values() {
        let t = transport();
        let select = ordered();
        let text = select.to_text();
        let eu = HashMap::from([("__region_0".to_string(), json!("eu"))]);
        let us = HashMap::from([("__region_0".to_string(), json!("us"))]);
        let mut request = FeedRequest {
            container: "Store",
            select: &select,
            text: &text,
            parameters: &eu,
            page_size: Some(2),
            continuation: None,
            activity_id: Uuid::new_v4(),
        };
        let token = t.query(&request).unwrap().continuation.unwrap();

        request.continuation = Some(&token);
        assert!(t.query(&request).is_ok());
        request.parameters = &us;
        assert!(matches!(t.query(&request), Err(TransportError::InvalidContinuation(_))));
    }

    #[test]
    fn reads_match_id_and_partition_key() {
        let t = transport();
        let eu = json!("eu");
        let us = json!("us");
        let read = |pk: Option<(&str, &Value)>| {
            t.read_item(&ReadRequest {
                container: "Store",
                id: "k3",
                partition_key: pk,
                activity_id: Uuid::new_v4(),
            })
        };
        assert_eq!(read(None).unwrap().unwrap()["n"], json!(3));
        assert!(read(Some(("region", &eu))).unwrap().is_some());
        assert!(read(Some(("region", &us))).unwrap().is_none());

        t.reject_next("boom");
        assert_eq!(read(None), Err(TransportError::BadRequest("boom".into())));
        assert!(read(None).is_ok());
    }

    #[test]
    fn async_only_declares_no_sync_path() {
        assert!(MemoryTransport::new().supports_sync());
        assert!(!MemoryTransport::async_only().supports_sync());
    }
}
