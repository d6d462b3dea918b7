//! Gateway-side request/response representation and the backend seams.
//!
//! A [`BackendFactory`] turns a [`RouteConfig`] into a [`Backend`] once, at route setup time. The
//! resulting backend then serves every request matched to that route.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, Stream, StreamExt};
use serde::Serialize;

use crate::{context::RequestContext, error::Error, spec::RouteConfig};

/// Inbound request body. Consumed at most once.
pub struct RequestBody {
    stream: BoxStream<'static, std::io::Result<Bytes>>,
}

impl RequestBody {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::from_stream(futures::stream::once(async move { Ok(bytes) }))
    }

    pub fn empty() -> Self {
        Self::from_stream(futures::stream::empty())
    }

    /// Read the whole stream into memory.
    pub async fn read_to_end(mut self) -> std::io::Result<Bytes> {
        let Some(first) = self.stream.next().await.transpose()? else {
            return Ok(Bytes::new());
        };
        let Some(second) = self.stream.next().await.transpose()? else {
            return Ok(first);
        };

        let mut buf = BytesMut::with_capacity(first.len() + second.len());
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestBody(..)")
    }
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        Self::from_bytes(value)
    }
}

impl From<&'static str> for RequestBody {
    fn from(value: &'static str) -> Self {
        Self::from_bytes(value)
    }
}

#[derive(Debug, Default)]
/// A request as seen by a backend.
pub struct Request {
    pub method: String,
    pub url: http::Uri,
    pub path: String,
    /// Route template placeholders. Keys are case-sensitive.
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, Vec<String>>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Option<RequestBody>,
}

impl Request {
    /// Take the body out of the request. Subsequent calls return `None`.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    pub status_code: u16,
    pub headers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
/// A backend response handed back to the gateway.
pub struct Response {
    pub data: serde_json::Map<String, serde_json::Value>,
    pub is_complete: bool,
    pub metadata: Metadata,
}

#[async_trait]
/// Handles requests for a single route.
pub trait Backend: Send + Sync {
    async fn call(&self, ctx: &RequestContext, req: Request) -> Result<Response, Error>;
}

#[async_trait]
/// Builds the [`Backend`] serving a route.
pub trait BackendFactory: Send + Sync {
    async fn build(&self, route: &RouteConfig) -> Arc<dyn Backend>;
}
