use crate::error::{Error, Result};
use crate::request::Request;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const OFFLINE_STATUS: u16 = 503;
pub const OFFLINE_BODY: &str = "Offline";

/// Response type as a fetch host would report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response.
    Basic,
    /// Cross-origin response with readable body.
    Cors,
    /// Cross-origin response whose body and status are hidden.
    Opaque,
    /// Transport-level failure placeholder that still resolved.
    Error,
}

/// A response whose body can be consumed exactly once.
///
/// To hand the same response to two consumers, call [`Response::try_clone`]
/// before either of them takes the body.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    kind: ResponseKind,
    body: Option<Bytes>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            kind: ResponseKind::Basic,
            body: Some(body.into()),
        }
    }

    /// A network-error placeholder: status 0, empty body, kind `error`.
    pub fn error() -> Self {
        Self::new(0, Bytes::new()).with_kind(ResponseKind::Error)
    }

    /// The uniform "no network and no cache entry" response.
    pub fn offline() -> Self {
        Self::new(OFFLINE_STATUS, OFFLINE_BODY)
            .with_header("content-type", "text/plain;charset=UTF-8")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn body_used(&self) -> bool {
        self.body.is_none()
    }

    /// Consume the body. Fails with [`Error::BodyUsed`] on a second call.
    pub fn take_body(&mut self) -> Result<Bytes> {
        self.body.take().ok_or(Error::BodyUsed)
    }

    pub fn into_body(mut self) -> Result<Bytes> {
        self.take_body()
    }

    /// Duplicate an unread response so both copies can be consumed.
    pub fn try_clone(&self) -> Result<Self> {
        let body = self.body.clone().ok_or(Error::BodyUsed)?;
        Ok(Self {
            status: self.status,
            headers: self.headers.clone(),
            kind: self.kind,
            body: Some(body),
        })
    }
}

/// Immutable snapshot of a response as held by a cache store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub kind: ResponseKind,
    pub body: Bytes,
    /// Request header values named by the response's `Vary` header,
    /// captured when the entry was written.
    pub vary: Vec<(String, Option<String>)>,
}

impl CachedResponse {
    /// Snapshot `response` for storage under `request`, consuming its body.
    pub fn capture(request: &Request, mut response: Response) -> Result<Self> {
        let body = response.take_body()?;
        let vary = response
            .header("vary")
            .map(|v| {
                v.split(',')
                    .map(|name| name.trim().to_ascii_lowercase())
                    .filter(|name| !name.is_empty())
                    .map(|name| {
                        let value = request.header(&name).map(str::to_string);
                        (name, value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            status: response.status,
            headers: response.headers,
            kind: response.kind,
            body,
            vary,
        })
    }

    /// Whether `request` carries the same values for every varied header.
    pub fn matches_vary(&self, request: &Request) -> bool {
        self.vary.iter().all(|(name, value)| {
            name != "*" && request.header(name) == value.as_deref()
        })
    }

    /// A fresh, unread response carrying this snapshot.
    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            kind: self.kind,
            body: Some(self.body.clone()),
        }
    }
}
