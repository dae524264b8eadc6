use crate::error::{Error, Result};
use bytes::Bytes;
use http::Method;
use url::Url;

/// A request descriptor as seen by the interceptor.
///
/// Header names are stored lowercased. The body is only meaningful for
/// pass-through requests; cacheable requests are always GET.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build a GET request from an absolute URL string.
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::new(Method::GET, url))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Normalized store key: method and URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }

    /// Whether this request targets the same scheme, host and port as `origin`.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://app.example.com").unwrap()
    }

    #[test]
    fn cache_key_strips_fragment() {
        let a = Request::get("https://app.example.com/app.js#v=1").unwrap();
        let b = Request::get("https://app.example.com/app.js").unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(b.cache_key(), "GET https://app.example.com/app.js");
    }

    #[test]
    fn cache_key_keeps_query() {
        let a = Request::get("https://app.example.com/data?page=1").unwrap();
        let b = Request::get("https://app.example.com/data?page=2").unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn same_origin_requires_scheme_host_and_port() {
        let local = Request::get("https://app.example.com/index.html").unwrap();
        assert!(local.is_same_origin(&origin()));

        let other_port = Request::get("https://app.example.com:8443/index.html").unwrap();
        assert!(!other_port.is_same_origin(&origin()));

        let plain = Request::get("http://app.example.com/index.html").unwrap();
        assert!(!plain.is_same_origin(&origin()));

        // A host that merely starts with the origin string is still external
        let lookalike = Request::get("https://app.example.com.evil.net/x.js").unwrap();
        assert!(!lookalike.is_same_origin(&origin()));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::get("https://cdn.example.com/lib.js")
            .unwrap()
            .with_header("Accept-Encoding", "gzip");
        assert_eq!(req.header("accept-encoding"), Some("gzip"));
        assert_eq!(req.header("ACCEPT-ENCODING"), Some("gzip"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn rejects_relative_url() {
        assert!(matches!(Request::get("/app.js"), Err(Error::InvalidUrl(_))));
    }
}
