use async_trait::async_trait;
use url::Url;
use waystation_cache::{Error, Network, Request, Response, ResponseKind};

/// Network capability backed by a `reqwest` client.
///
/// Requests for the application origin are sent to the upstream instead,
/// keeping path and query. Redirects are not followed, so 3xx responses
/// reach the interceptor as-is.
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: Url,
    upstream: String,
}

impl HttpNetwork {
    pub fn new(origin: Url, upstream: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            origin,
            upstream: upstream.trim_end_matches('/').to_string(),
        })
    }

    /// Where `request` is actually sent, and whether it is same-origin.
    fn target(&self, request: &Request) -> Result<(Url, bool), Error> {
        if !request.is_same_origin(&self.origin) {
            return Ok((request.url().clone(), false));
        }
        let url = request.url();
        let path_and_query = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let rebased = format!("{}{}", self.upstream, path_and_query);
        let rebased =
            Url::parse(&rebased).map_err(|e| Error::InvalidUrl(format!("{rebased}: {e}")))?;
        Ok((rebased, true))
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> waystation_cache::Result<Response> {
        let (target, local) = self.target(request)?;

        let mut builder = self.client.request(request.method().clone(), target.clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let upstream = builder.send().await.map_err(|e| {
            tracing::debug!(url = %target, error = %e, "network request failed");
            Error::Network(e.to_string())
        })?;

        let status = upstream.status().as_u16();
        let headers: Vec<(String, String)> = upstream
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("reading body from {target}: {e}")))?;

        let kind = if local {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        };
        let mut response = Response::new(status, body).with_kind(kind);
        for (name, value) in &headers {
            response = response.with_header(name, value);
        }
        Ok(response)
    }
}
