use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProbeErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    RequestBuild,
    Connect,
    Timeout,
    BodyRead,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// URLs are supported: {0}")]
    UnsupportedScheme(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("http request failed: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl ProbeError {
    #[must_use]
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            Self::InvalidUrl(_) => ProbeErrorKind::InvalidUrl,
            Self::UnsupportedScheme(_) => ProbeErrorKind::UnsupportedScheme,
            Self::RequestBuild(_) | Self::HeaderName(_) | Self::HeaderValue(_) => {
                ProbeErrorKind::RequestBuild
            }
            Self::Connect(_) => ProbeErrorKind::Connect,
            Self::Timeout(_) => ProbeErrorKind::Timeout,
            Self::BodyRead(_) => ProbeErrorKind::BodyRead,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl ProbeRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: http::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: http::Method::POST,
            url: url.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one HTTP call. Transport failures use `status == 0` and carry the error kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub status: u16,
    pub duration: Duration,
    pub body: Bytes,
    pub error: Option<ProbeErrorKind>,
}

impl ProbeResult {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn body_contains(&self, needle: &str) -> bool {
        self.body_utf8().is_some_and(|b| b.contains(needle))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Transport failure or a status outside `200..=399`.
    pub fn is_failed(&self) -> bool {
        !(200..=399).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpConnector, Full<Bytes>>,
    default_timeout: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpClient {
    pub fn new(default_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let inner = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            inner,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Issues `req` and always returns a result; failures become the status-0 sentinel.
    pub async fn probe(&self, req: ProbeRequest) -> ProbeResult {
        let started = Instant::now();
        match self.request(req).await {
            Ok((status, body)) => ProbeResult {
                status,
                duration: started.elapsed(),
                body,
                error: None,
            },
            Err(err) => {
                tracing::trace!(error = %err, "probe failed");
                ProbeResult {
                    status: 0,
                    duration: started.elapsed(),
                    body: Bytes::new(),
                    error: Some(err.kind()),
                }
            }
        }
    }

    pub async fn request(&self, req: ProbeRequest) -> Result<(u16, Bytes), ProbeError> {
        let timeout = req.timeout.unwrap_or(self.default_timeout);

        let parsed = url::Url::parse(&req.url).map_err(|_| ProbeError::InvalidUrl(req.url.clone()))?;
        if parsed.scheme() != "http" {
            return Err(ProbeError::UnsupportedScheme(req.url));
        }

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| ProbeError::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);
        for (k, v) in &req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(v)?;
            builder = builder.header(name, value);
        }
        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;

        // The timeout covers the whole exchange, body included.
        let exchange = async {
            let res: hyper::Response<Incoming> = self.inner.request(request).await?;
            let (parts, body) = res.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, ProbeError>((parts.status.as_u16(), body))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(res) => res,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        }
    }
}

/// Resolves the host of `base_url`, failing when the name does not resolve.
pub async fn resolve_base_url(base_url: &str) -> Result<(), ProbeError> {
    let parsed =
        url::Url::parse(base_url).map_err(|_| ProbeError::InvalidUrl(base_url.to_string()))?;
    if parsed.scheme() != "http" {
        return Err(ProbeError::UnsupportedScheme(base_url.to_string()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ProbeError::InvalidUrl(base_url.to_string()))?;
    let port = parsed.port_or_known_default().unwrap_or(80);

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| ProbeError::InvalidUrl(base_url.to_string()))?;
    if addrs.next().is_none() {
        return Err(ProbeError::InvalidUrl(base_url.to_string()));
    }
    Ok(())
}
