use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

/// One network round trip to an address. Returning `Ok` means a response was
/// observed, whatever its status; `Err` is an I/O-level failure. Dropping the
/// future must abort the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, address: &str) -> Result<(), TransportError>;
}

pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("exlat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, address: &str) -> Result<(), TransportError> {
        // 403/404 and friends still prove the region answered.
        let resp = self.http.get(address).send().await?;
        tracing::trace!(address, status = %resp.status(), "probe response");
        Ok(())
    }
}
