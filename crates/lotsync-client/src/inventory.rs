use std::time::Duration;

use async_trait::async_trait;
use lotsync_core::config::HttpConfig;
use lotsync_core::error::{AppError, ErrorKind, FetchError};
use lotsync_core::models::SourcePage;
use lotsync_core::traits::InventorySource;
use reqwest::{Client, StatusCode, Url};

use crate::rate_limit::RateLimiter;

/// HTTP client for the upstream inventory API.
///
/// The API serves `GET {base}/items?page=&limit=` and answers
/// `{ "data": [...], "meta": { "total": n, "last_page": n } }`, where `meta`
/// is optional.
///
/// The client makes exactly one attempt per call. Retrying is the caller's
/// job; every failure comes back as a categorized [`FetchError`].
///
/// # Examples
///
/// ```no_run
/// use lotsync_client::InventoryClient;
/// use lotsync_core::config::HttpConfig;
/// use lotsync_core::traits::InventorySource;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = InventoryClient::new("https://inventory.example.com/api/", None, &HttpConfig::default())?;
/// let page = client.fetch_page(1, 25).await?;
/// println!("Fetched {} items", page.data.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InventoryClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
    probe_timeout: Duration,
    limiter: std::sync::Arc<RateLimiter>,
}

impl InventoryClient {
    /// Creates a client for the API rooted at `base_url_str`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url_str: &str,
        api_key: Option<String>,
        http: &HttpConfig,
    ) -> Result<Self, AppError> {
        let mut base_url = Url::parse(base_url_str).map_err(|_| {
            AppError::ConfigError(format!("Invalid inventory API URL: {}", base_url_str))
        })?;
        // Relative joins replace the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(http.user_agent.clone())
            .timeout(http.timeout())
            .build()
            .map_err(|e| AppError::ConfigError(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout: http.timeout(),
            probe_timeout: http.probe_timeout(),
            limiter: std::sync::Arc::new(RateLimiter::new(http.requests_per_second)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn items_url(&self, page: u32, limit: u32) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join("items")
            .map_err(|e| FetchError::config(format!("Cannot build items URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    /// Sends a GET and reads the body, all under one hard deadline.
    async fn get(&self, url: Url, deadline: Duration) -> Result<(StatusCode, String), FetchError> {
        self.limiter.acquire().await;

        let mut request = self.client.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let call = async {
            let response = request.send().await.map_err(map_transport_error)?;
            let status = response.status();
            let body = response.text().await.map_err(map_transport_error)?;
            Ok::<_, FetchError>((status, body))
        };

        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::timeout(format!(
                "no response from {} within {}s",
                url,
                deadline.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl InventorySource for InventoryClient {
    async fn probe(&self) -> Result<(), FetchError> {
        let url = self.items_url(1, 1)?;
        match self.get(url.clone(), self.probe_timeout).await {
            Ok((status, _)) if status.is_success() => {
                tracing::debug!(%url, "Connectivity probe succeeded");
                Ok(())
            }
            Ok((StatusCode::NOT_FOUND, _)) => Err(FetchError::deployment(format!(
                "HTTP 404 from {}; the endpoint does not exist",
                url
            ))),
            Ok((status, body)) => Err(status_error(status, &body)),
            Err(e) if e.kind == ErrorKind::Timeout => Err(FetchError::deployment(format!(
                "connectivity probe timed out: {}",
                e.message
            ))),
            Err(e) => Err(e),
        }
    }

    async fn fetch_page(&self, page: u32, limit: u32) -> Result<SourcePage, FetchError> {
        let url = self.items_url(page, limit)?;
        let (status, body) = self.get(url, self.timeout).await?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_str::<SourcePage>(&body).map_err(|e| {
            FetchError::server(
                status.as_u16(),
                format!("malformed response body for page {}: {}", page, e),
            )
        })
    }
}

/// Maps a non-success HTTP status to a categorized error.
pub fn status_error(status: StatusCode, body: &str) -> FetchError {
    let detail = summarize_body(body);
    let message = if detail.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), detail)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::auth(message),
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            FetchError::config(message)
        }
        StatusCode::TOO_MANY_REQUESTS => FetchError::server(status.as_u16(), message),
        s if s.is_server_error() => FetchError::server(s.as_u16(), message),
        _ => FetchError::new(ErrorKind::Other, message),
    }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(e.to_string())
    } else if e.is_connect() {
        FetchError::network(format!("Connection failed: {}", e))
    } else if e.is_builder() {
        FetchError::config(e.to_string())
    } else {
        FetchError::new(ErrorKind::Other, e.to_string())
    }
}

fn summarize_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
