pub mod models;

use crate::ApiConfig;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::{Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use std::fmt;
use std::time::Duration;
use task_local_extensions::Extensions;

const RAPIDAPI_KEY: &str = "x-rapidapi-key";
const RAPIDAPI_HOST: &str = "x-rapidapi-host";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Error while making a http request.
    #[error("failure requesting remote resource: {0}")]
    Request(#[from] reqwest::Error),

    /// Error while executing some middleware code.
    #[error("request middleware failed with: {0}")]
    RequestMiddleware(#[from] reqwest_middleware::Error),

    /// Error while building http headers.
    #[error("encountered invalid HTTP header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    /// Error when no API key is configured.
    #[error("missing required setting `events.api.api_key` (env `CEH_EVENTS__API__API_KEY`)")]
    MissingApiKey,

    /// Error while parsing a JSON response.
    #[error("failed to parse response as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Attaches the RapidAPI credentials to every request.
struct RapidApiAuth {
    key: HeaderValue,
    host: HeaderValue,
}

impl RapidApiAuth {
    fn new(key: &str, host: &str) -> Result<RapidApiAuth, ClientError> {
        let mut key = HeaderValue::from_str(key)?;
        key.set_sensitive(true);

        Ok(RapidApiAuth {
            key,
            host: HeaderValue::from_str(host)?,
        })
    }
}

#[async_trait::async_trait]
impl Middleware for RapidApiAuth {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let headers = req.headers_mut();
        headers.insert(RAPIDAPI_KEY, self.key.clone());
        headers.insert(RAPIDAPI_HOST, self.host.clone());
        next.run(req, extensions).await
    }
}

/// Client for the RapidAPI crypto events calendar.
pub struct RapidApiClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl fmt::Debug for RapidApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RapidApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RapidApiClient {
    /// Creates a new client from the events API configuration. Fails if no API key is
    /// configured.
    pub fn new(config: &ApiConfig) -> Result<RapidApiClient, ClientError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ClientError::MissingApiKey)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_str("gzip")?);

        let client = ClientBuilder::new(
            reqwest::Client::builder()
                .default_headers(headers)
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        )
        .with(RapidApiAuth::new(api_key, &config.api_host)?)
        .build();

        Ok(RapidApiClient {
            client,
            base_url: config.base_url(),
        })
    }

    /// Fetches one page of exchange entries. The decoded JSON body is returned as is, its shape
    /// is checked by the caller.
    pub async fn get_events(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<serde_json::Value, ClientError> {
        let body = self
            .client
            .get(format!("{}/index", self.base_url))
            .query(&build_query_parameters(page, page_size))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        log::debug!("fetched {} bytes from the events API", body.len());

        Ok(serde_json::from_slice(&body)?)
    }
}

fn build_query_parameters(page: u32, page_size: u32) -> IndexMap<&'static str, String> {
    IndexMap::from([
        ("page", page.to_string()),
        ("pageSize", page_size.to_string()),
    ])
}
