//! FHIR REST data service over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use fhir_plan::SearchParams;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Url};
use serde_json::Value;

use crate::error::ServiceError;
use crate::traits::DataService;

/// Media type requested from the server.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Longest response body kept in a [`ServiceError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// [`DataService`] backed by a FHIR REST endpoint.
///
/// Searches are sent as `GET {base}/{resourceType}?{params}`; next-page links
/// are followed as given, relative ones resolved against the base URL.
#[derive(Debug, Clone)]
pub struct HttpDataService {
    client: Client,
    base: Url,
}

impl HttpDataService {
    /// Creates a service for the given base URL with a default client.
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FHIR_JSON));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Self::with_client(client, base_url)
    }

    /// Creates a service that sends requests through `client`.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ServiceError> {
        let mut base =
            Url::parse(base_url).map_err(|e| ServiceError::Transport(format!("{}: {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    /// Returns the normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// URL of a search request.
    pub fn search_url(&self, resource_type: &str, params: &SearchParams) -> Result<Url, ServiceError> {
        let mut url = self
            .base
            .join(resource_type)
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    /// URL of a next-page link.
    pub fn page_url(&self, link: &str) -> Result<Url, ServiceError> {
        self.base
            .join(link)
            .map_err(|e| ServiceError::Transport(format!("{}: {}", link, e)))
    }

    async fn get(&self, url: Url) -> Result<Value, ServiceError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DataService for HttpDataService {
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<Value, ServiceError> {
        let url = self.search_url(resource_type, params)?;
        self.get(url).await
    }

    async fn next_page(&self, url: &str) -> Result<Value, ServiceError> {
        let url = self.page_url(url)?;
        self.get(url).await
    }
}
