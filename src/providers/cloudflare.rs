//! Cloudflare API v4 client.

use super::{DesiredRecord, DnsApi, RecordType, RemoteRecord};
use crate::config::Credentials;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Records requested per page when listing.
pub const PER_PAGE: u32 = 100;

/// Upper bound on pages fetched by a single listing.
pub const MAX_PAGES: u32 = 50;

/// Authenticated Cloudflare client.
///
/// No retries or backoff: every failure is returned to the caller as is.
pub struct CloudflareClient {
    client: reqwest::Client,
    credentials: Credentials,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CloudflareError>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct CloudflareError {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default = "first_page")]
    total_pages: u32,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct Zone {
    name: String,
}

impl<T> CloudflareResponse<T> {
    fn error_message(&self) -> Option<String> {
        self.errors
            .first()
            .map(|e| format!("{} (code {})", e.message, e.code))
    }
}

impl std::fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("credentials", &self.credentials)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareClient {
    /// Create a client for the public Cloudflare API.
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_base_url(credentials, DEFAULT_BASE_URL.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(credentials: Credentials, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Issue a request and return the envelope's `result`.
    ///
    /// `endpoint` is relative to `/client/v4/`, query string included.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&DesiredRecord>,
    ) -> Result<T> {
        self.request_with_headers(method, endpoint, HeaderMap::new(), body)
            .await
    }

    /// Like [`request`](Self::request) with extra headers merged under the auth headers.
    pub async fn request_with_headers<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        headers: HeaderMap,
        body: Option<&DesiredRecord>,
    ) -> Result<T> {
        self.send::<T>(method, endpoint, headers, body)
            .await?
            .result
            .ok_or_else(|| DdnsError::Api {
                endpoint: endpoint.to_string(),
                message: "response carried no result".to_string(),
            })
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        match &self.credentials {
            Credentials::Token(token) => {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
            }
            Credentials::Key { email, key } => {
                headers.insert(HeaderName::from_static("x-auth-email"), header_value(email)?);
                headers.insert(HeaderName::from_static("x-auth-key"), header_value(key)?);
            }
        }
        Ok(headers)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        mut headers: HeaderMap,
        body: Option<&DesiredRecord>,
    ) -> Result<CloudflareResponse<T>> {
        headers.extend(self.auth_headers()?);

        let url = format!("{}/client/v4/{}", self.base_url, endpoint);
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        match serde_json::from_str::<CloudflareResponse<T>>(&text) {
            Ok(envelope) if status.is_success() && envelope.success => Ok(envelope),
            Ok(envelope) => Err(DdnsError::Api {
                endpoint: endpoint.to_string(),
                message: envelope
                    .error_message()
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            }),
            Err(e) if status.is_success() => Err(e.into()),
            Err(_) => Err(DdnsError::Api {
                endpoint: endpoint.to_string(),
                message: format!("HTTP {}", status),
            }),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| DdnsError::Config("credential contains invalid header characters".to_string()))
}

#[async_trait]
impl DnsApi for CloudflareClient {
    async fn zone_name(&self, zone_id: &str) -> Result<String> {
        let zone: Zone = self
            .request(Method::GET, &format!("zones/{}", zone_id), None)
            .await?;
        Ok(zone.name)
    }

    async fn list_records(
        &self,
        zone_id: &str,
        record_type: RecordType,
    ) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let endpoint = format!(
                "zones/{}/dns_records?per_page={}&type={}&page={}",
                zone_id, PER_PAGE, record_type, page
            );
            let envelope = self
                .send::<Vec<RemoteRecord>>(Method::GET, &endpoint, HeaderMap::new(), None)
                .await?;
            records.extend(envelope.result.unwrap_or_default());

            let total_pages = envelope.result_info.map_or(1, |info| info.total_pages);
            if page >= total_pages {
                break;
            }
            if page >= MAX_PAGES {
                tracing::warn!(
                    "Zone {} has more than {} pages of {} records; ignoring the rest",
                    zone_id,
                    MAX_PAGES,
                    record_type
                );
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    async fn create_record(&self, zone_id: &str, record: &DesiredRecord) -> Result<()> {
        self.send::<serde_json::Value>(
            Method::POST,
            &format!("zones/{}/dns_records", zone_id),
            HeaderMap::new(),
            Some(record),
        )
        .await?;
        Ok(())
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DesiredRecord,
    ) -> Result<()> {
        self.send::<serde_json::Value>(
            Method::PUT,
            &format!("zones/{}/dns_records/{}", zone_id, record_id),
            HeaderMap::new(),
            Some(record),
        )
        .await?;
        Ok(())
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        self.send::<serde_json::Value>(
            Method::DELETE,
            &format!("zones/{}/dns_records/{}", zone_id, record_id),
            HeaderMap::new(),
            None,
        )
        .await?;
        Ok(())
    }
}
