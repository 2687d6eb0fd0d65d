//! Visual Crossing timeline API client.

use async_trait::async_trait;
use reqwest::Client;
use skycache_core::{ReqwestErrorExt, UpstreamConfig};
use std::time::Duration;
use tracing::instrument;

use crate::error::FetchError;
use crate::types::{LocationQuery, WeatherPayload};

const UNIT_GROUP: &str = "metric";
const INCLUDE: &str = "days";

/// Authoritative source consulted on a cache miss.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, location: &LocationQuery) -> Result<WeatherPayload, FetchError>;
}

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl WeatherProvider {
    pub fn new(config: &UpstreamConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Network(e.into_network_error()))?;

        Ok(Self::with_client(client, &config.api_url, &config.api_key))
    }

    pub fn with_client(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// `{base}/{location}?key=...&unitGroup=metric&include=days`
    pub fn request_url(&self, location: &LocationQuery) -> String {
        format!(
            "{}/{}?key={}&unitGroup={}&include={}",
            self.base_url,
            location.as_str(),
            self.api_key,
            UNIT_GROUP,
            INCLUDE
        )
    }
}

#[async_trait]
impl WeatherSource for WeatherProvider {
    #[instrument(skip_all, fields(location = %location), level = "debug")]
    async fn fetch(&self, location: &LocationQuery) -> Result<WeatherPayload, FetchError> {
        tracing::info!("Fetching weather data from provider for location: {}", location);

        let response = self
            .client
            .get(self.request_url(location))
            .send()
            .await
            .map_err(|e| FetchError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Weather provider returned an error");
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.into_network_error()))?;

        WeatherPayload::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}
