use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::WeatherError;

/// Prefix shared by every cache key.
pub const CACHE_KEY_PREFIX: &str = "weather:";

/// Place to query, in whatever syntax the provider accepts
/// ("London", "London,UK", "51.5,-0.12", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationQuery(String);

impl LocationQuery {
    /// Accepts any non-empty string. No trimming or case folding.
    pub fn parse(raw: impl Into<String>) -> Result<Self, WeatherError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(WeatherError::InvalidLocation);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_location(self)
    }
}

impl fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key derived byte-for-byte from a location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_location(location: &LocationQuery) -> Self {
        Self(format!("{}{}", CACHE_KEY_PREFIX, location.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider response document, passed through without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeatherPayload(serde_json::Map<String, serde_json::Value>);

impl WeatherPayload {
    pub fn new(document: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(document)
    }

    /// Decode a JSON object. Anything else (arrays, scalars, garbage) is an error.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Cache wire format: the JSON document as received.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        serde_json::Value::Object(self.0)
    }
}
