//! Yandex geocoder client
//!
//! Requests are paced with a token bucket and carry an explicit timeout.
//! A timeout or non-2xx answer is an error for the caller to record on the
//! alias; it is never retried here.

use super::GeoPoint;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::GeocoderConfig;

pub const PROVIDER_YANDEX: &str = "yandex";

/// Geocoder client errors
#[derive(Debug, Error)]
pub enum GeocoderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error {0}: {1}")]
    Http(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Geocoder not configured: {0}")]
    NotConfigured(String),
}

/// One geocoder answer
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    pub point: GeoPoint,
    /// Provider precision (`exact`, `number`, `near`, `range`, `street`, `other`)
    pub precision: String,
    /// Provider object kind (`locality`, `province`, ...)
    pub kind: Option<String>,
    /// Stable provider identifier, when the provider has one
    pub uri: Option<String>,
    pub label: Option<String>,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    fn provider(&self) -> &str;

    /// `Ok(None)` when the provider found nothing
    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocoderError>;
}

/// Precision → confidence mapping for stored geo keys
pub fn precision_confidence(precision: &str) -> f64 {
    match precision {
        "exact" => 0.95,
        "number" => 0.85,
        "near" => 0.75,
        "range" => 0.70,
        "street" => 0.60,
        "other" => 0.40,
        _ => 0.50,
    }
}

/// Bias free text towards Russia
pub fn russia_query(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.to_lowercase().starts_with("россия") {
        trimmed.to_string()
    } else {
        format!("Россия, {}", trimmed)
    }
}

pub struct YandexGeocoder {
    client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl YandexGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocoderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GeocoderError::NotConfigured("YANDEX_GEOCODER_API_KEY is not set".into()))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(3)))
            .build()
            .map_err(|e| GeocoderError::Network(format!("HTTP client build failed: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl Geocoder for YandexGeocoder {
    fn provider(&self) -> &str {
        PROVIDER_YANDEX
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocoderError> {
        self.rate_limiter.until_ready().await;

        debug!(query, "Querying Yandex geocoder");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("geocode", query),
                ("format", "json"),
                ("lang", "ru_RU"),
                ("results", "1"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeocoderError::Timeout
                } else {
                    GeocoderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocoderError::Http(status.as_u16(), truncate(&body, 200)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GeocoderError::Parse(e.to_string()))?;

        parse_response(&body)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Extract the first feature of a Yandex geocoder JSON answer
pub fn parse_response(body: &Value) -> Result<Option<GeocodeHit>, GeocoderError> {
    let members = body
        .pointer("/response/GeoObjectCollection/featureMember")
        .and_then(Value::as_array)
        .ok_or_else(|| GeocoderError::Parse("featureMember missing".into()))?;

    let Some(object) = members.first().and_then(|m| m.get("GeoObject")) else {
        return Ok(None);
    };

    let pos = object
        .pointer("/Point/pos")
        .and_then(Value::as_str)
        .ok_or_else(|| GeocoderError::Parse("Point.pos missing".into()))?;

    // Yandex orders coordinates "lon lat"
    let mut parts = pos.split_whitespace().map(str::parse::<f64>);
    let (lon, lat) = match (parts.next(), parts.next()) {
        (Some(Ok(lon)), Some(Ok(lat))) => (lon, lat),
        _ => return Err(GeocoderError::Parse(format!("bad Point.pos {:?}", pos))),
    };

    let point = GeoPoint::new(lat, lon);
    if !point.is_valid() {
        return Err(GeocoderError::Parse(format!("coordinates out of range: {:?}", pos)));
    }

    let meta = object.pointer("/metaDataProperty/GeocoderMetaData");
    let text_at = |path: &str| {
        meta.and_then(|m| m.pointer(path))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(Some(GeocodeHit {
        point,
        precision: text_at("/precision").unwrap_or_else(|| "unknown".to_string()),
        kind: text_at("/kind"),
        uri: object
            .get("uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| text_at("/uri")),
        label: text_at("/text"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(pos: &str) -> Value {
        json!({
            "response": {
                "GeoObjectCollection": {
                    "featureMember": [{
                        "GeoObject": {
                            "uri": "ymapsbm1://geo?data=tver",
                            "metaDataProperty": {
                                "GeocoderMetaData": {
                                    "precision": "other",
                                    "kind": "locality",
                                    "text": "Россия, Тверь"
                                }
                            },
                            "Point": {"pos": pos}
                        }
                    }]
                }
            }
        })
    }

    #[test]
    fn test_parse_first_feature() {
        let hit = parse_response(&sample("35.911896 56.859611")).unwrap().unwrap();
        assert!((hit.point.lat - 56.859611).abs() < 1e-9);
        assert!((hit.point.lon - 35.911896).abs() < 1e-9);
        assert_eq!(hit.precision, "other");
        assert_eq!(hit.kind.as_deref(), Some("locality"));
        assert_eq!(hit.uri.as_deref(), Some("ymapsbm1://geo?data=tver"));
    }

    #[test]
    fn test_empty_collection_is_none() {
        let body = json!({"response": {"GeoObjectCollection": {"featureMember": []}}});
        assert_eq!(parse_response(&body).unwrap(), None);
    }

    #[test]
    fn test_malformed_answers() {
        assert!(parse_response(&json!({"error": "x"})).is_err());
        assert!(parse_response(&sample("abc")).is_err());
        assert!(parse_response(&sample("0 0")).is_err());
    }

    #[test]
    fn test_precision_confidence() {
        assert_eq!(precision_confidence("exact"), 0.95);
        assert_eq!(precision_confidence("range"), 0.70);
        assert_eq!(precision_confidence("other"), 0.40);
        assert_eq!(precision_confidence("mystery"), 0.50);
    }

    #[test]
    fn test_russia_query() {
        assert_eq!(russia_query(" Тверь "), "Россия, Тверь");
        assert_eq!(russia_query("Россия, Тверь"), "Россия, Тверь");
    }

    #[test]
    fn test_requires_api_key() {
        let cfg = GeocoderConfig::default();
        assert!(matches!(
            YandexGeocoder::new(&cfg),
            Err(GeocoderError::NotConfigured(_))
        ));
    }
}
