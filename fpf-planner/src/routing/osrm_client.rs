//! OSRM routing backend client
//!
//! One request per segment with an explicit timeout and no retries. Every
//! failure is returned to the enricher, which falls back to great-circle
//! distance.

use crate::config::RoutingConfig;
use crate::geo::GeoPoint;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Routing backend errors
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("No route: {0}")]
    NoRoute(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// One routed leg
#[derive(Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub distance_km: f64,
    pub duration_sec: f64,
    /// Encoded polyline, when the backend returned geometry
    pub polyline: Option<String>,
}

#[async_trait]
pub trait RouteBackend: Send + Sync {
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, RouteError>;
}

pub struct OsrmClient {
    client: Client,
    base_url: String,
    profile: String,
}

impl OsrmClient {
    pub fn new(config: &RoutingConfig) -> Result<Self, RouteError> {
        let client = Client::builder()
            .timeout(config.osrm_timeout)
            .build()
            .map_err(|e| RouteError::Network(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.osrm_url.trim_end_matches('/').to_string(),
            profile: config.osrm_profile.clone(),
        })
    }

    pub fn route_url(&self, from: GeoPoint, to: GeoPoint) -> String {
        route_url(&self.base_url, &self.profile, from, to)
    }
}

/// `/route/v1/{profile}/{lon},{lat};{lon},{lat}` (OSRM wants lon first)
pub fn route_url(base_url: &str, profile: &str, from: GeoPoint, to: GeoPoint) -> String {
    format!(
        "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=polyline",
        base_url.trim_end_matches('/'),
        profile,
        from.lon,
        from.lat,
        to.lon,
        to.lat
    )
}

#[async_trait]
impl RouteBackend for OsrmClient {
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, RouteError> {
        let url = self.route_url(from, to);
        debug!(url = %url, "Requesting OSRM route");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                RouteError::Timeout
            } else {
                RouteError::Network(e.to_string())
            }
        })?;

        // OSRM answers NoRoute with a 400 and a JSON body, so parse before judging status
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| RouteError::Parse(format!("HTTP {}: {}", status.as_u16(), e)))?;

        parse_route(&body)
    }
}

/// First route of an OSRM `/route` answer
pub fn parse_route(body: &Value) -> Result<RouteLeg, RouteError> {
    let code = body.get("code").and_then(Value::as_str).unwrap_or("");
    if code != "Ok" {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(code);
        return Err(RouteError::NoRoute(message.to_string()));
    }

    let route = body
        .pointer("/routes/0")
        .ok_or_else(|| RouteError::NoRoute("empty routes".into()))?;

    let distance_m = route
        .get("distance")
        .and_then(Value::as_f64)
        .ok_or_else(|| RouteError::Parse("route.distance missing".into()))?;
    let duration = route
        .get("duration")
        .and_then(Value::as_f64)
        .ok_or_else(|| RouteError::Parse("route.duration missing".into()))?;

    if !distance_m.is_finite() || distance_m < 0.0 || !duration.is_finite() || duration < 0.0 {
        return Err(RouteError::Parse(format!(
            "implausible route: {} m, {} s",
            distance_m, duration
        )));
    }

    Ok(RouteLeg {
        distance_km: distance_m / 1000.0,
        duration_sec: duration,
        polyline: route
            .get("geometry")
            .and_then(Value::as_str)
            .filter(|g| !g.is_empty())
            .map(str::to_string),
    })
}
