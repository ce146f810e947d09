//! GeoKey resolution
//!
//! Free-text place names are normalized into aliases, aliases are resolved
//! to canonical geo keys through an external geocoder under a daily quota,
//! and resolved points are cached for the routing engine.

pub mod aliases;
pub mod centroids;
pub mod normalize;
pub mod quota;
pub mod resolver;
pub mod seed;
pub mod yandex_client;

pub use aliases::{lookup_cached, upsert_alias, AliasStatus};
pub use normalize::{classify_kind, is_junk, normalize, AliasKind};
pub use resolver::{GeoResolver, ResolveSummary};
pub use yandex_client::{GeocodeHit, Geocoder, GeocoderError, YandexGeocoder};

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite, in range, and not the (0, 0) null island placeholder
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat.abs() <= 90.0
            && self.lon.abs() <= 180.0
            && !(self.lat == 0.0 && self.lon == 0.0)
    }

    /// Build from nullable columns; `None` when either side is missing or invalid
    pub fn from_columns(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Self::new(lat, lon)).filter(GeoPoint::is_valid),
            _ => None,
        }
    }
}
