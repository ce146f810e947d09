//! Resolvability tiers
//!
//! | tier | endpoints |
//! |------|-----------|
//! | 0 | direct + direct |
//! | 1 | direct + alias |
//! | 2 | alias + alias |
//! | 3 | direct or alias + centroid |
//! | 4 | centroid + centroid |
//! | 5 | same place text, coordinates unknown |
//! | 9 | an endpoint cannot be located |
//!
//! Tier 5 needs no coordinates at all: the same-place heuristic supplies the
//! distance. It ranks after every coordinate-backed tier.

use crate::geo::GeoPoint;
use serde::Serialize;

pub const TIER_SAME_PLACE: u8 = 5;
pub const TIER_UNRESOLVABLE: u8 = 9;

/// How an endpoint got its coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointSource {
    Direct,
    Alias,
    Centroid,
    Missing,
}

impl EndpointSource {
    fn rank(self) -> u8 {
        match self {
            EndpointSource::Direct => 0,
            EndpointSource::Alias => 1,
            EndpointSource::Centroid => 2,
            EndpointSource::Missing => 3,
        }
    }
}

/// One located (or not) end of a segment
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub source: EndpointSource,
    pub point: Option<GeoPoint>,
    /// Normalized place text, empty when the segment carries none
    pub key: String,
    /// Direct columns were present but held unusable coordinates
    pub bad_direct: bool,
}

impl Endpoint {
    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            source: EndpointSource::Missing,
            point: None,
            key: key.into(),
            bad_direct: false,
        }
    }

    pub fn located(source: EndpointSource, point: GeoPoint, key: impl Into<String>) -> Self {
        Self {
            source,
            point: Some(point),
            key: key.into(),
            bad_direct: false,
        }
    }
}

/// Both ends name the same place
pub fn same_key(src: &Endpoint, dst: &Endpoint) -> bool {
    !src.key.is_empty() && src.key == dst.key
}

/// Tier for a pair of endpoint sources (order-insensitive)
pub fn tier_for(a: EndpointSource, b: EndpointSource) -> u8 {
    use EndpointSource::*;

    let (lo, hi) = if a.rank() <= b.rank() { (a, b) } else { (b, a) };
    match (lo, hi) {
        (_, Missing) => TIER_UNRESOLVABLE,
        (Direct, Direct) => 0,
        (Direct, Alias) => 1,
        (Alias, Alias) => 2,
        (Direct | Alias, Centroid) => 3,
        (Centroid, Centroid) => 4,
        _ => TIER_UNRESOLVABLE,
    }
}

pub fn segment_tier(src: &Endpoint, dst: &Endpoint) -> u8 {
    let tier = tier_for(src.source, dst.source);
    if tier == TIER_UNRESOLVABLE && same_key(src, dst) {
        TIER_SAME_PLACE
    } else {
        tier
    }
}
