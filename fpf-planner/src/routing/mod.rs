//! Routing enrichment for trip segments

pub mod enrich;
pub mod geometry;
pub mod osrm_client;
pub mod tier;

pub use enrich::{EnrichOptions, EnrichSummary, RouteSource, RoutingEnricher, TripFilter};
pub use geometry::{drive_seconds, haversine_km};
pub use osrm_client::{OsrmClient, RouteBackend, RouteError, RouteLeg};
pub use tier::{EndpointSource, TIER_SAME_PLACE, TIER_UNRESOLVABLE};
