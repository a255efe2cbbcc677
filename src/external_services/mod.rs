use crate::simulation::geometry::Point;
use thiserror::Error;

pub mod gazetteer;
#[cfg(feature = "http")]
pub mod mapbox;

/// Errors raised by a route provider itself, i.e. transport or decoding
/// failures. "Address unknown" and "no route found" are not errors, they are
/// expressed as `Ok(None)` and `Ok(vec![])` respectively.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to route provider failed: {0}")]
    Transport(String),
    #[error("route provider returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// Geocoding, routing and distance oracle consumed by the fleet.
///
/// Calls are treated as blocking. A hung call stalls the calling vehicle
/// task until the provider returns; no timeout is imposed here.
pub trait RouteProvider: Send + Sync {
    /// Resolves an address to a coordinate. `Ok(None)` means the address is
    /// unknown to the provider.
    fn forward_geocode(&self, address: &str) -> Result<Option<Point>, ProviderError>;

    /// Resolves a coordinate back to an address, if the provider knows one.
    fn reverse_geocode(&self, coordinate: Point) -> Result<Option<String>, ProviderError>;

    /// Returns the waypoints leading from `from` to `to`, one per simulation
    /// tick. An empty route means the destination is unroutable.
    fn route(&self, from: Point, to: Point) -> Result<Vec<Point>, ProviderError>;

    /// Straight-line distance between two coordinates, used by the dispatcher
    /// to rank vehicles. Units are implementation-defined but consistent.
    fn distance(&self, a: Point, b: Point) -> f64 {
        a.distance_to(b)
    }
}
