use crate::external_services::{ProviderError, RouteProvider};
use crate::simulation::geometry::Point;
use serde_json::Value;
use tracing::debug;

const GEOCODING_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places/";
const DIRECTIONS_URL: &str = "https://api.mapbox.com/directions/v5/mapbox/driving/";

/// Bounding box around the greater Austin area so vehicles don't roam too far.
/// Format: min_lon,min_lat,max_lon,max_lat.
pub const DEFAULT_BBOX: &str =
    "-98.10986697734825,30.0224906564967,-97.3622527256841,30.73727958749211";

/// Route provider backed by the Mapbox geocoding and directions APIs.
/// Coordinates are (longitude, latitude) pairs as returned by Mapbox.
pub struct MapboxProvider {
    client: reqwest::blocking::Client,
    token: String,
    bbox: String,
}

impl MapboxProvider {
    pub fn new(token: impl Into<String>, bbox: Option<String>) -> Self {
        MapboxProvider {
            client: reqwest::blocking::Client::new(),
            token: token.into(),
            bbox: bbox.unwrap_or_else(|| DEFAULT_BBOX.to_string()),
        }
    }

    /// Reads the access token from the given environment variable.
    pub fn from_env(token_var: &str, bbox: Option<String>) -> Result<Self, ProviderError> {
        let token = std::env::var(token_var).map_err(|_| {
            ProviderError::Transport(format!(
                "environment variable {token_var} with the Mapbox access token is not set"
            ))
        })?;
        Ok(Self::new(token, bbox))
    }

    fn get(&self, url: &str) -> Result<Value, ProviderError> {
        debug!(%url, "requesting");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Transport(format!(
                "response code {} for request {url}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }

    fn forward_geocoding_url(&self, address: &str) -> String {
        format!(
            "{GEOCODING_URL}{}.json?bbox={}&access_token={}",
            prepare_address(address),
            self.bbox,
            self.token
        )
    }

    fn reverse_geocoding_url(&self, coordinate: Point) -> String {
        format!(
            "{GEOCODING_URL}{},{}.json?access_token={}",
            coordinate.x, coordinate.y, self.token
        )
    }

    fn directions_url(&self, from: Point, to: Point) -> String {
        format!(
            "{DIRECTIONS_URL}{},{};{},{}?geometries=geojson&steps=true&access_token={}",
            from.x, from.y, to.x, to.y, self.token
        )
    }
}

impl RouteProvider for MapboxProvider {
    fn forward_geocode(&self, address: &str) -> Result<Option<Point>, ProviderError> {
        let json = self.get(&self.forward_geocoding_url(address))?;
        let Some(center) = json["features"].get(0).map(|feature| &feature["center"]) else {
            return Ok(None);
        };
        parse_position(center).map(Some)
    }

    fn reverse_geocode(&self, coordinate: Point) -> Result<Option<String>, ProviderError> {
        let json = self.get(&self.reverse_geocoding_url(coordinate))?;
        Ok(json["features"]
            .get(0)
            .and_then(|feature| feature["place_name"].as_str())
            .map(str::to_string))
    }

    fn route(&self, from: Point, to: Point) -> Result<Vec<Point>, ProviderError> {
        let json = self.get(&self.directions_url(from, to))?;
        let Some(steps) = json["routes"][0]["legs"][0]["steps"].as_array() else {
            // No route between the two coordinates; the vehicle skips the destination.
            return Ok(Vec::new());
        };
        let mut route = Vec::new();
        for step in steps {
            let Some(coordinates) = step["geometry"]["coordinates"].as_array() else {
                continue;
            };
            for coordinate in coordinates {
                route.push(parse_position(coordinate)?);
            }
        }
        Ok(route)
    }
}

fn parse_position(value: &Value) -> Result<Point, ProviderError> {
    match (
        value.get(0).and_then(Value::as_f64),
        value.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Ok(Point::new(x, y)),
        _ => Err(ProviderError::MalformedResponse(format!(
            "expected a [lon, lat] pair, got {value}"
        ))),
    }
}

/// Strips semicolons and percent-encodes whitespace, as the geocoding API expects.
fn prepare_address(address: &str) -> String {
    let mut prepared = String::with_capacity(address.len());
    for ch in address.chars() {
        if ch.is_whitespace() {
            prepared.push_str("%20");
        } else if ch != ';' {
            prepared.push(ch);
        }
    }
    prepared
}
