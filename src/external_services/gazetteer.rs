use crate::external_services::{ProviderError, RouteProvider};
use crate::simulation::geometry::Point;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Coordinates closer than this are considered the same place when reverse
/// geocoding. Route interpolation ends exactly on the target coordinate, so
/// arrived vehicles always match.
const REVERSE_LOOKUP_TOLERANCE: f64 = 1e-9;

#[derive(Serialize, Deserialize, Debug)]
struct GazetteerFile {
    #[serde(default)]
    entries: Vec<GazetteerEntry>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GazetteerEntry {
    address: String,
    x: f64,
    y: f64,
}

/// Deterministic offline route provider backed by a fixed address table.
///
/// Geocoding is a case-insensitive lookup in the table. Routes are straight
/// lines from start to destination, interpolated at `waypoint_spacing`
/// coordinate units per waypoint. Optionally sleeps a random duration per
/// routing call to mimic the latency jitter of a real service.
pub struct GazetteerProvider {
    entries: Vec<(String, Point)>,
    waypoint_spacing: f64,
    latency_millis: Option<Range<u64>>,
}

impl GazetteerProvider {
    pub fn new(entries: Vec<(String, Point)>, waypoint_spacing: f64) -> Self {
        assert!(
            waypoint_spacing > 0.0,
            "waypoint_spacing must be positive, got {waypoint_spacing}"
        );
        GazetteerProvider {
            entries,
            waypoint_spacing,
            latency_millis: None,
        }
    }

    pub fn from_file(path: &Path, waypoint_spacing: f64) -> Result<Self, ProviderError> {
        let text = fs::read_to_string(path).map_err(|e| {
            ProviderError::Transport(format!("failed to read gazetteer at {path:?}: {e}"))
        })?;
        let file: GazetteerFile = serde_yaml::from_str(&text).map_err(|e| {
            ProviderError::MalformedResponse(format!("failed to parse gazetteer at {path:?}: {e}"))
        })?;
        let entries = file
            .entries
            .into_iter()
            .map(|e| (e.address, Point::new(e.x, e.y)))
            .collect();
        Ok(Self::new(entries, waypoint_spacing))
    }

    /// Sleep a random duration out of `millis` on every routing call.
    pub fn with_latency(mut self, millis: Range<u64>) -> Self {
        self.latency_millis = Some(millis);
        self
    }

    fn simulate_latency(&self) {
        if let Some(range) = &self.latency_millis {
            let millis = rand::rng().random_range(range.clone());
            thread::sleep(Duration::from_millis(millis));
        }
    }
}

impl RouteProvider for GazetteerProvider {
    fn forward_geocode(&self, address: &str) -> Result<Option<Point>, ProviderError> {
        let wanted = address.trim().to_lowercase();
        Ok(self
            .entries
            .iter()
            .find(|(known, _)| known.to_lowercase() == wanted)
            .map(|(_, point)| *point))
    }

    fn reverse_geocode(&self, coordinate: Point) -> Result<Option<String>, ProviderError> {
        Ok(self
            .entries
            .iter()
            .find(|(_, point)| point.distance_to(coordinate) < REVERSE_LOOKUP_TOLERANCE)
            .map(|(address, _)| address.clone()))
    }

    fn route(&self, from: Point, to: Point) -> Result<Vec<Point>, ProviderError> {
        self.simulate_latency();
        if from == to {
            return Ok(vec![to]);
        }
        let steps = (from.distance_to(to) / self.waypoint_spacing).ceil().max(1.0) as usize;
        let mut route = Vec::with_capacity(steps);
        for i in 1..=steps {
            if i == steps {
                route.push(to);
            } else {
                let t = i as f64 / steps as f64;
                route.push(Point::new(
                    from.x + (to.x - from.x) * t,
                    from.y + (to.y - from.y) * t,
                ));
            }
        }
        Ok(route)
    }
}
