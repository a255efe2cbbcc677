use serde::{Deserialize, Serialize};
use std::fmt;

/// A 2-D coordinate. The simulation treats coordinates as plain Euclidean
/// points; when the Mapbox provider is used, `x` is longitude and `y` latitude.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    /// Straight-line distance. Units are whatever the coordinates are in,
    /// consistent across calls.
    pub fn distance_to(self, other: Point) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
