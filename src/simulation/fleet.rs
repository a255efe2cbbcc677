use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::external_services::{ProviderError, RouteProvider};
use crate::simulation::geometry::Point;
use crate::simulation::vehicle::{Destination, Vehicle, VehicleId, VehicleSnapshot, VehicleStatus};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The address could not be resolved to a coordinate. Recoverable; no
    /// vehicle state was touched.
    #[error("address {0:?} could not be resolved to a coordinate")]
    AddressNotFound(String),
    #[error("no vehicles registered in the fleet")]
    EmptyFleet,
    #[error("route provider failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Ordered collection of vehicles with stable slot indices. The slot index at
/// insertion time doubles as the vehicle id and is never reused.
#[derive(Default)]
pub struct FleetRegistry {
    vehicles: RwLock<Vec<Arc<Vehicle>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, seed: Point, report_interval: Duration, pace: Duration) -> Arc<Vehicle> {
        let mut vehicles = self.lock_write();
        let id = VehicleId(vehicles.len() as u32);
        let vehicle = Arc::new(Vehicle::new(id, seed, report_interval, pace));
        vehicles.push(Arc::clone(&vehicle));
        vehicle
    }

    pub fn get(&self, id: VehicleId) -> Option<Arc<Vehicle>> {
        self.lock_read().get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_read().is_empty()
    }

    pub fn vehicles(&self) -> Vec<Arc<Vehicle>> {
        self.lock_read().clone()
    }

    /// Resolves `address` and enqueues it on the best vehicle.
    ///
    /// Selection is two-phase: prefer the nearest `Available` vehicle;
    /// with none available, prefer the least-loaded busy vehicle (by pending
    /// queue length, in ascending tiers) and break ties on distance. Both
    /// phases scan in slot order and keep the first strictly smaller
    /// distance, so the lowest slot wins ties.
    pub fn dispatch(
        &self,
        address: &str,
        provider: &dyn RouteProvider,
    ) -> Result<VehicleId, DispatchError> {
        let target = provider
            .forward_geocode(address)?
            .ok_or_else(|| DispatchError::AddressNotFound(address.to_string()))?;

        let vehicles = self.vehicles();
        if vehicles.is_empty() {
            return Err(DispatchError::EmptyFleet);
        }
        let snapshots: Vec<VehicleSnapshot> = vehicles.iter().map(|v| v.snapshot()).collect();
        let slot = select_slot(&snapshots, target, &|a, b| provider.distance(a, b));

        let vehicle = &vehicles[slot];
        vehicle.push_destination(Destination {
            address: address.to_string(),
            coordinate: target,
        });
        info!(
            vehicle = vehicle.id().0,
            address = %address,
            "dispatched destination"
        );
        Ok(vehicle.id())
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Vehicle>>> {
        self.vehicles.read().expect("fleet registry lock poisoned")
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Vehicle>>> {
        self.vehicles.write().expect("fleet registry lock poisoned")
    }
}

/// Picks the slot of the vehicle to serve `target`, given a consistent
/// snapshot of every vehicle. `snapshots` must not be empty.
fn select_slot(
    snapshots: &[VehicleSnapshot],
    target: Point,
    distance: &dyn Fn(Point, Point) -> f64,
) -> usize {
    debug_assert!(!snapshots.is_empty());

    // Phase 1: any idle vehicle beats every busy one.
    let mut best: Option<(usize, f64)> = None;
    for (slot, snapshot) in snapshots.iter().enumerate() {
        if snapshot.status != VehicleStatus::Available {
            continue;
        }
        let d = distance(snapshot.position, target);
        if best.is_none_or(|(_, best_d)| d < best_d) {
            best = Some((slot, d));
        }
    }
    if let Some((slot, _)) = best {
        return slot;
    }

    // Phase 2: scan tiers of equal pending-queue length. At tier 0 a vehicle
    // is measured from the end of its active route, at tier n from its n-th
    // pending destination, i.e. from where it will be once the new
    // destination comes up.
    let max_tier = snapshots
        .iter()
        .map(|s| s.pending.len())
        .max()
        .unwrap_or(0);
    for tier in 0..=max_tier {
        let mut best: Option<(usize, f64)> = None;
        for (slot, snapshot) in snapshots.iter().enumerate() {
            if snapshot.pending.len() != tier {
                continue;
            }
            let reference = if tier == 0 {
                snapshot.route_end.unwrap_or(snapshot.position)
            } else {
                snapshot.pending[tier - 1]
            };
            let d = distance(reference, target);
            if best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((slot, d));
            }
        }
        if let Some((slot, _)) = best {
            return slot;
        }
    }
    unreachable!("every vehicle qualifies at the tier equal to its pending length")
}
