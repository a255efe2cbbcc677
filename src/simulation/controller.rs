use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use derive_builder::Builder;
use thiserror::Error;
use tracing::{error, info};

use crate::external_services::RouteProvider;
use crate::simulation::config::Config;
use crate::simulation::fleet::{DispatchError, FleetRegistry};
use crate::simulation::geometry::Point;
use crate::simulation::report::{FileReportSink, ReportSinkError};
use crate::simulation::vehicle::{Vehicle, VehicleId};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to create report sink: {0}")]
    Sink(#[from] ReportSinkError),
    #[error("failed to spawn vehicle task: {0}")]
    Spawn(#[from] std::io::Error),
}

struct VehicleWorker {
    vehicle: Arc<Vehicle>,
    handle: JoinHandle<()>,
}

/// Lifecycle owner of the simulation: creates vehicles and their tasks,
/// forwards dispatch requests to the registry, and performs coordinated
/// shutdown.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct FleetController {
    config: Arc<Config>,
    provider: Arc<dyn RouteProvider>,
    #[builder(default)]
    registry: Arc<FleetRegistry>,
    #[builder(setter(skip), default)]
    workers: Arc<Mutex<Vec<VehicleWorker>>>,
}

impl FleetController {
    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    /// Creates a vehicle with the configured seed position and report
    /// interval and starts its task.
    pub fn add_vehicle_with_defaults(&self) -> Result<VehicleId, ControllerError> {
        self.add_vehicle(
            self.config.fleet.seed_position,
            self.config.fleet.report_interval(),
        )
    }

    /// Creates a vehicle with id equal to the current registry size and
    /// starts its task on a dedicated thread.
    pub fn add_vehicle(
        &self,
        seed: Point,
        report_interval: Duration,
    ) -> Result<VehicleId, ControllerError> {
        let vehicle = self
            .registry
            .add(seed, report_interval, self.config.fleet.pace());
        let mut sink = FileReportSink::create(&self.config.output.output_dir, vehicle.id())?;

        let provider = Arc::clone(&self.provider);
        let worker_vehicle = Arc::clone(&vehicle);
        let handle = thread::Builder::new()
            .name(format!("vehicle-{}", vehicle.id()))
            .spawn(move || worker_vehicle.run(provider.as_ref(), &mut sink))?;

        self.lock_workers().push(VehicleWorker {
            vehicle: Arc::clone(&vehicle),
            handle,
        });
        info!(vehicle = vehicle.id().0, "added vehicle");
        Ok(vehicle.id())
    }

    /// Dispatches an address to the best vehicle. `AddressNotFound` is a
    /// recoverable condition for the caller, not a fault.
    pub fn request_dispatch(&self, address: &str) -> Result<VehicleId, DispatchError> {
        self.registry.dispatch(address, self.provider.as_ref())
    }

    /// Cancels every vehicle task, cuts their sleeps short and waits until
    /// each one has actually finished.
    pub fn shutdown(self) {
        let workers = std::mem::take(&mut *self.lock_workers());
        info!("shutting down {} vehicle tasks", workers.len());
        for worker in &workers {
            worker.vehicle.cancel();
            worker.handle.thread().unpark();
        }
        for worker in workers {
            let id = worker.vehicle.id();
            if worker.handle.join().is_err() {
                error!(vehicle = id.0, "vehicle task panicked");
            }
        }
        info!("fleet shut down");
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<VehicleWorker>> {
        self.workers.lock().expect("controller worker lock poisoned")
    }
}
