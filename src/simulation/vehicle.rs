use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::external_services::RouteProvider;
use crate::simulation::geometry::Point;
use crate::simulation::report::{ReportSink, ReportSinkError, timestamp};

/// Registry slot index of a vehicle at insertion time. Unique per fleet and
/// never reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VehicleStatus {
    Available,
    InTransit,
    Arrived,
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VehicleStatus::Available => "AVAILABLE",
            VehicleStatus::InTransit => "IN_TRANSIT",
            VehicleStatus::Arrived => "ARRIVED",
        };
        write!(f, "{s}")
    }
}

/// A destination awaiting service: the address as requested plus its
/// geocoded coordinate.
#[derive(Clone, Debug, PartialEq)]
pub struct Destination {
    pub address: String,
    pub coordinate: Point,
}

/// Fields owned by the vehicle's task. The registry takes transient
/// snapshots under the same guard during selection.
#[derive(Debug)]
struct VehicleState {
    status: VehicleStatus,
    position: Point,
    route: VecDeque<Point>,
    /// Address of the destination currently in flight.
    destination: Option<String>,
}

/// Consistent point-in-time view of one vehicle, used by the dispatcher.
#[derive(Clone, Debug)]
pub struct VehicleSnapshot {
    pub status: VehicleStatus,
    pub position: Point,
    /// Last waypoint of the active route; `None` when idle.
    pub route_end: Option<Point>,
    /// Coordinates of the pending destinations in queue order.
    pub pending: Vec<Point>,
}

/// What the task loop should do after a tick.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TickAction {
    /// Sleep one tick, then re-evaluate.
    Pace,
    /// Nothing to do, sleep a full report interval.
    Rest,
    /// Cancellation observed, leave the loop.
    Exit,
}

/// A single vehicle: a state machine owning its status, position and active
/// route, driven by its own task. The dispatcher only ever appends to the
/// pending queue; cancellation is requested through the atomic flag and
/// observed cooperatively at every tick head.
pub struct Vehicle {
    id: VehicleId,
    report_interval: Duration,
    pace: Duration,
    state: Mutex<VehicleState>,
    pending: Mutex<VecDeque<Destination>>,
    cancel: AtomicBool,
    running: AtomicBool,
}

impl Vehicle {
    pub fn new(id: VehicleId, seed: Point, report_interval: Duration, pace: Duration) -> Self {
        Vehicle {
            id,
            report_interval,
            pace,
            state: Mutex::new(VehicleState {
                status: VehicleStatus::Available,
                position: seed,
                route: VecDeque::new(),
                destination: None,
            }),
            pending: Mutex::new(VecDeque::new()),
            cancel: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn status(&self) -> VehicleStatus {
        self.lock_state().status
    }

    pub fn position(&self) -> Point {
        self.lock_state().position
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Request cooperative shutdown. The task exits at the next tick head;
    /// a route leg already being walked finishes its tick first.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Called by the dispatcher. Destinations are served strictly in the
    /// order they were pushed.
    pub fn push_destination(&self, destination: Destination) {
        self.lock_pending().push_back(destination);
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        // The only place both guards are held at once; state before pending.
        let state = self.lock_state();
        let pending = self.lock_pending();
        VehicleSnapshot {
            status: state.status,
            position: state.position,
            route_end: state.route.back().copied(),
            pending: pending.iter().map(|d| d.coordinate).collect(),
        }
    }

    /// Runs the vehicle task until cancellation. Sleeps use `park_timeout`
    /// so shutdown can unpark the thread instead of waiting out a
    /// partially-elapsed sleep. A report sink failure terminates only this
    /// vehicle's task, after a best-effort flush.
    pub fn run(&self, provider: &dyn RouteProvider, sink: &mut dyn ReportSink) {
        self.running.store(true, Ordering::SeqCst);
        info!(vehicle = self.id.0, "vehicle task started");
        if let Err(e) = self.drive(provider, sink) {
            error!(
                vehicle = self.id.0,
                "report sink failed, stopping vehicle task: {e}"
            );
            let _ = sink.flush();
        }
        self.running.store(false, Ordering::SeqCst);
        info!(vehicle = self.id.0, "vehicle task stopped");
    }

    fn drive(
        &self,
        provider: &dyn RouteProvider,
        sink: &mut dyn ReportSink,
    ) -> Result<(), ReportSinkError> {
        sink.write_line(&format!(
            "** vehicle #{} simulation started at {} **",
            self.id,
            timestamp()
        ))?;
        let mut since_report = Duration::ZERO;
        loop {
            match self.tick(provider, sink, &mut since_report)? {
                TickAction::Pace => {
                    thread::park_timeout(self.pace);
                    since_report += self.pace;
                }
                TickAction::Rest => {
                    thread::park_timeout(self.report_interval);
                    since_report = Duration::ZERO;
                }
                TickAction::Exit => break,
            }
        }
        sink.write_line(&format!(
            "*** vehicle #{} shutting down at {} ***",
            self.id,
            timestamp()
        ))?;
        sink.flush()
    }

    /// One evaluation of the state machine.
    ///
    /// In transit: consume the front waypoint, reporting every
    /// `report_interval` of accumulated travel time. Emptying the route means
    /// arrival; the next destination is picked up immediately, without
    /// waiting out the report interval. Idle: pick up the next destination if
    /// one is queued, otherwise report once and rest.
    pub(crate) fn tick(
        &self,
        provider: &dyn RouteProvider,
        sink: &mut dyn ReportSink,
        since_report: &mut Duration,
    ) -> Result<TickAction, ReportSinkError> {
        if self.cancel_requested() {
            return Ok(TickAction::Exit);
        }
        {
            let mut state = self.lock_state();
            if state.status == VehicleStatus::InTransit && !state.route.is_empty() {
                if *since_report >= self.report_interval {
                    let line = self.report_line(&state);
                    sink.write_line(&line)?;
                    *since_report = Duration::ZERO;
                }
                let waypoint = state.route.pop_front().expect("route checked non-empty");
                state.position = waypoint;
                if !state.route.is_empty() {
                    return Ok(TickAction::Pace);
                }
                state.status = VehicleStatus::Arrived;
                let address = state
                    .destination
                    .take()
                    .unwrap_or_else(|| String::from("unknown destination"));
                drop(state);
                info!(vehicle = self.id.0, address = %address, "arrived");
                sink.write_line(&format!(
                    "** vehicle #{} arrived at {} @ {} **",
                    self.id,
                    address,
                    timestamp()
                ))?;
                self.advance(provider, sink)?;
                return Ok(TickAction::Pace);
            }
        }

        // Available or Arrived: move on to the next destination if one is queued.
        self.advance(provider, sink)?;
        let idle_report = {
            let state = self.lock_state();
            (state.status == VehicleStatus::Available).then(|| self.report_line(&state))
        };
        if let Some(line) = idle_report {
            sink.write_line(&line)?;
            return Ok(TickAction::Rest);
        }
        Ok(TickAction::Pace)
    }

    /// Pops the next pending destination and requests a route for it. With an
    /// empty queue the vehicle becomes `Available`. An empty or failed route
    /// consumes the destination without travel: the vehicle stays `Arrived`
    /// and re-advances on the next tick.
    ///
    /// The state lock is never held across the provider call. The task is the
    /// sole writer of `state`, so the dispatcher can still snapshot this
    /// vehicle while a route request is in flight.
    fn advance(
        &self,
        provider: &dyn RouteProvider,
        sink: &mut dyn ReportSink,
    ) -> Result<(), ReportSinkError> {
        let Some(next) = self.lock_pending().pop_front() else {
            self.lock_state().status = VehicleStatus::Available;
            return Ok(());
        };
        let position = self.lock_state().position;
        let route = match provider.route(position, next.coordinate) {
            Ok(route) => route,
            Err(e) => {
                warn!(vehicle = self.id.0, address = %next.address, "route request failed: {e}");
                Vec::new()
            }
        };
        if route.is_empty() {
            warn!(
                vehicle = self.id.0,
                address = %next.address,
                "no route to destination, skipping"
            );
            sink.write_line(&format!(
                "** vehicle #{} could not route to {}, destination skipped @ {} **",
                self.id,
                next.address,
                timestamp()
            ))?;
            let mut state = self.lock_state();
            state.destination = None;
            state.status = VehicleStatus::Arrived;
            return Ok(());
        }
        info!(vehicle = self.id.0, address = %next.address, "departing");
        sink.write_line(&format!(
            "** vehicle #{} departing to {} @ {} **",
            self.id,
            next.address,
            timestamp()
        ))?;
        let mut state = self.lock_state();
        state.route = route.into();
        state.destination = Some(next.address);
        state.status = VehicleStatus::InTransit;
        Ok(())
    }

    fn report_line(&self, state: &VehicleState) -> String {
        format!(
            "** {} | vehicle #{} | {} | {} | destination: {} **",
            timestamp(),
            self.id,
            state.status,
            state.position,
            state.destination.as_deref().unwrap_or("none")
        )
    }

    fn lock_state(&self) -> MutexGuard<'_, VehicleState> {
        self.state.lock().expect("vehicle state lock poisoned")
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<Destination>> {
        self.pending.lock().expect("pending queue lock poisoned")
    }
}

#[cfg(any(test, feature = "test_util"))]
impl Vehicle {
    /// Puts the vehicle on an active route, as if it had departed already.
    pub fn set_in_transit(&self, route: Vec<Point>, destination: &str) {
        assert!(!route.is_empty(), "an active route must have waypoints");
        let mut state = self.lock_state();
        state.route = route.into();
        state.destination = Some(destination.to_string());
        state.status = VehicleStatus::InTransit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_services::{ProviderError, RouteProvider};
    use crate::simulation::report::MemoryReportSink;
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_secs(5);
    const PACE: Duration = Duration::from_secs(1);

    /// Routes as straight lines with one waypoint per distance unit;
    /// addresses of the form "x,y" geocode to that coordinate.
    struct GridProvider;

    impl RouteProvider for GridProvider {
        fn forward_geocode(&self, address: &str) -> Result<Option<Point>, ProviderError> {
            let mut parts = address.split(',');
            match (
                parts.next().and_then(|p| p.trim().parse::<f64>().ok()),
                parts.next().and_then(|p| p.trim().parse::<f64>().ok()),
            ) {
                (Some(x), Some(y)) => Ok(Some(Point::new(x, y))),
                _ => Ok(None),
            }
        }

        fn reverse_geocode(&self, coordinate: Point) -> Result<Option<String>, ProviderError> {
            Ok(Some(format!("{},{}", coordinate.x, coordinate.y)))
        }

        fn route(&self, from: Point, to: Point) -> Result<Vec<Point>, ProviderError> {
            let steps = from.distance_to(to).ceil().max(1.0) as usize;
            let mut route = Vec::with_capacity(steps);
            for i in 1..=steps {
                let t = i as f64 / steps as f64;
                route.push(Point::new(
                    from.x + (to.x - from.x) * t,
                    from.y + (to.y - from.y) * t,
                ));
            }
            Ok(route)
        }
    }

    /// Never finds a route.
    struct UnroutableProvider;

    impl RouteProvider for UnroutableProvider {
        fn forward_geocode(&self, _: &str) -> Result<Option<Point>, ProviderError> {
            Ok(None)
        }
        fn reverse_geocode(&self, _: Point) -> Result<Option<String>, ProviderError> {
            Ok(None)
        }
        fn route(&self, _: Point, _: Point) -> Result<Vec<Point>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn vehicle() -> Vehicle {
        Vehicle::new(VehicleId(0), Point::new(0.0, 0.0), INTERVAL, PACE)
    }

    fn destination(address: &str, x: f64, y: f64) -> Destination {
        Destination {
            address: address.to_string(),
            coordinate: Point::new(x, y),
        }
    }

    fn assert_transit_invariant(v: &Vehicle) {
        let snapshot = v.snapshot();
        assert_eq!(
            snapshot.status == VehicleStatus::InTransit,
            snapshot.route_end.is_some(),
            "vehicle must be in transit exactly when it has an active route"
        );
    }

    #[test]
    fn idle_vehicle_reports_and_rests() {
        let v = vehicle();
        let mut sink = MemoryReportSink::new();
        let mut acc = Duration::ZERO;

        let action = v.tick(&GridProvider, &mut sink.clone(), &mut acc).unwrap();

        assert_eq!(action, TickAction::Rest);
        assert_eq!(v.status(), VehicleStatus::Available);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("vehicle #0"));
        assert!(lines[0].contains("AVAILABLE"));
        assert!(lines[0].contains("destination: none"));
    }

    #[test]
    fn three_waypoint_route_consumes_one_waypoint_per_tick() {
        let v = vehicle();
        let mut sink = MemoryReportSink::new();
        let mut handle = sink.clone();
        let mut acc = Duration::ZERO;
        v.push_destination(destination("3,0", 3.0, 0.0));

        // Pick up the destination: 3 distance units -> 3 waypoints.
        assert_eq!(v.tick(&GridProvider, &mut handle, &mut acc).unwrap(), TickAction::Pace);
        assert_eq!(v.status(), VehicleStatus::InTransit);
        assert_transit_invariant(&v);

        for expected_x in [1.0, 2.0] {
            assert_eq!(v.tick(&GridProvider, &mut handle, &mut acc).unwrap(), TickAction::Pace);
            assert_eq!(v.status(), VehicleStatus::InTransit);
            assert_eq!(v.position(), Point::new(expected_x, 0.0));
            assert_transit_invariant(&v);
        }

        // Third waypoint empties the route; the queue is empty, so the
        // immediate advance attempt leaves the vehicle available.
        assert_eq!(v.tick(&GridProvider, &mut handle, &mut acc).unwrap(), TickAction::Pace);
        assert_eq!(v.status(), VehicleStatus::Available);
        assert_eq!(v.position(), Point::new(3.0, 0.0));
        assert_transit_invariant(&v);
        assert!(sink.lines().iter().any(|l| l.contains("arrived at 3,0")));
    }

    #[test]
    fn arrival_picks_up_next_destination_without_waiting() {
        let v = vehicle();
        let mut sink = MemoryReportSink::new();
        let mut handle = sink.clone();
        let mut acc = Duration::ZERO;
        v.push_destination(destination("1,0", 1.0, 0.0));
        v.push_destination(destination("1,2", 1.0, 2.0));

        // Departure tick, then the single waypoint of the first route.
        v.tick(&GridProvider, &mut handle, &mut acc).unwrap();
        v.tick(&GridProvider, &mut handle, &mut acc).unwrap();

        // Arrival and the next departure happened within the same tick.
        assert_eq!(v.status(), VehicleStatus::InTransit);
        assert_eq!(v.pending_len(), 0);
        assert_transit_invariant(&v);

        let lines = sink.lines();
        let arrived = lines.iter().position(|l| l.contains("arrived at 1,0")).unwrap();
        let departed = lines.iter().position(|l| l.contains("departing to 1,2")).unwrap();
        assert!(arrived < departed);
    }

    #[test]
    fn destinations_are_served_in_fifo_order() {
        let v = vehicle();
        let mut sink = MemoryReportSink::new();
        let mut handle = sink.clone();
        let mut acc = Duration::ZERO;
        v.push_destination(destination("a", 1.0, 0.0));
        v.push_destination(destination("b", 2.0, 0.0));
        v.push_destination(destination("c", 3.0, 0.0));

        for _ in 0..12 {
            v.tick(&GridProvider, &mut handle, &mut acc).unwrap();
            assert_transit_invariant(&v);
        }

        let lines = sink.lines();
        let arrivals: Vec<&String> = lines
            .iter()
            .filter(|l| l.contains("arrived at"))
            .collect();
        assert_eq!(arrivals.len(), 3);
        assert!(arrivals[0].contains("arrived at a"));
        assert!(arrivals[1].contains("arrived at b"));
        assert!(arrivals[2].contains("arrived at c"));
    }

    #[test]
    fn empty_route_skips_destination_without_travel() {
        let v = vehicle();
        let mut sink = MemoryReportSink::new();
        let mut handle = sink.clone();
        let mut acc = Duration::ZERO;
        let seed = v.position();
        v.push_destination(destination("unreachable", 5.0, 5.0));

        assert_eq!(
            v.tick(&UnroutableProvider, &mut handle, &mut acc).unwrap(),
            TickAction::Pace
        );
        assert_eq!(v.status(), VehicleStatus::Arrived);
        assert_eq!(v.position(), seed);
        assert_eq!(v.pending_len(), 0);
        assert_transit_invariant(&v);
        assert!(sink.lines().iter().any(|l| l.contains("destination skipped")));

        // Next tick falls through to idle again.
        assert_eq!(
            v.tick(&UnroutableProvider, &mut handle, &mut acc).unwrap(),
            TickAction::Rest
        );
        assert_eq!(v.status(), VehicleStatus::Available);
    }

    #[test]
    fn in_transit_reports_after_report_interval_elapsed() {
        let v = vehicle();
        let mut sink = MemoryReportSink::new();
        let mut handle = sink.clone();
        let mut acc = Duration::ZERO;
        v.push_destination(destination("20,0", 20.0, 0.0));
        v.tick(&GridProvider, &mut handle, &mut acc).unwrap();

        // Walk below the report interval: no in-transit report yet.
        for _ in 0..4 {
            v.tick(&GridProvider, &mut handle, &mut acc).unwrap();
            acc += PACE;
        }
        assert!(!sink.lines().iter().any(|l| l.contains("IN_TRANSIT")));

        acc = INTERVAL;
        v.tick(&GridProvider, &mut handle, &mut acc).unwrap();
        assert!(sink.lines().iter().any(|l| l.contains("IN_TRANSIT")));
        assert_eq!(acc, Duration::ZERO, "report resets the accumulator");
    }

    #[test]
    fn cancellation_is_observed_at_tick_head() {
        let v = vehicle();
        let mut sink = MemoryReportSink::new();
        let mut handle = sink.clone();
        let mut acc = Duration::ZERO;
        v.push_destination(destination("3,0", 3.0, 0.0));
        v.tick(&GridProvider, &mut handle, &mut acc).unwrap();

        v.cancel();
        assert_eq!(
            v.tick(&GridProvider, &mut handle, &mut acc).unwrap(),
            TickAction::Exit
        );
        // The route in progress is left as is; nothing was abandoned mid-write.
        assert_eq!(v.status(), VehicleStatus::InTransit);
    }

    #[test]
    fn snapshot_is_not_blocked_by_an_in_flight_route_request() {
        use std::sync::mpsc;
        use std::time::Instant;

        /// Signals when a route request comes in, then takes its time.
        struct SlowProvider {
            entered: mpsc::Sender<()>,
        }
        impl RouteProvider for SlowProvider {
            fn forward_geocode(&self, _: &str) -> Result<Option<Point>, ProviderError> {
                Ok(None)
            }
            fn reverse_geocode(&self, _: Point) -> Result<Option<String>, ProviderError> {
                Ok(None)
            }
            fn route(&self, _: Point, to: Point) -> Result<Vec<Point>, ProviderError> {
                self.entered.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(500));
                Ok(vec![to])
            }
        }

        let (entered, route_started) = mpsc::channel();
        let v = Arc::new(vehicle());
        v.push_destination(destination("slow", 1.0, 0.0));
        let ticker = Arc::clone(&v);
        let join = std::thread::spawn(move || {
            let mut sink = MemoryReportSink::new();
            let mut acc = Duration::ZERO;
            ticker
                .tick(&SlowProvider { entered }, &mut sink, &mut acc)
                .unwrap();
        });

        route_started.recv().unwrap();
        let start = Instant::now();
        let snapshot = v.snapshot();
        assert!(
            start.elapsed() < Duration::from_millis(200),
            "snapshot waited {:?} behind a route request",
            start.elapsed()
        );
        // The destination is already claimed but its route is not installed yet.
        assert_eq!(snapshot.status, VehicleStatus::Available);
        assert!(snapshot.pending.is_empty());

        join.join().unwrap();
        assert_eq!(v.status(), VehicleStatus::InTransit);
    }

    #[test]
    fn sink_failure_is_fatal_to_the_task_only() {
        struct FailingSink;
        impl ReportSink for FailingSink {
            fn write_line(&mut self, _: &str) -> Result<(), ReportSinkError> {
                Err(std::io::Error::other("sink gone").into())
            }
            fn flush(&mut self) -> Result<(), ReportSinkError> {
                Ok(())
            }
        }

        let v = Arc::new(vehicle());
        let mut sink = FailingSink;
        v.run(&GridProvider, &mut sink);

        // run() swallowed the error and cleared the running flag.
        assert!(!v.is_running());
    }

    #[test]
    fn run_exits_on_cancellation_and_writes_shutdown_banner() {
        let v = Arc::new(Vehicle::new(
            VehicleId(3),
            Point::new(0.0, 0.0),
            Duration::from_millis(10),
            Duration::from_millis(1),
        ));
        let sink = MemoryReportSink::new();
        let mut handle = sink.clone();
        let worker = Arc::clone(&v);
        let join = std::thread::spawn(move || worker.run(&GridProvider, &mut handle));

        while !v.is_running() {
            std::thread::yield_now();
        }
        v.cancel();
        join.thread().unpark();
        join.join().unwrap();

        assert!(!v.is_running());
        let lines = sink.lines();
        assert!(lines.first().unwrap().contains("simulation started"));
        assert!(lines.last().unwrap().contains("shutting down"));
    }
}
