//! The simulation model that ties everything together
//!
//! `SimModel` owns every lane, vehicle, driver and route and is the only
//! place they are mutated. It runs one tick at a time; pacing and threading
//! live in [`crate::simulation::Simulation`].

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;

use super::driver::{DriverKind, SimDriver};
use super::generator::{LaneGenerator, TrafficGenerator};
use super::lane::SimLane;
use super::lane_network::SimLaneNetwork;
use super::observer::SimObserver;
use super::route::Route;
use super::scenario::ScenarioSpec;
use super::settings::{SettingsUpdate, SimSettings, SimState};
use super::snapshot::{LaneView, SimSnapshot, VehicleView};
use super::stats::SimStats;
use super::types::{DriverId, IdAllocator, LaneId, LaneSide, LaneType, RouteId, VehicleId};
use super::vehicle::SimVehicle;
use super::vehicle_manager;

/// Arrival rate used by the generators of the test world [veh/s]
const TEST_WORLD_ARRIVAL_RATE: f32 = 0.2;

/// The main simulation model
pub struct SimModel {
    network: SimLaneNetwork,
    vehicles: HashMap<VehicleId, SimVehicle>,
    drivers: HashMap<DriverId, SimDriver>,
    routes: HashMap<RouteId, Route>,
    ids: IdAllocator,

    /// Simulation time in seconds
    time: f32,
    settings: SimSettings,
    stats: SimStats,
    state: SimState,

    generators: Vec<Box<dyn TrafficGenerator>>,
    observers: Vec<Box<dyn SimObserver>>,
}

impl Default for SimModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimModel {
    pub fn new() -> Self {
        Self {
            network: SimLaneNetwork::new(),
            vehicles: HashMap::new(),
            drivers: HashMap::new(),
            routes: HashMap::new(),
            ids: IdAllocator::new(),
            time: 0.0,
            settings: SimSettings::default(),
            stats: SimStats::default(),
            state: SimState::Stopped,
            generators: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn with_settings(settings: SimSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            ..Self::new()
        })
    }

    pub fn current_time(&self) -> f32 {
        self.time
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn network(&self) -> &SimLaneNetwork {
        &self.network
    }

    /// Change settings; takes effect from the next tick
    pub fn update_settings(&mut self, update: &SettingsUpdate) -> Result<()> {
        self.settings.apply(update)?;
        debug!("Settings updated: {:?}", self.settings);
        Ok(())
    }

    /// Whether the clock has reached the configured limit
    pub fn reached_time_limit(&self) -> bool {
        self.time >= self.settings.max_simulation_time
    }

    // --- State machine -----------------------------------------------------

    /// STOPPED -> RUNNING. Returns false if the transition does not apply or
    /// the clock already reached `max_simulation_time`.
    pub fn start(&mut self) -> bool {
        if self.reached_time_limit() {
            debug!("Start refused at t={:.2}s: time limit reached", self.time);
            return false;
        }
        self.transition(SimState::Stopped, SimState::Running)
    }

    /// RUNNING -> PAUSED
    pub fn pause(&mut self) -> bool {
        self.transition(SimState::Running, SimState::Paused)
    }

    /// PAUSED -> RUNNING
    pub fn resume(&mut self) -> bool {
        self.transition(SimState::Paused, SimState::Running)
    }

    /// Any state -> STOPPED
    pub fn stop(&mut self) -> bool {
        if self.state == SimState::Stopped {
            return false;
        }
        info!("Simulation stopped at t={:.2}s", self.time);
        self.state = SimState::Stopped;
        true
    }

    /// Run exactly one tick from STOPPED or PAUSED and settle in PAUSED
    pub fn step(&mut self) -> bool {
        if !matches!(self.state, SimState::Stopped | SimState::Paused) {
            return false;
        }
        self.state = SimState::Step;
        self.tick();
        self.state = SimState::Paused;
        true
    }

    fn transition(&mut self, from: SimState, to: SimState) -> bool {
        if self.state != from {
            return false;
        }
        debug!("Simulation state {:?} -> {:?}", from, to);
        self.state = to;
        true
    }

    // --- Lanes -------------------------------------------------------------

    /// Add a lane with a caller-chosen id
    pub fn add_lane(&mut self, lane: SimLane) -> Result<LaneId> {
        let id = self.network.add_lane(lane)?;
        self.ids.reserve_lane(id);
        Ok(id)
    }

    /// Add a straight lane with a freshly allocated id
    pub fn create_lane(&mut self, lane_type: LaneType, length: f32) -> Result<LaneId> {
        let id = self.ids.next_lane();
        self.add_lane(SimLane::new(id, lane_type, length))
    }

    /// Remove a lane; every vehicle on it is removed first
    pub fn remove_lane(&mut self, lane_id: LaneId) -> Result<()> {
        let on_lane: Vec<VehicleId> = self
            .network
            .get_lane(lane_id)
            .with_context(|| format!("Lane {:?} not found", lane_id))?
            .vehicle_ids()
            .collect();

        // Vehicles still changing into this lane would land nowhere
        let changing_in: Vec<VehicleId> = self
            .vehicles
            .values()
            .filter(|v| v.lane_change().is_some_and(|change| change.target == lane_id))
            .map(|v| v.id)
            .collect();
        for vehicle_id in changing_in {
            if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
                vehicle.cancel_lane_change();
            }
        }

        for vehicle_id in on_lane {
            self.remove_vehicle(vehicle_id)?;
        }
        self.network.remove_lane(lane_id)?;
        info!("Removed lane {:?}", lane_id);
        Ok(())
    }

    pub fn connect(&mut self, lane_id: LaneId, side: LaneSide, other_id: LaneId) -> Result<()> {
        self.network.connect(lane_id, side, other_id)
    }

    pub fn disconnect(&mut self, lane_id: LaneId, side: LaneSide) -> Result<()> {
        self.network.disconnect(lane_id, side)
    }

    pub fn lane(&self, lane_id: LaneId) -> Option<&SimLane> {
        self.network.get_lane(lane_id)
    }

    pub fn lane_count(&self) -> usize {
        self.network.lane_count()
    }

    // --- Routes ------------------------------------------------------------

    /// Register a route with a caller-chosen id; every lane must exist
    pub fn add_route(&mut self, route: Route) -> Result<RouteId> {
        if self.routes.contains_key(&route.id) {
            bail!("Route {:?} already exists", route.id);
        }
        if let Some(missing) = route
            .lane_sequence()
            .iter()
            .find(|lane| !self.network.contains_lane(**lane))
        {
            bail!("Route {:?} references unknown lane {:?}", route.id, missing);
        }
        let id = route.id;
        self.ids.reserve_route(id);
        self.routes.insert(id, route);
        Ok(id)
    }

    pub fn create_route(&mut self, lane_sequence: Vec<LaneId>) -> Result<RouteId> {
        let id = self.ids.next_route();
        self.add_route(Route::new(id, lane_sequence))
    }

    /// Find a lane sequence from `from` to `to` and register it as a route
    pub fn plan_route(&mut self, from: LaneId, to: LaneId) -> Result<RouteId> {
        let lanes = self
            .network
            .find_route(from, to)
            .with_context(|| format!("No route from lane {:?} to lane {:?}", from, to))?;
        self.create_route(lanes)
    }

    pub fn route(&self, route_id: RouteId) -> Option<&Route> {
        self.routes.get(&route_id)
    }

    // --- Vehicles ----------------------------------------------------------

    /// Add a vehicle and its driver.
    ///
    /// # Arguments
    /// * `lane_id` - Lane to place the vehicle on
    /// * `kind` - Driver behavior
    /// * `initial_position` - Distance along the lane in meters (negative is clamped to 0)
    /// * `route` - Optional route for the driver
    pub fn add_vehicle(
        &mut self,
        lane_id: LaneId,
        kind: DriverKind,
        initial_position: f32,
        route: Option<RouteId>,
    ) -> Result<VehicleId> {
        if let Some(route_id) = route {
            if !self.routes.contains_key(&route_id) {
                bail!("Route {:?} not found", route_id);
            }
        }
        if !self.network.contains_lane(lane_id) {
            bail!("Lane {:?} not found", lane_id);
        }

        let (vehicle, driver) = vehicle_manager::spawn_vehicle(
            self.ids.next_vehicle(),
            self.ids.next_driver(),
            lane_id,
            kind,
            initial_position,
            route,
            &self.network,
        )?;

        let vehicle_id = vehicle.id;
        let lane = self
            .network
            .get_lane_mut(lane_id)
            .with_context(|| format!("Lane {:?} not found", lane_id))?;
        lane.insert_vehicle(vehicle_id, vehicle.x());
        self.drivers.insert(driver.id, driver);
        self.vehicles.insert(vehicle_id, vehicle);
        self.stats.record_added();

        debug!(
            "Added vehicle {:?} ({}) on lane {:?} at x={:.1}",
            vehicle_id, kind, lane_id, initial_position
        );
        Ok(vehicle_id)
    }

    /// Remove a vehicle and its driver
    pub fn remove_vehicle(&mut self, vehicle_id: VehicleId) -> Result<()> {
        let vehicle = vehicle_manager::despawn_vehicle(
            vehicle_id,
            &mut self.vehicles,
            &mut self.drivers,
            &mut self.network,
        )?;
        self.stats.record_removed(vehicle.is_crashed());
        debug!("Removed vehicle {:?}", vehicle_id);
        Ok(())
    }

    pub fn set_vehicle_velocity(&mut self, vehicle_id: VehicleId, velocity: f32) -> Result<()> {
        if !velocity.is_finite() {
            bail!("Velocity {} is not a finite number", velocity);
        }
        self.vehicles
            .get_mut(&vehicle_id)
            .with_context(|| format!("Vehicle {:?} not found", vehicle_id))?
            .set_velocity(velocity);
        Ok(())
    }

    pub fn crash_vehicle(&mut self, vehicle_id: VehicleId) -> Result<()> {
        self.vehicles
            .get_mut(&vehicle_id)
            .with_context(|| format!("Vehicle {:?} not found", vehicle_id))?
            .crash();
        warn!("Vehicle {:?} crashed", vehicle_id);
        Ok(())
    }

    pub fn vehicle(&self, vehicle_id: VehicleId) -> Option<&SimVehicle> {
        self.vehicles.get(&vehicle_id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &SimVehicle> {
        self.vehicles.values()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn driver(&self, driver_id: DriverId) -> Option<&SimDriver> {
        self.drivers.get(&driver_id)
    }

    /// The driver controlling `vehicle_id`
    pub fn driver_of(&self, vehicle_id: VehicleId) -> Option<&SimDriver> {
        self.vehicles
            .get(&vehicle_id)
            .and_then(|v| v.driver)
            .and_then(|driver_id| self.drivers.get(&driver_id))
    }

    // --- Generators and observers -----------------------------------------

    pub fn add_generator(&mut self, generator: Box<dyn TrafficGenerator>) {
        self.generators.push(generator);
    }

    pub fn add_observer(&mut self, observer: Box<dyn SimObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn take_observers(&mut self) -> Vec<Box<dyn SimObserver>> {
        std::mem::take(&mut self.observers)
    }

    // --- Tick --------------------------------------------------------------

    /// Advance the simulation by one `time_step`
    pub fn tick(&mut self) {
        let dt = self.settings.time_step;
        self.time += dt;

        vehicle_manager::refresh_surroundings(&self.network, &mut self.vehicles);

        vehicle_manager::drive_all(&self.network, &mut self.vehicles, &self.drivers);

        let reports =
            vehicle_manager::integrate_vehicles(dt, &mut self.vehicles, &mut self.network);
        for report in reports {
            self.advance_route(report.vehicle, &report.lanes_left);
            if report.exited {
                debug!("Vehicle {:?} left the network", report.vehicle);
                if let Err(e) = self.remove_vehicle(report.vehicle) {
                    warn!("Failed to remove exited vehicle {:?}: {:#}", report.vehicle, e);
                }
            }
        }

        for vehicle_id in vehicle_manager::detect_collisions(&self.network, &mut self.vehicles) {
            warn!("Vehicle {:?} crashed", vehicle_id);
        }

        self.run_generators(dt);

        self.stats.recompute(&self.network, &self.vehicles);
        self.stats.current_time = self.time;

        self.notify_observers();

        if self.settings.debug_mode {
            self.log_vehicles();
        }
    }

    fn advance_route(&mut self, vehicle_id: VehicleId, lanes_left: &[LaneId]) {
        let Some(route_id) = self.driver_of(vehicle_id).and_then(|d| d.route) else {
            return;
        };
        if let Some(route) = self.routes.get_mut(&route_id) {
            for lane in lanes_left {
                route.on_lane_left(*lane);
            }
        }
    }

    fn run_generators(&mut self, dt: f32) {
        let mut generators = std::mem::take(&mut self.generators);
        for generator in generators.iter_mut() {
            if let Err(e) = generator.update(dt, self) {
                warn!("Error in traffic generator: {:#}", e);
            }
        }
        // Keep any generator registered while the others ran
        generators.append(&mut self.generators);
        self.generators = generators;
    }

    fn notify_observers(&mut self) {
        let stats = self.stats;
        for observer in self.observers.iter_mut() {
            if let Err(e) = observer.on_tick(&stats) {
                warn!("Error in simulation observer: {:#}", e);
            }
        }
    }

    fn log_vehicles(&self) {
        let mut ids: Vec<&VehicleId> = self.vehicles.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(v) = self.vehicles.get(id) {
                debug!(
                    "t={:.2} vehicle={:?} lane={:?} x={:.2} y={:.2} v={:.2} a={:.2}{}",
                    self.time,
                    v.id,
                    v.lane,
                    v.x(),
                    v.y(),
                    v.velocity(),
                    v.acceleration(),
                    if v.is_crashed() { " CRASHED" } else { "" }
                );
            }
        }
    }

    // --- Scenarios and snapshots ------------------------------------------

    /// Replace the whole network with `spec`. The model ends up STOPPED with
    /// its clock and statistics reset; ids keep counting upward.
    pub fn load_scenario(&mut self, spec: &ScenarioSpec) -> Result<()> {
        let kinds = spec
            .vehicles
            .iter()
            .map(|v| v.driver_type.parse::<DriverKind>())
            .collect::<Result<Vec<_>>>()?;
        if let Some(settings) = &spec.settings {
            settings.validate().context("Invalid scenario settings")?;
        }

        self.stop();
        self.network.clear();
        self.vehicles.clear();
        self.drivers.clear();
        self.routes.clear();
        self.generators.clear();
        self.time = 0.0;
        self.stats = SimStats::default();
        if let Some(settings) = spec.settings {
            self.settings = settings;
        }

        for lane_spec in &spec.lanes {
            let mut lane = SimLane::new(lane_spec.id, lane_spec.lane_type, lane_spec.length);
            if let Some(width) = lane_spec.width {
                lane = lane.with_width(width);
            }
            if let Some(speed_limit) = lane_spec.speed_limit {
                lane = lane.with_speed_limit(speed_limit);
            }
            if let Some(coordinates) = &lane_spec.coordinates {
                lane = lane.with_coordinates(coordinates.clone());
            }
            self.add_lane(lane)?;
        }

        for connection in &spec.connections {
            for (side, other) in [
                (LaneSide::Upstream, connection.upstream),
                (LaneSide::Downstream, connection.downstream),
                (LaneSide::Left, connection.left),
                (LaneSide::Right, connection.right),
            ] {
                if let Some(other) = other {
                    self.connect(connection.lane_id, side, other)?;
                }
            }
        }

        for route_spec in &spec.routes {
            self.add_route(Route::new(route_spec.id, route_spec.lane_sequence.clone()))?;
        }

        for (vehicle_spec, kind) in spec.vehicles.iter().zip(kinds) {
            let vehicle_id = self.add_vehicle(
                vehicle_spec.lane_id,
                kind,
                vehicle_spec.position,
                vehicle_spec.route_id,
            )?;
            if let Some(velocity) = vehicle_spec.velocity {
                self.set_vehicle_velocity(vehicle_id, velocity)?;
            }
        }

        self.stats.recompute(&self.network, &self.vehicles);
        info!(
            "Loaded scenario: {} lanes, {} routes, {} vehicles",
            self.network.lane_count(),
            self.routes.len(),
            self.vehicles.len()
        );
        Ok(())
    }

    /// A fully materialized view of the current state
    pub fn snapshot(&self) -> SimSnapshot {
        let mut vehicle_ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        vehicle_ids.sort();

        let vehicles = vehicle_ids
            .iter()
            .filter_map(|id| self.vehicles.get(id))
            .map(|vehicle| {
                let route = self.driver_of(vehicle.id).and_then(|d| d.route);
                VehicleView::new(vehicle, self.network.get_lane(vehicle.lane), route)
            })
            .collect();

        let lanes = self
            .network
            .lane_ids()
            .iter()
            .filter_map(|id| self.network.get_lane(*id))
            .map(|lane| LaneView::new(lane, &self.vehicles))
            .collect();

        SimSnapshot {
            state: self.state,
            stats: self.stats,
            settings: self.settings,
            vehicles,
            lanes,
        }
    }

    /// Create a default test world: three parallel 2 km lanes with a few
    /// vehicles each
    pub fn create_test_world() -> Result<Self> {
        let mut model = SimModel::new();
        model.load_scenario(&ScenarioSpec::three_lane_motorway(2000.0, 2))?;
        Ok(model)
    }

    /// The test world plus a seeded generator feeding every lane
    pub fn create_test_world_with_seed(seed: u64) -> Result<Self> {
        let mut model = Self::create_test_world()?;
        for (offset, lane_id) in model.network.lane_ids().into_iter().enumerate() {
            model.add_generator(Box::new(LaneGenerator::new(
                lane_id,
                TEST_WORLD_ARRIVAL_RATE,
                DriverKind::default(),
                seed.wrapping_add(offset as u64),
            )));
        }
        Ok(model)
    }

    /// Print a summary of the model state
    pub fn print_summary(&self) {
        println!("=== Traffic Simulation Summary ===");
        println!("Time: {:.2}s  State: {:?}", self.time, self.state);
        println!(
            "Lanes: {}, Routes: {}, Vehicles: {}",
            self.network.lane_count(),
            self.routes.len(),
            self.vehicles.len()
        );
        println!(
            "Total: {}, Completed: {}, Crashed: {}",
            self.stats.total_vehicles, self.stats.completed_vehicles, self.stats.crashed_vehicles
        );
        println!(
            "Mean speed: {:.2} m/s, Flow: {:.1} veh/h, Density: {:.2} veh/km",
            self.stats.average_speed, self.stats.total_flow, self.stats.average_density
        );

        println!("--- Lanes ---");
        for lane_id in self.network.lane_ids() {
            if let Some(lane) = self.network.get_lane(lane_id) {
                println!(
                    "  Lane {} ({:?}): vehicles={}, density={:.2}, mean_speed={:.2}",
                    lane.id.0 .0,
                    lane.lane_type,
                    lane.vehicle_count(),
                    lane.density(),
                    lane.average_speed(&self.vehicles)
                );
            }
        }

        if !self.vehicles.is_empty() {
            println!("--- Active Vehicles ---");
            let mut ids: Vec<&VehicleId> = self.vehicles.keys().collect();
            ids.sort();
            for id in ids {
                if let Some(vehicle) = self.vehicles.get(id) {
                    println!(
                        "  Vehicle {}: lane={}, x={:.1}, v={:.1}, a={:.2}{}",
                        vehicle.id.0 .0,
                        vehicle.lane.0 .0,
                        vehicle.x(),
                        vehicle.velocity(),
                        vehicle.acceleration(),
                        if vehicle.is_changing_lane() {
                            " (changing lane)"
                        } else {
                            ""
                        }
                    );
                }
            }
        }
    }
}
