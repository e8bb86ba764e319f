//! Tick pipeline, lane changes, exits, routes, collisions and generators

use std::sync::{Arc, Mutex};

use traffic_microsim::simulation::{
    DriverKind, LaneGenerator, LaneId, LaneSide, LaneType, LatDirection, Route, RouteId,
    ScenarioSpec, SettingsUpdate, SimLane, SimModel, SimState, SimStats, TrafficGenerator,
    VehicleId,
};

fn lane(id: usize, length: f32) -> SimLane {
    SimLane::new(LaneId::new(id), LaneType::Normal, length)
}

/// Lanes 1 (middle), 2 (left of 1), 3 (right of 1)
fn three_parallel_lanes(length: f32) -> SimModel {
    let mut model = SimModel::new();
    for id in 1..=3 {
        model.add_lane(lane(id, length)).unwrap();
    }
    model
        .connect(LaneId::new(1), LaneSide::Left, LaneId::new(2))
        .unwrap();
    model
        .connect(LaneId::new(1), LaneSide::Right, LaneId::new(3))
        .unwrap();
    model
}

fn assert_lanes_sorted(model: &SimModel) {
    for lane in model.network().lanes() {
        let xs: Vec<f32> = lane.vehicle_positions().map(|(x, _)| x).collect();
        assert!(
            xs.windows(2).all(|pair| pair[0] <= pair[1]),
            "lane {:?} out of order: {:?}",
            lane.id,
            xs
        );
        for (x, id) in lane.vehicle_positions() {
            let vehicle = model.vehicle(id).expect("lane lists an unknown vehicle");
            assert_eq!(vehicle.lane, lane.id);
            assert_eq!(vehicle.x(), x);
        }
    }
}

#[test]
fn test_ids_are_allocated_from_one() {
    let mut model = SimModel::new();
    let first = model.create_lane(LaneType::Normal, 100.0).unwrap();
    let second = model.create_lane(LaneType::Exit, 100.0).unwrap();
    assert_eq!(first, LaneId::new(1));
    assert_eq!(second, LaneId::new(2));

    // An explicit id pushes the counter past it
    model.add_lane(lane(10, 100.0)).unwrap();
    assert_eq!(
        model.create_lane(LaneType::Normal, 100.0).unwrap(),
        LaneId::new(11)
    );

    let a = model.add_vehicle(first, DriverKind::default(), 0.0, None).unwrap();
    let b = model.add_vehicle(first, DriverKind::Simple, 50.0, None).unwrap();
    assert_eq!(a.0 .0, 1);
    assert_eq!(b.0 .0, 2);

    model.remove_vehicle(a).unwrap();
    let c = model.add_vehicle(first, DriverKind::default(), 20.0, None).unwrap();
    assert_eq!(c.0 .0, 3, "ids are never reused");
}

#[test]
fn test_add_vehicle_rejects_unknown_references() {
    let mut model = SimModel::new();
    let lane_id = model.add_lane(lane(1, 100.0)).unwrap();

    assert!(model
        .add_vehicle(LaneId::new(5), DriverKind::default(), 0.0, None)
        .is_err());
    assert!(model
        .add_vehicle(lane_id, DriverKind::default(), 0.0, Some(RouteId::new(3)))
        .is_err());
    assert_eq!(model.vehicle_count(), 0);
    assert_eq!(model.stats().total_vehicles, 0);
    assert_eq!(model.lane(lane_id).unwrap().vehicle_count(), 0);
}

#[test]
fn test_vehicle_and_driver_live_in_lockstep() {
    let mut model = SimModel::new();
    let lane_id = model.add_lane(lane(1, 100.0)).unwrap();
    let vehicle_id = model
        .add_vehicle(lane_id, DriverKind::Simple, 10.0, None)
        .unwrap();

    let driver = model.driver_of(vehicle_id).unwrap();
    assert_eq!(driver.vehicle, vehicle_id);
    assert_eq!(driver.kind, DriverKind::Simple);
    let driver_id = driver.id;
    assert!(model.lane(lane_id).unwrap().contains_vehicle(vehicle_id));

    model.remove_vehicle(vehicle_id).unwrap();
    assert!(model.vehicle(vehicle_id).is_none());
    assert!(model.driver(driver_id).is_none());
    assert!(!model.lane(lane_id).unwrap().contains_vehicle(vehicle_id));
    assert!(model.remove_vehicle(vehicle_id).is_err());
}

#[test]
fn test_remove_lane_removes_its_vehicles_first() {
    let mut model = three_parallel_lanes(500.0);
    let on_lane = model
        .add_vehicle(LaneId::new(2), DriverKind::default(), 10.0, None)
        .unwrap();
    let elsewhere = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 10.0, None)
        .unwrap();

    model.remove_lane(LaneId::new(2)).unwrap();

    assert!(model.vehicle(on_lane).is_none());
    assert!(model.vehicle(elsewhere).is_some());
    assert_eq!(model.lane(LaneId::new(1)).unwrap().left_lane(), None);
    assert_eq!(model.stats().active_vehicles, 1);
    assert!(model.remove_lane(LaneId::new(2)).is_err());
}

#[test]
fn test_clock_advances_by_time_step() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 100.0)).unwrap();
    for _ in 0..10 {
        model.tick();
    }
    assert!((model.current_time() - 1.0).abs() < 1e-4);
    assert!((model.stats().current_time - 1.0).abs() < 1e-4);

    model
        .update_settings(&SettingsUpdate {
            time_step: Some(0.5),
            ..Default::default()
        })
        .unwrap();
    model.tick();
    assert!((model.current_time() - 1.5).abs() < 1e-4);

    assert!(model
        .update_settings(&SettingsUpdate {
            time_step: Some(0.0),
            ..Default::default()
        })
        .is_err());
    assert_eq!(model.settings().time_step, 0.5);
}

#[test]
fn test_vehicles_never_move_backwards_and_lanes_stay_sorted() {
    let mut model = SimModel::new();
    model
        .load_scenario(&ScenarioSpec::three_lane_motorway(3000.0, 4))
        .unwrap();
    let mut last_x: Vec<(VehicleId, f32)> =
        model.vehicles().map(|v| (v.id, v.x())).collect();

    for _ in 0..300 {
        model.tick();
        assert_lanes_sorted(&model);
        for (id, x) in &last_x {
            if let Some(vehicle) = model.vehicle(*id) {
                assert!(vehicle.velocity() >= 0.0);
                assert!(vehicle.x() >= *x, "vehicle {:?} moved backwards", id);
            }
        }
        last_x = model.vehicles().map(|v| (v.id, v.x())).collect();
    }
}

#[test]
fn test_scenario_a_three_lanes_accelerate() {
    let mut model = SimModel::new();
    model
        .load_scenario(&ScenarioSpec::three_lane_motorway(2000.0, 1))
        .unwrap();
    let initial: Vec<(VehicleId, f32)> =
        model.vehicles().map(|v| (v.id, v.x())).collect();
    assert_eq!(initial.len(), 3);

    let mut xs: Vec<f32> = initial.iter().map(|(_, x)| *x).collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(xs, vec![100.0, 150.0, 200.0]);

    for _ in 0..100 {
        model.tick();
    }

    for (id, x) in initial {
        let vehicle = model.vehicle(id).unwrap();
        assert!(vehicle.velocity() > 0.0);
        assert!(vehicle.x() > x);
        assert!(!vehicle.is_crashed());
    }
    assert_eq!(model.stats().active_vehicles, 3);
    assert!(model.stats().average_speed > 0.0);
}

#[test]
fn test_scenario_b_vehicle_exits_when_it_passes_the_end() {
    let mut model = SimModel::new();
    let lane_id = model.add_lane(lane(1, 50.0)).unwrap();
    let vehicle_id = model
        .add_vehicle(lane_id, DriverKind::default(), 10.0, None)
        .unwrap();
    model.set_vehicle_velocity(vehicle_id, 40.0).unwrap();

    let mut removed_at = None;
    for tick in 1..=20 {
        model.tick();
        match model.vehicle(vehicle_id) {
            // Still on the lane means it has not passed the end yet
            Some(vehicle) => assert!(vehicle.x() <= 50.0),
            None => {
                removed_at = Some(tick);
                break;
            }
        }
    }

    let removed_at = removed_at.expect("vehicle never left the network");
    assert!(removed_at <= 15);
    assert!(!model.lane(lane_id).unwrap().contains_vehicle(vehicle_id));
    assert_eq!(model.stats().active_vehicles, 0);
    assert_eq!(model.stats().completed_vehicles, 1);
    assert_eq!(model.stats().crashed_vehicles, 0);
}

#[test]
fn test_scenario_c_close_leader_floors_deceleration() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 500.0)).unwrap();
    model.add_lane(lane(2, 500.0)).unwrap();
    model
        .connect(LaneId::new(1), LaneSide::Left, LaneId::new(2))
        .unwrap();

    let follower = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 10.0, None)
        .unwrap();
    // Rear of the leader sits 1 m ahead of the follower's front
    let leader = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 15.5, None)
        .unwrap();

    model.tick();

    let vehicle = model.vehicle(follower).unwrap();
    assert_eq!(vehicle.acceleration(), -3.0);
    assert_eq!(vehicle.velocity(), 0.0);
    assert!(!vehicle.is_crashed());
    assert!(!model.vehicle(leader).unwrap().is_crashed());
}

#[test]
fn test_lane_change_prefers_left() {
    let mut model = three_parallel_lanes(1000.0);
    let boxed_in = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 100.0, None)
        .unwrap();
    model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 110.0, None)
        .unwrap();

    model.tick();

    let vehicle = model.vehicle(boxed_in).unwrap();
    assert!(vehicle.is_changing_lane());
    assert_eq!(vehicle.lane_change_direction(), Some(LatDirection::Left));
    assert_eq!(vehicle.lane_change().unwrap().target, LaneId::new(2));
}

#[test]
fn test_lane_change_falls_back_to_right_when_left_is_unsafe() {
    let mut model = three_parallel_lanes(1000.0);
    let boxed_in = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 100.0, None)
        .unwrap();
    model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 110.0, None)
        .unwrap();
    // Level with us on the left
    model
        .add_vehicle(LaneId::new(2), DriverKind::default(), 100.0, None)
        .unwrap();

    model.tick();

    let vehicle = model.vehicle(boxed_in).unwrap();
    assert_eq!(vehicle.lane_change_direction(), Some(LatDirection::Right));
}

#[test]
fn test_no_lane_change_without_advantage() {
    let mut model = three_parallel_lanes(1000.0);
    let free = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 100.0, None)
        .unwrap();
    let simple = model
        .add_vehicle(LaneId::new(1), DriverKind::Simple, 50.0, None)
        .unwrap();

    for _ in 0..20 {
        model.tick();
    }

    assert!(!model.vehicle(free).unwrap().is_changing_lane());
    // Simple drivers never change lanes, even stuck behind someone
    assert!(!model.vehicle(simple).unwrap().is_changing_lane());
}

#[test]
fn test_lane_change_completion_moves_vehicle_between_lanes() {
    let mut model = three_parallel_lanes(1000.0);
    let mover = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 100.0, None)
        .unwrap();
    model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 110.0, None)
        .unwrap();

    model.tick();
    assert!(model.vehicle(mover).unwrap().is_changing_lane());

    // 3 s at 0.1 s per tick, plus slack for rounding
    for _ in 0..32 {
        model.tick();
        assert_lanes_sorted(&model);
    }

    let vehicle = model.vehicle(mover).unwrap();
    assert_eq!(vehicle.lane, LaneId::new(2));
    assert!(!vehicle.is_changing_lane());
    assert_eq!(vehicle.lane_change_progress(), 0.0);
    assert_eq!(vehicle.lane_change_direction(), None);

    let count_on = |lane: usize| {
        model
            .lane(LaneId::new(lane))
            .unwrap()
            .vehicle_ids()
            .filter(|id| *id == mover)
            .count()
    };
    assert_eq!(count_on(1), 0);
    assert_eq!(count_on(2), 1);
    assert_eq!(count_on(3), 0);
}

#[test]
fn test_downstream_transfer_and_route_progress() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 100.0)).unwrap();
    model.add_lane(lane(2, 100.0)).unwrap();
    model
        .connect(LaneId::new(1), LaneSide::Downstream, LaneId::new(2))
        .unwrap();

    let route_id = model.plan_route(LaneId::new(1), LaneId::new(2)).unwrap();
    assert_eq!(
        model.route(route_id).unwrap().lane_sequence(),
        &[LaneId::new(1), LaneId::new(2)]
    );

    let vehicle_id = model
        .add_vehicle(LaneId::new(1), DriverKind::Simple, 99.0, Some(route_id))
        .unwrap();
    model.set_vehicle_velocity(vehicle_id, 20.0).unwrap();

    model.tick();
    let vehicle = model.vehicle(vehicle_id).unwrap();
    assert_eq!(vehicle.lane, LaneId::new(2));
    assert!(vehicle.x() < 5.0);
    assert!(model.lane(LaneId::new(2)).unwrap().contains_vehicle(vehicle_id));
    assert!(!model.lane(LaneId::new(1)).unwrap().contains_vehicle(vehicle_id));
    assert_eq!(model.route(route_id).unwrap().current_index(), 1);

    let mut last_index = 1;
    for _ in 0..100 {
        model.tick();
        let index = model.route(route_id).unwrap().current_index();
        assert!(index >= last_index);
        last_index = index;
        if model.vehicle(vehicle_id).is_none() {
            break;
        }
    }

    assert!(model.vehicle(vehicle_id).is_none());
    let route = model.route(route_id).unwrap();
    assert_eq!(route.current_index(), 2);
    assert!(route.is_complete());
    assert_eq!(model.stats().completed_vehicles, 1);
}

#[test]
fn test_route_cursor_saturates() {
    let mut route = Route::new(RouteId::new(1), vec![LaneId::new(1), LaneId::new(2)]);
    assert_eq!(route.current_target(), Some(LaneId::new(1)));
    assert!(!route.on_lane_left(LaneId::new(2)));
    assert!(route.on_lane_left(LaneId::new(1)));
    assert!(!route.is_complete());
    route.advance();
    assert!(route.is_complete());
    route.advance();
    assert_eq!(route.current_index(), 2);
    assert_eq!(route.current_target(), None);
}

#[test]
fn test_add_route_validates_lanes() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 100.0)).unwrap();
    assert!(model.create_route(vec![LaneId::new(1), LaneId::new(9)]).is_err());
    assert!(model.plan_route(LaneId::new(1), LaneId::new(9)).is_err());
    let id = model.create_route(vec![LaneId::new(1)]).unwrap();
    assert!(model.route(id).is_some());
}

#[test]
fn test_rear_end_collision_crashes_both() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 500.0)).unwrap();
    let follower = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 10.0, None)
        .unwrap();
    let leader = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 16.0, None)
        .unwrap();
    model.set_vehicle_velocity(follower, 30.0).unwrap();

    model.tick();

    for id in [follower, leader] {
        let vehicle = model.vehicle(id).unwrap();
        assert!(vehicle.is_crashed());
        assert_eq!(vehicle.velocity(), 0.0);
    }

    let frozen = model.vehicle(follower).unwrap().x();
    for _ in 0..10 {
        model.tick();
    }
    assert_eq!(model.vehicle(follower).unwrap().x(), frozen);

    model.remove_vehicle(follower).unwrap();
    assert_eq!(model.stats().crashed_vehicles, 1);
}

#[test]
fn test_crash_vehicle_stops_it() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 500.0)).unwrap();
    let id = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 10.0, None)
        .unwrap();
    model.set_vehicle_velocity(id, 15.0).unwrap();
    model.crash_vehicle(id).unwrap();

    model.tick();
    let vehicle = model.vehicle(id).unwrap();
    assert_eq!(vehicle.x(), 10.0);
    assert_eq!(vehicle.velocity(), 0.0);
    assert!(model.crash_vehicle(VehicleId::new(99)).is_err());
}

#[test]
fn test_generator_respects_blocked_entrance() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 1000.0)).unwrap();

    let mut generator = LaneGenerator::new(LaneId::new(1), 1000.0, DriverKind::default(), 7);
    generator.update(0.1, &mut model).unwrap();

    // Many arrivals were due but only the first found a free entrance
    assert_eq!(generator.spawned(), 1);
    assert!(generator.skipped() > 0);
    assert_eq!(model.vehicle_count(), 1);
}

#[test]
fn test_generator_is_reproducible_with_seed() {
    let run = |seed: u64| {
        let mut model = SimModel::new();
        model.add_lane(lane(1, 1000.0)).unwrap();
        model.add_generator(Box::new(
            LaneGenerator::new(LaneId::new(1), 0.5, DriverKind::default(), seed)
                .with_initial_velocity(15.0),
        ));
        for _ in 0..600 {
            model.tick();
        }
        let mut xs: Vec<f32> = model.vehicles().map(|v| v.x()).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        (model.stats().total_vehicles, xs)
    };

    let (total, xs) = run(42);
    assert!(total > 0);
    assert_eq!(run(42), (total, xs));
}

#[test]
fn test_generator_without_rate_never_spawns() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 1000.0)).unwrap();
    model.add_generator(Box::new(LaneGenerator::new(
        LaneId::new(1),
        0.0,
        DriverKind::default(),
        1,
    )));
    for _ in 0..100 {
        model.tick();
    }
    assert_eq!(model.vehicle_count(), 0);
}

#[test]
fn test_observers_see_every_tick_and_failures_are_isolated() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 1000.0)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    model.add_observer(Box::new(|_: &SimStats| -> anyhow::Result<()> {
        anyhow::bail!("observer failure")
    }));
    let sink = Arc::clone(&seen);
    model.add_observer(Box::new(move |stats: &SimStats| -> anyhow::Result<()> {
        sink.lock().unwrap().push(stats.current_time);
        Ok(())
    }));

    for _ in 0..5 {
        model.tick();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_step_state_machine() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 100.0)).unwrap();
    assert_eq!(model.state(), SimState::Stopped);

    assert!(!model.pause());
    assert!(!model.resume());

    assert!(model.step());
    assert_eq!(model.state(), SimState::Paused);
    assert!((model.current_time() - 0.1).abs() < 1e-6);

    assert!(model.resume());
    assert_eq!(model.state(), SimState::Running);
    assert!(!model.start());
    assert!(!model.step(), "step is a no-op while running");

    assert!(model.pause());
    assert!(model.stop());
    assert!(!model.stop());
    assert_eq!(model.state(), SimState::Stopped);
    assert!(model.start());
}

#[test]
fn test_debug_mode_does_not_disturb_the_tick() {
    let mut model = SimModel::new();
    model
        .load_scenario(&ScenarioSpec::three_lane_motorway(1000.0, 1))
        .unwrap();
    model
        .update_settings(&SettingsUpdate {
            debug_mode: Some(true),
            ..Default::default()
        })
        .unwrap();
    model.tick();
    assert!(model.settings().debug_mode);
    assert_eq!(model.vehicle_count(), 3);
}

#[test]
fn test_non_finite_velocity_is_rejected() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 500.0)).unwrap();
    let id = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 10.0, None)
        .unwrap();
    model.set_vehicle_velocity(id, 12.0).unwrap();

    assert!(model.set_vehicle_velocity(id, f32::INFINITY).is_err());
    assert!(model.set_vehicle_velocity(id, f32::NEG_INFINITY).is_err());
    assert!(model.set_vehicle_velocity(id, f32::NAN).is_err());
    assert_eq!(model.vehicle(id).unwrap().velocity(), 12.0);
}

#[test]
fn test_failing_vehicle_does_not_stop_the_others() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 1000.0)).unwrap();
    model.add_lane(lane(2, 1000.0)).unwrap();

    // Finite but so fast that the free-flow term overflows
    let runaway = model
        .add_vehicle(LaneId::new(1), DriverKind::default(), 10.0, None)
        .unwrap();
    model.set_vehicle_velocity(runaway, 1e30).unwrap();
    let healthy = model
        .add_vehicle(LaneId::new(2), DriverKind::default(), 10.0, None)
        .unwrap();

    for _ in 0..5 {
        model.tick();
    }

    assert!((model.current_time() - 0.5).abs() < 1e-5);
    assert_eq!(model.vehicle(runaway).unwrap().x(), 10.0);
    assert_eq!(model.vehicle(runaway).unwrap().lane, LaneId::new(1));
    assert!(model.vehicle(healthy).unwrap().x() > 10.0);
    assert_eq!(model.vehicle_count(), 2);
    assert_eq!(model.stats().active_vehicles, 2);
    assert_lanes_sorted(&model);
}

#[test]
fn test_start_is_refused_once_the_limit_is_reached() {
    let mut model = SimModel::new();
    model.add_lane(lane(1, 100.0)).unwrap();
    model
        .update_settings(&SettingsUpdate {
            max_simulation_time: Some(0.2),
            ..Default::default()
        })
        .unwrap();

    assert!(model.step());
    assert!(model.step());
    assert!(model.reached_time_limit());
    assert!(model.stop());

    assert!(!model.start());
    assert_eq!(model.state(), SimState::Stopped);
    let time = model.current_time();

    // A higher limit makes the run startable again
    model
        .update_settings(&SettingsUpdate {
            max_simulation_time: Some(1.0),
            ..Default::default()
        })
        .unwrap();
    assert!(model.start());
    assert_eq!(model.current_time(), time);
}
