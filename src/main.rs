use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use traffic_microsim::simulation::{
    DriverKind, LaneGenerator, ScenarioSpec, SettingsUpdate, SimModel, SimState, Simulation,
    StatsLogger,
};

/// Arrival rate of the generators attached to scenario entrances [veh/s]
const SCENARIO_ARRIVAL_RATE: f32 = 0.2;

#[derive(Parser)]
#[command(name = "traffic_microsim")]
#[command(about = "Lane-level microscopic traffic simulation")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "1000")]
    ticks: u32,

    /// Time delta per tick in seconds (default 0.1, or the scenario's own)
    #[arg(long)]
    delta: Option<f32>,

    /// Scenario JSON file; the built-in three-lane motorway is used otherwise
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Pace ticks in real time on the background runner
    #[arg(long)]
    realtime: bool,

    /// Seed for the traffic generators; no generators are attached without it
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut model = build_model(&cli)?;

    if let Some(delta) = cli.delta {
        model.update_settings(&SettingsUpdate {
            time_step: Some(delta),
            ..Default::default()
        })?;
    }

    // Log roughly once per simulated second
    let ticks_per_second = (1.0 / model.settings().time_step).ceil() as u64;
    model.add_observer(Box::new(StatsLogger::new(ticks_per_second)));

    if cli.realtime {
        run_realtime(model, cli.ticks)
    } else {
        run_headless(model, cli.ticks);
        Ok(())
    }
}

fn build_model(cli: &Cli) -> Result<SimModel> {
    let Some(path) = &cli.scenario else {
        return match cli.seed {
            Some(seed) => SimModel::create_test_world_with_seed(seed),
            None => SimModel::create_test_world(),
        };
    };

    let spec = read_scenario(path)?;
    let mut model = SimModel::new();
    model.load_scenario(&spec)?;

    if let Some(seed) = cli.seed {
        // Feed every lane that nothing flows into, in id order so each
        // entrance always gets the same derived seed
        let entrances: Vec<_> = model
            .network()
            .lane_ids()
            .into_iter()
            .filter(|id| {
                model
                    .network()
                    .get_lane(*id)
                    .is_some_and(|lane| lane.upstream_lane().is_none())
            })
            .collect();
        for (offset, lane_id) in entrances.into_iter().enumerate() {
            model.add_generator(Box::new(LaneGenerator::new(
                lane_id,
                SCENARIO_ARRIVAL_RATE,
                DriverKind::default(),
                seed.wrapping_add(offset as u64),
            )));
        }
    }

    Ok(model)
}

fn read_scenario(path: &Path) -> Result<ScenarioSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse scenario file {}", path.display()))
}

/// Step the model directly, as fast as possible
fn run_headless(mut model: SimModel, ticks: u32) {
    info!(
        "Running {} ticks of {}s in headless mode",
        ticks,
        model.settings().time_step
    );

    println!("Initial state:");
    model.print_summary();
    println!();

    for _ in 0..ticks {
        model.tick();
    }

    println!("=== Final State ===");
    model.print_summary();
}

/// Hand the model to the background runner and wait for it to finish
fn run_realtime(model: SimModel, ticks: u32) -> Result<()> {
    let max_time = ticks as f32 * model.settings().time_step;
    let mut simulation = Simulation::from_model(model);
    simulation.update_settings(&SettingsUpdate {
        max_simulation_time: Some(max_time),
        ..Default::default()
    })?;

    info!("Running {:.1}s of simulated time in real time", max_time);
    simulation.start();
    while simulation.state() != SimState::Stopped {
        thread::sleep(Duration::from_millis(100));
    }
    simulation.stop();

    println!("=== Final State ===");
    simulation.with_model(|model| model.print_summary());
    Ok(())
}
