use argh::FromArgs;
use messages::Config;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use vehicle_bridge::sim::SimVehicle;
use vehicle_bridge::{BridgeEndpoints, VehicleBridge};

/// Camera/vehicle process: writes camera frames into the pipeline, applies
/// the control commands coming back, publishes vehicle state, and obeys
/// pause/resume/respawn/quit actions. Uses the built-in road simulator.
#[derive(FromArgs)]
struct Args {
    /// path to the configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// shared memory name for camera images
    #[argh(option)]
    image_shm_name: Option<String>,

    /// shared memory name for control input
    #[argh(option)]
    control_shm_name: Option<String>,

    /// initial vehicle speed in m/s
    #[argh(option, default = "5.0")]
    initial_speed: f64,

    /// spawn with this lateral offset from the lane center, in meters
    #[argh(option, default = "0.0")]
    spawn_offset: f64,

    /// run without broker connections (no state publish, no actions)
    #[argh(switch)]
    standalone: bool,
}

fn main() {
    env_logger::init();
    std::process::exit(run(argh::from_env()));
}

fn run(args: Args) -> i32 {
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return 1;
        }
    };
    if let Some(name) = args.image_shm_name {
        config.channels.image = name;
    }
    if let Some(name) = args.control_shm_name {
        config.channels.control = name;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            log::error!("failed to register signal handler: {e}");
            return 1;
        }
    }

    let adapter = SimVehicle::new(&config.camera, args.initial_speed)
        .with_lateral_offset(args.spawn_offset);
    let endpoints = if args.standalone {
        BridgeEndpoints::disconnected()
    } else {
        BridgeEndpoints::broker_defaults()
    };

    let mut bridge = match VehicleBridge::new(adapter, &config, endpoints) {
        Ok(bridge) => bridge,
        Err(e) => {
            log::error!("setup failed: {e:#}");
            return 1;
        }
    };

    match bridge.run(&shutdown) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("bridge loop failed: {e:#}");
            1
        }
    }
}
