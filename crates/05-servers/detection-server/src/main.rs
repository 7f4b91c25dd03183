use argh::FromArgs;
use detection_server::DetectionServer;
use messages::Config;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Lane detection server: reads camera frames from shared memory, writes
/// lane detections, and applies parameter updates from the broker.
#[derive(FromArgs)]
struct Args {
    /// path to the configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// shared memory name for camera images
    #[argh(option)]
    image_shm_name: Option<String>,

    /// shared memory name for detection results
    #[argh(option)]
    detection_shm_name: Option<String>,

    /// broker parameter egress to subscribe to
    #[argh(option, default = "String::from(\"tcp://localhost:5560\")")]
    parameter_url: String,

    /// disable parameter updates entirely
    #[argh(switch)]
    no_params: bool,

    /// disable the periodic stats line
    #[argh(switch)]
    no_stats: bool,
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
    if let Some(name) = args.detection_shm_name {
        config.channels.detection = name;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            log::error!("failed to register signal handler: {e}");
            return 1;
        }
    }

    let parameter_url = (!args.no_params).then_some(args.parameter_url.as_str());
    let mut server = match DetectionServer::new(&config, parameter_url) {
        Ok(server) => server,
        Err(e) => {
            log::error!("setup failed: {e:#}");
            return 1;
        }
    };
    server.set_print_stats(!args.no_stats);

    let code = match server.run(&shutdown) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("detection loop failed: {e:#}");
            1
        }
    };
    server.shutdown();
    code
}
