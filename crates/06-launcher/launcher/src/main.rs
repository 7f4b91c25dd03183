use argh::FromArgs;
use launcher::{Launcher, LauncherOptions};
use messages::Config;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Pipeline launcher: starts the decision and detection servers, merges
/// their logs, optionally hosts the ZMQ broker with viewer broadcasting,
/// and shuts the pipeline down cleanly on SIGINT/SIGTERM.
#[derive(FromArgs)]
struct Args {
    /// path to the configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// path to the decision-server executable
    #[argh(option)]
    decision_bin: Option<PathBuf>,

    /// path to the detection-server executable
    #[argh(option)]
    detection_bin: Option<PathBuf>,

    /// host the broker and broadcast frames/detections to viewers
    #[argh(switch)]
    broadcast: bool,

    /// pass --no-stats to the servers
    #[argh(switch)]
    no_stats: bool,
}

fn main() {
    env_logger::init();
    std::process::exit(run(argh::from_env()));
}

fn run(args: Args) -> i32 {
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return 1;
        }
    };

    let mut options = match LauncherOptions::sibling_binaries(config, args.config.clone()) {
        Ok(options) => options,
        Err(e) => {
            log::error!("cannot locate server binaries: {e:#}");
            return 1;
        }
    };
    if let Some(path) = args.decision_bin {
        options.decision_bin = path;
    }
    if let Some(path) = args.detection_bin {
        options.detection_bin = path;
    }
    options.broadcast = args.broadcast;
    options.no_stats = args.no_stats;

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            log::error!("failed to register signal handler: {e}");
            return 1;
        }
    }

    Launcher::new(options).run(&shutdown)
}
