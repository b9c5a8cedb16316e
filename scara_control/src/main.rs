//! SCARA motion controller bootstrap binary (§6, §10.1).
//!
//! Grounded in `evo_hal::main`'s `clap::Parser` CLI, `ctrlc` signal wiring,
//! and `tracing_subscriber` setup, and in `original_source/src/main.cpp`'s
//! split between a one-time bring-up (config load, bus bring-up, RT setup)
//! and the cyclic loop proper. The façade/ingress side (command decode,
//! settings watch, status publish) runs on its own low-priority thread per
//! §5's concurrency model; the cyclic pipeline owns the main thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use scara_common::bus::{InProcessBus, InProcessKv};
use scara_common::config::MachineConfig;

use scara_control::cycle::{CyclicPipeline, Shared, SharedState};
use scara_control::drive_sim::{SimulatedBus, SimulatedPdo};
use scara_control::facade::{build_status, ingest_dynamics_settings, poll_command, publish_status};
use scara_control::fsm::MotionFsm;
use scara_control::motor::{Group, Motor};
use scara_control::trajectory::JerkLimitedOtg;

/// Ingress/egress cadence (§5: "the message-bus monitor ... at ~250 Hz").
const FACADE_PERIOD: Duration = Duration::from_millis(4);

#[derive(Parser, Debug)]
#[command(name = "scara_control", author = "RTS007", version, about = "SCARA motion controller")]
struct Args {
    /// Path to the machine/axis calibration TOML file (§10.3).
    #[arg(long, default_value = "/etc/scara/machine.toml")]
    config: PathBuf,

    /// Message-bus URL, overriding the config file's `bus_url` (§6).
    #[arg(long)]
    bus_url: Option<String>,

    /// EtherCAT network interface, overriding the config file's `iface` (§6).
    #[arg(long)]
    iface: Option<String>,

    /// Run against the in-process simulated bus/drives instead of real hardware.
    #[arg(long)]
    sim: bool,

    /// Enable the real-time scheduling path (mlockall, SCHED_FIFO, CPU affinity).
    #[arg(long)]
    rt: bool,

    #[arg(long)]
    verbose: bool,

    #[arg(long)]
    json: bool,
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("SCARA motion controller v{} starting...", env!("CARGO_PKG_VERSION"));

    if !args.sim {
        error!("no real EtherCAT master backend is wired up in this build; pass --sim");
        std::process::exit(1);
    }

    let config = match scara_common::config::load_config(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("config load failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args, config) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args, config: MachineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bus_url = args.bus_url.unwrap_or(config.bus_url.clone());
    let iface = args.iface.unwrap_or(config.iface.clone());
    info!("bus_url={bus_url} iface={iface} cycle_time_us={}", config.cycle_time_us);

    let motors: Vec<_> = config
        .axes
        .iter()
        .map(|axis| Motor::new(axis, SimulatedPdo::new()))
        .collect();
    let fsm = MotionFsm::new(
        Group::new(motors),
        JerkLimitedOtg::new(),
        config.kinematics.clone(),
        config.default_dynamics,
        0.0,
    );
    let shared: Shared<SimulatedPdo, JerkLimitedOtg> = Arc::new(Mutex::new(SharedState::new(fsm)));

    let abort = Arc::new(AtomicU8::new(0));
    {
        let abort = Arc::clone(&abort);
        ctrlc::set_handler(move || {
            let prior = abort.fetch_add(1, Ordering::SeqCst);
            if prior >= 1 {
                error!("second abort signal received, forcing exit");
                std::process::exit(255);
            }
        })?;
    }

    let pubsub = Arc::new(InProcessBus::new());
    let kv = Arc::new(InProcessKv::new());

    let facade_handle = {
        let shared = Arc::clone(&shared);
        let pubsub = Arc::clone(&pubsub);
        let kv = Arc::clone(&kv);
        let abort = Arc::clone(&abort);
        std::thread::spawn(move || facade_loop(shared, pubsub, kv, abort))
    };

    if args.rt {
        scara_control::cycle::rt_setup(config.rt.cpu_core, config.rt.rt_priority)
            .map_err(|e| format!("RT setup failed: {e}"))?;
    }

    let bus = SimulatedBus::new(scara_common::consts::NUM_AXES as u16);
    let mut pipeline = CyclicPipeline::new(bus, config.cycle_time_us as i64 * 1_000, thermal_path());
    pipeline.bring_up(&iface).map_err(|e| format!("bus bring-up failed: {e}"))?;

    let result = pipeline.run(&shared, &abort);

    facade_handle.join().ok();

    result.map_err(|e| e.into())
}

/// The low-priority ingress/egress thread: decode inbound commands, watch
/// the dynamics settings key, and publish a status snapshot, all at ~250 Hz
/// (§5). Exits once the cyclic pipeline has reached `Idle` with `shutdown`
/// set, so the final status snapshot reflects the halted controller.
fn facade_loop(shared: Shared<SimulatedPdo, JerkLimitedOtg>, pubsub: Arc<InProcessBus>, kv: Arc<InProcessKv>, _abort: Arc<AtomicU8>) {
    let mut last_seen_settings: Option<Vec<u8>> = None;
    loop {
        let shutdown_and_idle = {
            let mut guard = shared.lock().expect("shared state mutex poisoned");
            let SharedState { fsm, log, ethercat, cpu_temperature_millideg_c } = &mut *guard;

            while poll_command(pubsub.as_ref(), fsm, log) {}
            if let Some(seen) = ingest_dynamics_settings(kv.as_ref(), last_seen_settings.as_deref(), fsm, log) {
                last_seen_settings = Some(seen);
            }

            let snapshot = build_status(fsm, *ethercat, *cpu_temperature_millideg_c);
            publish_status(pubsub.as_ref(), &snapshot, log);

            fsm.shutdown && fsm.state() == scara_control::fsm::MotionState::Idle
        };

        if shutdown_and_idle {
            break;
        }
        std::thread::sleep(FACADE_PERIOD);
    }
}

fn thermal_path() -> PathBuf {
    PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
}
