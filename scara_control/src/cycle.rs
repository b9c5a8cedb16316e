//! Fixed-period cyclic pipeline (§4.11, C11): the single thread that owns the
//! bus PDO exchange, the DC clock discipline, and the FSM tick.
//!
//! Grounded in `original_source/src/main.cpp`'s main loop (`ec_send_processdata`
//! / `ec_receive_processdata` / `fsm.update()` / `TS::DCSync` / `ApplyOffset` /
//! `clock_nanosleep` / `Increment`) and in `evo_control_unit::cycle`'s split
//! between RT setup (`rt_mlockall`/`rt_set_affinity`/`rt_set_scheduler`,
//! feature-gated) and the loop body itself. The bus and thermal supervisors
//! (§4.9) run inline on this same thread at their prescribed reduced cadence
//! rather than on separate threads, since the `Bus` trait is only exchanged
//! here — see `DESIGN.md` for that call.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use scara_common::bus::{Bus, DrivePdo};
use scara_common::consts::{
    BUS_SUPERVISOR_CYCLE_MULTIPLE, HALT_TIMEOUT, NSEC_PER_SEC, THERMAL_SHUTDOWN_MILLIDEG_C, THERMAL_SUPERVISOR_PERIOD,
};
use scara_common::event::EventLog;

use crate::dc_sync::{DcSync, Tick};
use crate::facade::{EtherCatBusState, EtherCatStatus};
use crate::fsm::{MotionFsm, MotionState};
use crate::supervisors::{BusSupervisor, ThermalSupervisor};
use crate::trajectory::Otg;

/// Everything the cyclic thread and the façade/ingress thread both touch,
/// behind one mutex taken only for the duration of one command decode or one
/// status snapshot (§5 "Concurrency & Resource Model").
pub struct SharedState<P: DrivePdo, O: Otg> {
    pub fsm: MotionFsm<P, O>,
    pub log: EventLog,
    pub ethercat: EtherCatStatus,
    pub cpu_temperature_millideg_c: Option<i64>,
}

impl<P: DrivePdo, O: Otg> SharedState<P, O> {
    pub fn new(fsm: MotionFsm<P, O>) -> Self {
        Self {
            fsm,
            log: EventLog::new(),
            ethercat: EtherCatStatus::default(),
            cpu_temperature_millideg_c: None,
        }
    }
}

pub type Shared<P, O> = Arc<Mutex<SharedState<P, O>>>;

#[derive(Debug)]
pub enum CycleError {
    RtSetup(String),
    BusBringUp(String),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::RtSetup(msg) => write!(f, "RT setup failed: {msg}"),
            CycleError::BusBringUp(msg) => write!(f, "bus bring-up failed: {msg}"),
        }
    }
}

impl std::error::Error for CycleError {}

/// Lock all current and future pages into RAM, preventing page faults from
/// stalling the cyclic thread.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{mlockall, MlockallFlags};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Pin the calling thread to a single isolated CPU core (§5).
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu_core: usize) -> Result<(), CycleError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(cpu_core).map_err(|e| CycleError::RtSetup(format!("CpuSet::set: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &set).map_err(|e| CycleError::RtSetup(format!("sched_setaffinity: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu_core: usize) -> Result<(), CycleError> {
    Ok(())
}

/// Switch the calling thread to `SCHED_FIFO` at the given priority (§5,
/// priority `<= 49` per the concurrency model).
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param { sched_priority: priority };
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Touch a megabyte of stack up front so the first real cycle doesn't take a
/// page fault growing it. Not feature-gated: harmless and cheap in
/// simulation too.
fn prefault_stack() {
    const STACK_SIZE: usize = 1024 * 1024;
    let mut buf = [0u8; STACK_SIZE];
    for b in buf.iter_mut() {
        unsafe { std::ptr::write_volatile(b, 0xaa) };
    }
    std::hint::black_box(&buf);
}

/// Run the full RT setup sequence for the cyclic thread.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    prefault_stack();
    Ok(())
}

#[cfg(feature = "rt")]
fn sleep_until(tick: Tick) {
    let _ = nix::time::clock_nanosleep(
        nix::time::ClockId::CLOCK_MONOTONIC,
        nix::time::ClockNanosleepFlags::TIMER_ABSTIME,
        &tick.to_timespec(),
    );
}

#[cfg(not(feature = "rt"))]
fn sleep_until(tick: Tick) {
    let now = Tick::now();
    let now_ns = now.sec * NSEC_PER_SEC + now.nsec;
    let target_ns = tick.sec * NSEC_PER_SEC + tick.nsec;
    if target_ns > now_ns {
        std::thread::sleep(std::time::Duration::from_nanos((target_ns - now_ns) as u64));
    }
}

/// The cyclic pipeline itself: owns the bus and the timing state that must
/// not cross the shared-state mutex (§4.11, §4.9).
pub struct CyclicPipeline<B: Bus> {
    bus: B,
    cycle_time_ns: i64,
    expected_wkc: i32,
    slave_count: u16,
    dc: DcSync,
    tick: Tick,
    bus_supervisor: BusSupervisor,
    thermal_supervisor: ThermalSupervisor,
    thermal_path: std::path::PathBuf,
    thermal_period_cycles: u64,
    ethercat_fault: bool,
    cycle_count: u64,
    halt_started: Option<Instant>,
}

impl<B: Bus> CyclicPipeline<B> {
    pub fn new(bus: B, cycle_time_ns: i64, thermal_path: std::path::PathBuf) -> Self {
        let thermal_period_cycles =
            ((THERMAL_SUPERVISOR_PERIOD.as_nanos() as i64) / cycle_time_ns).max(1) as u64;
        Self {
            bus,
            cycle_time_ns,
            expected_wkc: 0,
            slave_count: 0,
            dc: DcSync::new(),
            tick: Tick::now(),
            bus_supervisor: BusSupervisor::new(0, 0),
            thermal_supervisor: ThermalSupervisor::new(THERMAL_SHUTDOWN_MILLIDEG_C),
            thermal_path,
            thermal_period_cycles,
            ethercat_fault: false,
            cycle_count: 0,
            halt_started: None,
        }
    }

    /// Bring the bus up and arm DC sync0 on every slave (§4.2, §4.1).
    pub fn bring_up(&mut self, iface: &str) -> Result<(), CycleError> {
        let info = self
            .bus
            .bring_up(iface)
            .map_err(|e| CycleError::BusBringUp(e.to_string()))?;
        self.slave_count = info.slave_count;
        self.expected_wkc = info.expected_wkc;
        self.bus_supervisor = BusSupervisor::new(self.expected_wkc, self.slave_count);
        if info.dc_capable {
            for slave in 1..=self.slave_count {
                self.bus.set_dc_sync0(slave, true, self.cycle_time_ns as u32, 0);
            }
        }
        self.tick = Tick::now();
        Ok(())
    }

    /// Run the cyclic loop until a shutdown is both requested and either the
    /// FSM has reached `Idle` or the forced-halt grace period has elapsed
    /// (§4.11, §8 scenario F). `abort` is incremented by the process's
    /// signal handler; any nonzero value is treated as an abort request.
    pub fn run<P: DrivePdo, O: Otg>(&mut self, shared: &Shared<P, O>, abort: &AtomicU8) -> Result<(), CycleError> {
        loop {
            self.bus.send_process();
            let wkc = self.bus.receive_process();
            let dc_reftime = self.bus.dc_reference_time_ns();
            let toff = self.dc.step(dc_reftime, self.cycle_time_ns);

            let (shutdown, reached_idle) = {
                let mut guard = shared.lock().expect("shared state mutex poisoned");
                let SharedState { fsm, log, ethercat, cpu_temperature_millideg_c } = &mut *guard;

                if fsm.estop && wkc < self.expected_wkc {
                    log.critical(format!("WKC {wkc} below expected {}, clearing estop", self.expected_wkc));
                    fsm.estop = false;
                }

                if abort.load(Ordering::SeqCst) > 0 && self.halt_started.is_none() {
                    fsm.estop = false;
                    fsm.shutdown = true;
                    self.halt_started = Some(Instant::now());
                    log.critical("Abort requested, halting");
                }

                let dt_s = self.cycle_time_ns as f64 / NSEC_PER_SEC as f64;
                fsm.update(dt_s, self.ethercat_fault, log);

                self.cycle_count += 1;
                if self.cycle_count % BUS_SUPERVISOR_CYCLE_MULTIPLE as u64 == 0 {
                    self.ethercat_fault = self.bus_supervisor.poll(&mut self.bus, wkc, log);
                }
                if self.cycle_count % self.thermal_period_cycles == 0 {
                    if let Some(temp) = ThermalSupervisor::read_temperature(&self.thermal_path) {
                        *cpu_temperature_millideg_c = Some(temp);
                        if self.thermal_supervisor.evaluate(temp, log) {
                            fsm.shutdown = true;
                        }
                    }
                }

                *ethercat = EtherCatStatus {
                    interval_ns: self.cycle_time_ns,
                    sync0_ns: dc_reftime,
                    compensation_ns: toff,
                    integral: self.dc.integral(),
                    state: if self.ethercat_fault {
                        EtherCatBusState::Degraded
                    } else {
                        EtherCatBusState::Operational
                    },
                };

                (fsm.shutdown, fsm.state() == MotionState::Idle)
            };

            let timed_out = self.halt_started.map(|t| t.elapsed() > HALT_TIMEOUT).unwrap_or(false);
            if shutdown && (reached_idle || timed_out) {
                return Ok(());
            }

            self.tick = self.tick.apply_offset(toff);
            sleep_until(self.tick);
            self.tick = self.tick.increment(self.cycle_time_ns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_sim::{SimulatedBus, SimulatedPdo};
    use crate::fsm::MotionFsm;
    use crate::motor::{Group, Motor};
    use crate::trajectory::JerkLimitedOtg;
    use scara_common::config::{AxisConfig, DynamicsPreset, KinematicsConfig};

    fn axis_config(axis_id: u8) -> AxisConfig {
        AxisConfig {
            axis_id,
            position_ratio: 1000.0,
            velocity_ratio: 1000.0,
            soft_min_deg: -200.0,
            soft_max_deg: 200.0,
            torque_threshold_percent: 90.0,
            torque_limit_percent: 100.0,
            homing_offset: 0,
            homing_mode: 35,
        }
    }

    fn test_fsm() -> MotionFsm<SimulatedPdo, JerkLimitedOtg> {
        let motors: Vec<_> = (1..=scara_common::consts::NUM_AXES as u8)
            .map(|id| Motor::new(&axis_config(id), SimulatedPdo::new()))
            .collect();
        MotionFsm::new(
            Group::new(motors),
            JerkLimitedOtg::new(),
            KinematicsConfig::default(),
            DynamicsPreset::default(),
            0.0,
        )
    }

    #[test]
    fn pipeline_brings_up_simulated_bus_and_runs_until_shutdown_idle() {
        let bus = SimulatedBus::new(scara_common::consts::NUM_AXES as u16);
        let mut pipeline = CyclicPipeline::new(bus, 2_000_000, std::path::PathBuf::from("/nonexistent"));
        pipeline.bring_up("lo").expect("simulated bus bring-up never fails");

        let shared: Shared<SimulatedPdo, JerkLimitedOtg> = Arc::new(Mutex::new(SharedState::new(test_fsm())));
        {
            let mut guard = shared.lock().unwrap();
            guard.fsm.shutdown = true;
        }
        let abort = AtomicU8::new(0);
        let result = pipeline.run(&shared, &abort);
        assert!(result.is_ok());
        let guard = shared.lock().unwrap();
        assert_eq!(guard.fsm.state(), MotionState::Idle);
    }

    #[test]
    fn abort_signal_forces_shutdown_and_halts() {
        let bus = SimulatedBus::new(scara_common::consts::NUM_AXES as u16);
        let mut pipeline = CyclicPipeline::new(bus, 2_000_000, std::path::PathBuf::from("/nonexistent"));
        pipeline.bring_up("lo").expect("simulated bus bring-up never fails");

        let shared: Shared<SimulatedPdo, JerkLimitedOtg> = Arc::new(Mutex::new(SharedState::new(test_fsm())));
        let abort = AtomicU8::new(1);
        let result = pipeline.run(&shared, &abort);
        assert!(result.is_ok());
        let guard = shared.lock().unwrap();
        assert!(guard.fsm.shutdown);
    }
}
