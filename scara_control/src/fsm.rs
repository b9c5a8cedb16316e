//! Top-level Motion FSM (§4.7, C7).
//!
//! Orchestrates the per-axis CoE state machines (via [`Group`]), the
//! kinematics/OTG pipeline, and the homing/jogging sequences behind a single
//! state enum. Grounded in the reference `Robot::FSM::update`/`tracking`/
//! `jogging`/`homing` functions; `Path`/`Pathing` from the older header is
//! dropped per the design notes (§9) — a waypoint queue feeds `Tracking`
//! directly instead of a distinct state.

use std::collections::VecDeque;

use scara_common::bus::DrivePdo;
use scara_common::coe_fsm::{CoeCommand, CoeState};
use scara_common::config::{DynamicsPreset, KinematicsConfig};
use scara_common::consts::NUM_AXES;
use scara_common::event::EventLog;

use crate::kinematics::{
    forward_kinematics, inverse_kinematics, postprocessing, preprocessing, CartesianPose,
    JointPose, KinematicResult,
};
use crate::motor::Group;
use crate::trajectory::{AxisLimits, AxisState, Otg, OtgResult};

/// A conservative dynamics profile applied while jogging, independent of
/// whatever production preset is active (§4.7 "Reset dynamics").
const JOG_MAX_VELOCITY: f64 = 60.0;
const JOG_MAX_ACCELERATION: f64 = 5_000.0;
const JOG_MAX_JERK: f64 = 60_000.0;

/// Axis index convention shared by `tracking_step`/`jogging_step`: alpha,
/// beta, theta, phi — matching [`JointPose`]'s field order.
const AXIS_ALPHA: usize = 0;
const AXIS_BETA: usize = 1;
const AXIS_THETA: usize = 2;
const AXIS_PHI: usize = 3;

/// CiA 402 "Cyclic Synchronous Position" mode of operation code.
const CSP_MODE: i8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Reset,
    Resetting,
    Halt,
    Halting,
    Start,
    Starting,
    Home,
    Homing,
    Track,
    Tracking,
    Jog,
    Jogging,
}

impl MotionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Reset => "Reset",
            Self::Resetting => "Resetting",
            Self::Halt => "Halt",
            Self::Halting => "Halting",
            Self::Start => "Start",
            Self::Starting => "Starting",
            Self::Home => "Home",
            Self::Homing => "Homing",
            Self::Track => "Track",
            Self::Tracking => "Tracking",
            Self::Jog => "Jog",
            Self::Jogging => "Jogging",
        }
    }
}

fn joint_pose_from_states(states: &[AxisState; NUM_AXES]) -> JointPose {
    JointPose {
        alpha: states[AXIS_ALPHA].position,
        beta: states[AXIS_BETA].position,
        theta: states[AXIS_THETA].position,
        phi: states[AXIS_PHI].position,
    }
}

/// Orchestrates a [`Group`] of drives plus kinematics/OTG through the
/// top-level motion sequence. Generic over the drive PDO and the OTG
/// implementation so the same FSM code drives either the simulated or a
/// real backend (§9 "Polymorphism").
pub struct MotionFsm<P: DrivePdo, O: Otg> {
    pub run: bool,
    pub estop: bool,
    pub needs_homing: bool,
    pub reset: bool,
    pub jog: bool,
    pub target: CartesianPose,
    pub jog_target: JointPose,
    pub waypoints: VecDeque<CartesianPose>,
    pub shutdown: bool,

    state: MotionState,
    in_sync: bool,
    homing_axis: usize,
    kinematic_alarm: bool,
    otg_result: OtgResult,
    last_diag: Option<String>,
    runtime_duration: u64,
    power_on_duration: u64,

    group: Group<P>,
    otg: O,
    states: [AxisState; NUM_AXES],
    limits: [AxisLimits; NUM_AXES],
    previous_limits: Option<[AxisLimits; NUM_AXES]>,
    kinematics: KinematicsConfig,
    tool_offset: f64,
}

impl<P: DrivePdo, O: Otg> MotionFsm<P, O> {
    pub fn new(
        group: Group<P>,
        otg: O,
        kinematics: KinematicsConfig,
        default_dynamics: DynamicsPreset,
        tool_offset: f64,
    ) -> Self {
        let limits = [AxisLimits {
            max_velocity: default_dynamics.max_velocity,
            max_acceleration: default_dynamics.max_acceleration,
            max_jerk: default_dynamics.max_jerk,
        }; NUM_AXES];

        Self {
            run: false,
            estop: true,
            needs_homing: true,
            reset: false,
            jog: false,
            target: CartesianPose { x: 0.0, y: 150.0, z: 0.0, r: 0.0 },
            jog_target: JointPose { alpha: 0.0, beta: 0.0, theta: 0.0, phi: 0.0 },
            waypoints: VecDeque::new(),
            shutdown: false,

            state: MotionState::Idle,
            in_sync: false,
            homing_axis: 0,
            kinematic_alarm: false,
            otg_result: OtgResult::Finished,
            last_diag: None,
            runtime_duration: 0,
            power_on_duration: 0,

            group,
            otg,
            states: [AxisState::default(); NUM_AXES],
            limits,
            previous_limits: None,
            kinematics,
            tool_offset,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn kinematic_alarm(&self) -> bool {
        self.kinematic_alarm
    }

    pub fn otg_result(&self) -> OtgResult {
        self.otg_result
    }

    pub fn last_diag(&self) -> Option<&str> {
        self.last_diag.as_deref()
    }

    pub fn runtime_duration(&self) -> u64 {
        self.runtime_duration
    }

    pub fn power_on_duration(&self) -> u64 {
        self.power_on_duration
    }

    pub fn group(&self) -> &Group<P> {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut Group<P> {
        &mut self.group
    }

    pub fn limits(&self) -> &[AxisLimits; NUM_AXES] {
        &self.limits
    }

    /// `reset` command (§4.10): latch the reset request; if the FSM is not
    /// currently running, force it straight to `Idle` so the next cycle's
    /// `Idle` arm picks `reset` up immediately rather than waiting out
    /// whatever state it was otherwise sitting in.
    pub fn request_reset(&mut self) {
        self.reset = true;
        if !self.run {
            self.state = MotionState::Idle;
        }
    }

    /// `alarm = any(drive.fault) ∨ KinematicAlarm ∨ EtherCATFault ∨ !estop` (§4.10).
    pub fn alarm(&self, ethercat_fault: bool) -> bool {
        self.group.any_fault() || self.kinematic_alarm || ethercat_fault || !self.estop
    }

    /// Current tool pose, derived from the OTG's settled/in-flight joint state.
    pub fn pose(&self) -> CartesianPose {
        forward_kinematics(joint_pose_from_states(&self.states), self.tool_offset, &self.kinematics)
    }

    /// Apply a new dynamics preset (§4.10 settings ingest). Ignored while
    /// running — invariant 10: "if run=true, updateDynamics leaves
    /// input.max_* unchanged".
    pub fn update_dynamics(&mut self, preset: DynamicsPreset) {
        if self.run {
            return;
        }
        let applied = AxisLimits {
            max_velocity: preset.max_velocity,
            max_acceleration: preset.max_acceleration,
            max_jerk: preset.max_jerk,
        };
        for limit in &mut self.limits {
            *limit = applied;
        }
    }

    fn set_jogging_dynamics(&mut self) {
        self.previous_limits = Some(self.limits);
        let jog_limit = AxisLimits {
            max_velocity: JOG_MAX_VELOCITY,
            max_acceleration: JOG_MAX_ACCELERATION,
            max_jerk: JOG_MAX_JERK,
        };
        for limit in &mut self.limits {
            *limit = jog_limit;
        }
    }

    fn restore_dynamics(&mut self) {
        if let Some(previous) = self.previous_limits.take() {
            self.limits = previous;
        }
    }

    fn resync_if_needed(&mut self, log: &mut EventLog) {
        if self.in_sync {
            return;
        }
        for (state, motor) in self.states.iter_mut().zip(self.group.motors.iter()) {
            state.velocity = motor.velocity_deg_s();
            state.acceleration = 0.0;
        }
        self.states[AXIS_ALPHA].position = self.group.motors[AXIS_ALPHA].position_deg();
        self.states[AXIS_BETA].position = self.group.motors[AXIS_BETA].position_deg();
        self.states[AXIS_THETA].position = self.group.motors[AXIS_THETA].position_deg();
        self.states[AXIS_PHI].position = self.group.motors[AXIS_PHI].position_deg();
        self.otg.reset(&self.states);
        log.kinematic("Resync OTG to actual position", None);
        self.in_sync = true;
    }

    /// Returns `true` if the cycle must halt (drive fault or keep-out
    /// re-entry detected in postprocessing).
    fn tracking_step(&mut self, dt_s: f64, log: &mut EventLog) -> bool {
        self.resync_if_needed(log);

        let (clamped, pre_result) = preprocessing(self.target, &self.kinematics);
        let (joint, ik_result) = inverse_kinematics(clamped, self.tool_offset, &self.kinematics);
        if ik_result != KinematicResult::Singularity {
            self.states[AXIS_ALPHA].target_position = joint.alpha;
            self.states[AXIS_BETA].target_position = joint.beta;
            self.states[AXIS_THETA].target_position = joint.theta;
            self.states[AXIS_PHI].target_position = joint.phi;
        }
        self.kinematic_alarm = !pre_result.is_success() || !ik_result.is_success();

        let (new_states, otg_result) = self.otg.update(&self.states, dt_s, &self.limits);
        self.otg_result = otg_result;

        let candidate = joint_pose_from_states(&new_states);
        if postprocessing(candidate, self.tool_offset, &self.kinematics) == KinematicResult::ForwardKinematic {
            log.error("Predicted tool position re-entered keep-out, stopping");
            self.run = false;
            return true;
        }

        if self.drive_new_positions(&new_states, log) {
            return true;
        }

        if self.otg_result == OtgResult::Finished && !self.waypoints.is_empty() {
            self.target = self.waypoints.pop_front().expect("checked non-empty");
        }

        false
    }

    fn jogging_step(&mut self, dt_s: f64, log: &mut EventLog) -> bool {
        self.resync_if_needed(log);

        self.states[AXIS_ALPHA].target_position = self.jog_target.alpha;
        self.states[AXIS_BETA].target_position = self.jog_target.beta;
        self.states[AXIS_THETA].target_position = self.jog_target.theta;
        self.states[AXIS_PHI].target_position = self.jog_target.phi;

        let (new_states, otg_result) = self.otg.update(&self.states, dt_s, &self.limits);
        self.otg_result = otg_result;

        self.drive_new_positions(&new_states, log)
    }

    fn drive_new_positions(&mut self, new_states: &[AxisState; NUM_AXES], log: &mut EventLog) -> bool {
        let mut faulted = false;
        for (motor, state) in self.group.motors.iter_mut().zip(new_states.iter()) {
            if motor.move_to(state.position) {
                faulted = true;
            }
        }
        if faulted {
            for motor in &self.group.motors {
                if motor.fault() {
                    let msg = format!(
                        "Drive {} fault: {}",
                        motor.axis_id,
                        motor.last_fault().unwrap_or("unknown")
                    );
                    log.error(msg.clone());
                    self.last_diag = Some(msg);
                }
            }
            self.run = false;
            self.jog = false;
            return true;
        }
        self.states = *new_states;
        false
    }

    fn homing_step(&mut self) -> bool {
        let axes = self.group.motors.len();
        if self.homing_axis >= axes {
            self.homing_axis = 0;
            return true;
        }
        let motor = &mut self.group.motors[self.homing_axis];
        motor.request(CoeCommand::Home);
        if matches!(motor.coe().state(), CoeState::HomingComplete) {
            self.homing_axis += 1;
        }
        self.homing_axis >= axes
    }

    /// Advance one cycle. `dt_s` is the cycle period in seconds, used by the
    /// OTG while Tracking/Jogging. `ethercat_fault` is the bus supervisor's
    /// current verdict (§4.9), polled here rather than owned by the FSM.
    pub fn update(&mut self, dt_s: f64, ethercat_fault: bool, log: &mut EventLog) {
        self.group.update();

        let fault_asserted = self.group.emergency_stop() || ethercat_fault;
        if fault_asserted && self.estop {
            log.critical("Emergency Stop");
            self.estop = false;
            self.run = false;
            self.reset = false;
        } else if !fault_asserted && !self.estop {
            self.estop = true;
            log.info("Emergency Stop reset");
        }

        self.runtime_duration += 1;
        if matches!(self.state, MotionState::Tracking | MotionState::Jogging) {
            self.power_on_duration += 1;
        }

        match self.state {
            MotionState::Idle => {
                if !self.estop {
                    self.needs_homing = true;
                    self.state = MotionState::Halt;
                } else if self.reset || self.run {
                    self.reset = false;
                    self.needs_homing = true;
                    log.info("Entering run mode");
                    self.state = MotionState::Reset;
                }
            }
            MotionState::Reset => {
                self.group.fault_reset_all();
                self.state = MotionState::Resetting;
            }
            MotionState::Resetting => {
                let mut pending = false;
                for motor in &self.group.motors {
                    if motor.error_code() != 0 {
                        log.warning(format!(
                            "Drive {} has pending error code {:#06x}",
                            motor.axis_id,
                            motor.error_code()
                        ));
                        pending = true;
                    }
                }
                if !pending {
                    log.info("Fault reset complete");
                    self.state = if self.run { MotionState::Start } else { MotionState::Idle };
                }
            }
            MotionState::Halt => {
                self.group.request_all(CoeCommand::Disable);
                self.state = MotionState::Halting;
            }
            MotionState::Halting => {
                if self.group.all_off() {
                    self.state = MotionState::Idle;
                }
            }
            MotionState::Start => {
                self.group.request_all(CoeCommand::Enable);
                self.state = MotionState::Starting;
            }
            MotionState::Starting => {
                if self.group.all_on() {
                    if self.jog {
                        log.info("Entered ON state, enter jogging");
                        self.state = MotionState::Jog;
                    } else if self.needs_homing {
                        log.info("Entered ON state, enter homing");
                        self.state = MotionState::Home;
                    } else {
                        log.info("Entered ON state, enter tracking");
                        self.state = MotionState::Track;
                    }
                }
                if !self.estop || !self.run {
                    self.state = MotionState::Halt;
                }
            }
            MotionState::Home => {
                self.homing_axis = 0;
                self.state = MotionState::Homing;
            }
            MotionState::Homing => {
                if self.homing_step() {
                    log.info("Homing complete");
                    self.needs_homing = false;
                    self.run = false;
                    self.state = MotionState::Halt;
                }
                if !self.estop || !self.run {
                    self.state = MotionState::Halt;
                }
            }
            MotionState::Track => {
                for motor in &mut self.group.motors {
                    motor.set_mode_of_operation(CSP_MODE);
                }
                self.in_sync = false;
                self.state = MotionState::Tracking;
            }
            MotionState::Tracking => {
                let stop = self.tracking_step(dt_s, log);
                if !self.estop || !self.run || stop {
                    log.info(format!(
                        "Tracking interrupted EStop: {} Run: {} Tracking: {}",
                        self.estop, self.run, stop
                    ));
                    self.in_sync = false;
                    self.state = MotionState::Halt;
                }
            }
            MotionState::Jog => {
                for motor in &mut self.group.motors {
                    motor.set_mode_of_operation(CSP_MODE);
                }
                self.set_jogging_dynamics();
                self.in_sync = false;
                self.state = MotionState::Jogging;
            }
            MotionState::Jogging => {
                let stop = self.jogging_step(dt_s, log);
                if !self.estop || !self.run || stop {
                    self.restore_dynamics();
                    self.in_sync = false;
                    self.state = MotionState::Halt;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scara_common::config::AxisConfig;
    use scara_common::ds402::{ControlWord, StatusWord};
    use crate::motor::Motor;

    struct InertPdo {
        status: StatusWord,
        control: ControlWord,
        actual_position: f64,
        target_position: f64,
    }

    impl InertPdo {
        fn new() -> Self {
            Self {
                status: StatusWord::OFF_STATE,
                control: ControlWord::empty(),
                actual_position: 0.0,
                target_position: 0.0,
            }
        }
    }

    impl DrivePdo for InertPdo {
        fn status_word(&self) -> StatusWord {
            self.status
        }
        fn set_control_word(&mut self, word: ControlWord) {
            self.control = word;
            self.status = match word {
                ControlWord::FAULT_RESET => StatusWord::READY_TO_SWITCH_ON_STATE,
                ControlWord::SWITCH_ON_OR_DISABLE_OPERATION | ControlWord::ENABLE_OPERATION_CMD => {
                    StatusWord::ON_STATE
                }
                ControlWord::SET_ABS_POINT_NOBLEND => StatusWord::HOMING_COMPLETE_STATE,
                _ => StatusWord::OFF_STATE,
            };
        }
        fn actual_position(&self) -> f64 {
            self.actual_position
        }
        fn actual_velocity(&self) -> f64 {
            0.0
        }
        fn actual_torque_percent(&self) -> f64 {
            0.0
        }
        fn following_error(&self) -> f64 {
            0.0
        }
        fn error_code(&self) -> u16 {
            0
        }
        fn emergency_stop(&self) -> bool {
            false
        }
        fn set_target_position(&mut self, raw_units: f64) {
            self.actual_position = raw_units;
            self.target_position = raw_units;
        }
        fn set_mode_of_operation(&mut self, _mode: i8) -> i32 {
            1
        }
        fn set_homing_mode(&mut self, _mode: i16) -> i32 {
            1
        }
        fn set_homing_offset(&mut self, _offset: i32) -> i32 {
            1
        }
        fn set_torque_limit(&mut self, _percent: f64) -> i32 {
            1
        }
        fn set_following_window(&mut self, _window: i32) -> i32 {
            1
        }
        fn fault_reset(&mut self) -> i32 {
            1
        }
    }

    /// Test double that snaps straight to target every tick, so FSM
    /// transition tests don't depend on OTG convergence timing.
    #[derive(Default)]
    struct InstantOtg {
        states: [AxisState; NUM_AXES],
    }

    impl Otg for InstantOtg {
        fn reset(&mut self, states: &[AxisState; NUM_AXES]) {
            self.states = *states;
        }
        fn update(
            &mut self,
            input: &[AxisState; NUM_AXES],
            _dt_s: f64,
            _limits: &[AxisLimits; NUM_AXES],
        ) -> ([AxisState; NUM_AXES], OtgResult) {
            for (state, inp) in self.states.iter_mut().zip(input.iter()) {
                state.target_position = inp.target_position;
                state.position = inp.target_position;
                state.velocity = 0.0;
                state.acceleration = 0.0;
            }
            (self.states, OtgResult::Finished)
        }
    }

    fn axis_config(id: u8) -> AxisConfig {
        AxisConfig {
            axis_id: id,
            position_ratio: 1.0,
            velocity_ratio: 1.0,
            soft_min_deg: -360.0,
            soft_max_deg: 360.0,
            torque_threshold_percent: 95.0,
            torque_limit_percent: 50.0,
            homing_offset: 0,
            homing_mode: 35,
        }
    }

    fn fsm() -> MotionFsm<InertPdo, InstantOtg> {
        let motors = (1..=NUM_AXES as u8)
            .map(|id| Motor::new(&axis_config(id), InertPdo::new()))
            .collect();
        MotionFsm::new(
            Group::new(motors),
            InstantOtg::default(),
            KinematicsConfig::default(),
            DynamicsPreset::default(),
            0.0,
        )
    }

    #[test]
    fn starts_idle() {
        let f = fsm();
        assert_eq!(f.state(), MotionState::Idle);
    }

    #[test]
    fn cold_start_reaches_halt_after_homing() {
        let mut f = fsm();
        let mut log = EventLog::new();
        f.run = true;

        // Idle -> Reset -> Resetting -> Start -> Starting -> Home -> Homing
        // (NUM_AXES homing steps) -> Halt.
        for _ in 0..(30 + NUM_AXES * 10) {
            std::thread::sleep(std::time::Duration::from_millis(3));
            f.update(0.002, false, &mut log);
            if f.state() == MotionState::Halt || f.state() == MotionState::Halting {
                break;
            }
        }
        assert!(matches!(f.state(), MotionState::Halt | MotionState::Halting));
        assert!(!f.needs_homing);
        assert!(!f.run);
    }

    #[test]
    fn estop_false_from_idle_drives_to_halting_then_idle() {
        let mut f = fsm();
        let mut log = EventLog::new();
        // Asserting the bus fault clears `estop` the same cycle, so Idle's
        // `!estop` branch fires immediately.
        f.update(0.002, true, &mut log);
        assert_eq!(f.state(), MotionState::Halt);
        f.update(0.002, true, &mut log);
        assert_eq!(f.state(), MotionState::Halting);
        f.update(0.002, true, &mut log);
        assert_eq!(f.state(), MotionState::Idle);
    }

    #[test]
    fn group_emergency_stop_clears_run_and_reset() {
        let mut f = fsm();
        let mut log = EventLog::new();
        f.run = true;
        f.update(0.002, true, &mut log);
        assert!(!f.estop);
        assert!(!f.run);
    }

    #[test]
    fn estop_reset_requires_a_later_clear_cycle() {
        let mut f = fsm();
        let mut log = EventLog::new();
        f.update(0.002, true, &mut log);
        assert!(!f.estop);
        f.update(0.002, false, &mut log);
        assert!(f.estop);
    }

    #[test]
    fn update_dynamics_ignored_while_running() {
        let mut f = fsm();
        f.run = true;
        let before = f.limits;
        f.update_dynamics(DynamicsPreset {
            max_velocity: 1.0,
            max_acceleration: 1.0,
            max_jerk: 1.0,
        });
        assert_eq!(f.limits[0].max_velocity, before[0].max_velocity);
    }

    #[test]
    fn update_dynamics_applies_while_stopped() {
        let mut f = fsm();
        f.update_dynamics(DynamicsPreset {
            max_velocity: 42.0,
            max_acceleration: 1234.0,
            max_jerk: 5678.0,
        });
        assert_eq!(f.limits[0].max_velocity, 42.0);
    }

    #[test]
    fn jog_preset_is_restored_after_jogging() {
        let mut f = fsm();
        let original = f.limits[0].max_velocity;
        f.set_jogging_dynamics();
        assert_eq!(f.limits[0].max_velocity, JOG_MAX_VELOCITY);
        f.restore_dynamics();
        assert_eq!(f.limits[0].max_velocity, original);
    }

    #[test]
    fn homing_sequence_visits_every_axis_in_order() {
        let mut f = fsm();
        let mut log = EventLog::new();
        f.run = true;

        // `homing_axis` should climb 0, 1, ..., NUM_AXES exactly once each,
        // the last value marking the sequence's completion.
        let mut axis_history = vec![f.homing_axis];
        for _ in 0..(30 + NUM_AXES * 10) {
            std::thread::sleep(std::time::Duration::from_millis(3));
            f.update(0.002, false, &mut log);
            if f.homing_axis != *axis_history.last().unwrap() {
                axis_history.push(f.homing_axis);
            }
            if f.state() == MotionState::Halt || f.state() == MotionState::Halting {
                break;
            }
        }
        assert!(!f.needs_homing);
        assert_eq!(axis_history, (0..=NUM_AXES).collect::<Vec<_>>());
    }
}
