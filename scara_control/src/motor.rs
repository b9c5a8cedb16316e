//! Cooked PDO view, soft-limit/torque/follow guards, and drive-group fan-out
//! (§4.4).
//!
//! Grounded in the reference `Drive::Motor::update`/`move`: every cycle the
//! target position is first clamped to the current actual position so CSP
//! activation never commands a jump, and `move` itself enforces the 300°
//! single-step delta cap, the configured soft limits, and a moving-average
//! torque guard before ever touching the output PDO.

use heapless::Deque;

use scara_common::coe_fsm::{CoeCommand, CoeFsm, CoeState};
use scara_common::config::AxisConfig;
use scara_common::consts::{MAX_MOVE_DELTA_DEG, TORQUE_HISTORY_LEN};
use scara_common::bus::DrivePdo;

/// A single servo axis: identity, calibration, soft-limit envelope, torque
/// history, fault latch, and its embedded CoE FSM.
pub struct Motor<P: DrivePdo> {
    pub axis_id: u8,
    pdo: P,
    position_ratio: f64,
    velocity_ratio: f64,
    soft_min_deg: f64,
    soft_max_deg: f64,
    torque_threshold_percent: f64,
    torque_history: Deque<f64, TORQUE_HISTORY_LEN>,
    fault: bool,
    last_fault: Option<String>,
    coe: CoeFsm,
}

impl<P: DrivePdo> Motor<P> {
    pub fn new(config: &AxisConfig, pdo: P) -> Self {
        Self {
            axis_id: config.axis_id,
            pdo,
            position_ratio: config.position_ratio,
            velocity_ratio: config.velocity_ratio,
            soft_min_deg: config.soft_min_deg,
            soft_max_deg: config.soft_max_deg,
            torque_threshold_percent: config.torque_threshold_percent,
            torque_history: Deque::new(),
            fault: false,
            last_fault: None,
            coe: CoeFsm::new(),
        }
    }

    pub fn coe(&self) -> &CoeFsm {
        &self.coe
    }

    pub fn request(&mut self, command: CoeCommand) {
        self.coe.request(command);
    }

    pub fn fault(&self) -> bool {
        self.fault
    }

    pub fn last_fault(&self) -> Option<&str> {
        self.last_fault.as_deref()
    }

    pub fn position_deg(&self) -> f64 {
        self.pdo.actual_position() / self.position_ratio
    }

    pub fn velocity_deg_s(&self) -> f64 {
        self.pdo.actual_velocity() / self.velocity_ratio
    }

    pub fn torque_percent(&self) -> f64 {
        self.pdo.actual_torque_percent()
    }

    pub fn following_error_deg(&self) -> f64 {
        self.pdo.following_error() / self.position_ratio
    }

    pub fn error_code(&self) -> u16 {
        self.pdo.error_code()
    }

    pub fn emergency_stop(&self) -> bool {
        self.pdo.emergency_stop()
    }

    pub fn status_word(&self) -> scara_common::ds402::StatusWord {
        self.pdo.status_word()
    }

    /// Advance the CoE FSM, mirror its control word back to the PDO, and
    /// clamp the target to the current actual position every cycle so
    /// nothing can command a large jump the instant the drive reports ON.
    /// Also latches `fault`/`last_fault` exactly once on entry to FAULT or a
    /// non-zero DS402 error code.
    pub fn update(&mut self) {
        let status = self.pdo.status_word();
        let control = self.coe.update(status);
        self.pdo.set_control_word(control);

        let error_code = self.pdo.error_code();
        let entering_fault = status.contains(scara_common::ds402::StatusWord::FAULT) || error_code != 0;
        if entering_fault && !self.fault {
            self.fault = true;
            self.coe.force_fault();
            self.last_fault = Some(format!("DS402 fault, error code {error_code:#06x}"));
        }

        self.pdo.set_target_position(self.pdo.actual_position());
    }

    /// Command a new absolute joint target in degrees. Returns `true` iff
    /// the motor is now (or was already) faulted, in which case the caller
    /// must halt.
    pub fn move_to(&mut self, target_deg: f64) -> bool {
        if self.fault {
            return true;
        }

        let current_deg = self.position_deg();
        if (target_deg - current_deg).abs() > MAX_MOVE_DELTA_DEG {
            self.fault = true;
            self.last_fault = Some(format!(
                "Move delta exceeded {MAX_MOVE_DELTA_DEG}: target {target_deg}, current {current_deg}"
            ));
            return true;
        }

        if target_deg < self.soft_min_deg || target_deg > self.soft_max_deg {
            self.fault = true;
            self.last_fault = Some(format!(
                "Target {target_deg} outside soft limits [{}, {}]",
                self.soft_min_deg, self.soft_max_deg
            ));
            return true;
        }

        if self.torque_history.is_full() {
            self.torque_history.pop_front();
        }
        let _ = self.torque_history.push_back(self.pdo.actual_torque_percent());
        let average: f64 = self.torque_history.iter().sum::<f64>() / self.torque_history.len() as f64;
        if average > self.torque_threshold_percent {
            self.fault = true;
            self.last_fault = Some(format!("Torque threshold exceeded: {average:.0}%"));
            return true;
        }

        self.pdo.set_target_position(target_deg * self.position_ratio);
        false
    }

    pub fn set_mode_of_operation(&mut self, mode: i8) -> i32 {
        self.pdo.set_mode_of_operation(mode)
    }

    pub fn set_homing_mode(&mut self, mode: i16) -> i32 {
        self.pdo.set_homing_mode(mode)
    }

    pub fn set_homing_offset(&mut self, offset: i32) -> i32 {
        self.pdo.set_homing_offset(offset)
    }

    pub fn set_torque_limit(&mut self, percent: f64) -> i32 {
        self.pdo.set_torque_limit(percent)
    }

    pub fn set_torque_threshold(&mut self, percent: f64) {
        self.torque_threshold_percent = percent;
    }

    pub fn set_following_window(&mut self, window_deg: f64) -> i32 {
        self.pdo.set_following_window((window_deg * self.position_ratio) as i32)
    }

    pub fn fault_reset(&mut self) -> i32 {
        self.fault = false;
        self.last_fault = None;
        self.torque_history.clear();
        self.coe.request(CoeCommand::Enable);
        self.pdo.fault_reset()
    }

    pub fn is_on(&self) -> bool {
        matches!(self.coe.state(), CoeState::On | CoeState::HomingComplete)
    }

    pub fn is_off(&self) -> bool {
        matches!(self.coe.state(), CoeState::Off)
    }
}

/// Ordered sequence of drives, fanning operations out across all axes and
/// summing working-counter-style return codes.
pub struct Group<P: DrivePdo> {
    pub motors: Vec<Motor<P>>,
}

impl<P: DrivePdo> Group<P> {
    pub fn new(motors: Vec<Motor<P>>) -> Self {
        Self { motors }
    }

    pub fn update(&mut self) {
        for motor in &mut self.motors {
            motor.update();
        }
    }

    pub fn emergency_stop(&self) -> bool {
        self.motors.iter().any(|m| m.emergency_stop())
    }

    pub fn any_fault(&self) -> bool {
        self.motors.iter().any(|m| m.fault())
    }

    pub fn all_on(&self) -> bool {
        self.motors.iter().all(|m| m.is_on())
    }

    pub fn all_off(&self) -> bool {
        self.motors.iter().all(|m| m.is_off())
    }

    pub fn request_all(&mut self, command: CoeCommand) {
        for motor in &mut self.motors {
            motor.request(command);
        }
    }

    pub fn set_torque_limit(&mut self, percent: f64) -> i32 {
        self.motors.iter_mut().map(|m| m.set_torque_limit(percent)).sum()
    }

    pub fn set_torque_threshold(&mut self, percent: f64) {
        for motor in &mut self.motors {
            motor.set_torque_threshold(percent);
        }
    }

    pub fn set_following_window(&mut self, window_deg: f64) -> i32 {
        self.motors
            .iter_mut()
            .map(|m| m.set_following_window(window_deg))
            .sum()
    }

    pub fn fault_reset_all(&mut self) -> i32 {
        self.motors.iter_mut().map(|m| m.fault_reset()).sum()
    }
}
