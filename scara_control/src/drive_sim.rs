//! In-process simulated drive PDO (C12, §4.12).
//!
//! Mirrors the DS402 control-word transitions a real drive's firmware would
//! make, entirely in memory, so the rest of the cyclic pipeline can be
//! exercised without an EtherCAT master or real servo hardware attached.
//! Grounded in the reference simulator: status word is derived directly from
//! the last control word written, actual position tracks the commanded
//! target instantaneously, and actual velocity is synthesized from the
//! position delta.

use scara_common::bus::{Bus, BusInfo, DrivePdo, SlaveState};
use scara_common::consts::DC_SYNC_BIAS_NS;
use scara_common::ds402::{ControlWord, StatusWord};

/// Simulated PDO: interprets control-word writes as state transitions and
/// synthesizes actual position/velocity from the commanded target.
pub struct SimulatedPdo {
    status_word: StatusWord,
    control_word: ControlWord,
    target_position: f64,
    previous_target: f64,
    actual_velocity: f64,
    error_code: u16,
    emergency_stop: bool,
}

impl SimulatedPdo {
    pub fn new() -> Self {
        Self {
            status_word: StatusWord::OFF_STATE,
            control_word: ControlWord::empty(),
            target_position: 0.0,
            previous_target: 0.0,
            actual_velocity: 0.0,
            error_code: 0,
            emergency_stop: false,
        }
    }

    /// Force a synthetic DS402 error code onto the drive, as a test hook for
    /// exercising the fault path without a real drive.
    pub fn inject_error_code(&mut self, code: u16) {
        self.error_code = code;
    }

    pub fn inject_emergency_stop(&mut self, asserted: bool) {
        self.emergency_stop = asserted;
    }
}

impl Default for SimulatedPdo {
    fn default() -> Self {
        Self::new()
    }
}

impl DrivePdo for SimulatedPdo {
    fn status_word(&self) -> StatusWord {
        self.status_word
    }

    fn set_control_word(&mut self, word: ControlWord) {
        self.control_word = word;
        self.status_word = match word {
            ControlWord::FAULT_RESET => StatusWord::READY_TO_SWITCH_ON_STATE,
            ControlWord::SWITCH_ON_OR_DISABLE_OPERATION | ControlWord::ENABLE_OPERATION_CMD => {
                StatusWord::ON_STATE
            }
            ControlWord::SET_ABS_POINT_NOBLEND => StatusWord::HOMING_COMPLETE_STATE,
            _ => StatusWord::OFF_STATE,
        };
    }

    fn actual_position(&self) -> f64 {
        // Synthesizes instantaneous tracking of the commanded target, as the
        // reference simulator does (`getActualPosition` returns
        // `target_position` directly).
        self.target_position
    }

    fn actual_velocity(&self) -> f64 {
        self.actual_velocity
    }

    fn actual_torque_percent(&self) -> f64 {
        0.0
    }

    fn following_error(&self) -> f64 {
        0.0
    }

    fn error_code(&self) -> u16 {
        self.error_code
    }

    fn emergency_stop(&self) -> bool {
        self.emergency_stop
    }

    fn set_target_position(&mut self, raw_units: f64) {
        self.actual_velocity = (raw_units - self.previous_target) * 1000.0;
        self.previous_target = self.target_position;
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
        self.error_code = 0;
        1
    }
}

/// In-process loop-back bus (§4.2): every slave reports `Operational`
/// immediately, the working counter always matches the slave count, and the
/// DC reference time is always reported at the PI loop's bias point, so the
/// cyclic pipeline's DC-sync step sees a permanently locked phase — there is
/// no hardware sync0 edge to drift against in simulation.
pub struct SimulatedBus {
    slave_count: u16,
}

impl SimulatedBus {
    pub fn new(slave_count: u16) -> Self {
        Self { slave_count }
    }
}

impl Bus for SimulatedBus {
    type Error = std::convert::Infallible;

    fn bring_up(&mut self, _iface: &str) -> Result<BusInfo, Self::Error> {
        Ok(BusInfo {
            slave_count: self.slave_count,
            expected_wkc: self.slave_count as i32 * 3,
            dc_capable: true,
        })
    }

    fn send_process(&mut self) {}

    fn receive_process(&mut self) -> i32 {
        self.slave_count as i32 * 3
    }

    fn set_dc_sync0(&mut self, _slave: u16, _enabled: bool, _period_ns: u32, _shift_ns: i32) {}

    fn statecheck(&mut self, _slave: u16) -> SlaveState {
        SlaveState::Operational
    }

    fn reconfig_slave(&mut self, _slave: u16) {}

    fn recover_slave(&mut self, _slave: u16) {}

    fn dc_reference_time_ns(&mut self) -> i64 {
        DC_SYNC_BIAS_NS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_bus_reports_operational_and_expected_wkc() {
        let mut bus = SimulatedBus::new(4);
        let info = bus.bring_up("lo").expect("sim bus bring-up never fails");
        assert_eq!(info.slave_count, 4);
        assert_eq!(info.expected_wkc, 12);
        bus.send_process();
        assert_eq!(bus.receive_process(), info.expected_wkc);
        assert_eq!(bus.statecheck(1), SlaveState::Operational);
    }

    #[test]
    fn fault_reset_control_word_yields_ready_to_switch_on() {
        let mut pdo = SimulatedPdo::new();
        pdo.set_control_word(ControlWord::FAULT_RESET);
        assert!(pdo.status_word().matches(StatusWord::READY_TO_SWITCH_ON_STATE));
    }

    #[test]
    fn enable_operation_reaches_on_state() {
        let mut pdo = SimulatedPdo::new();
        pdo.set_control_word(ControlWord::ENABLE_OPERATION_CMD);
        assert!(pdo.status_word().matches(StatusWord::ON_STATE));
    }

    #[test]
    fn homing_control_word_reaches_homing_complete() {
        let mut pdo = SimulatedPdo::new();
        pdo.set_control_word(ControlWord::SET_ABS_POINT_NOBLEND);
        assert!(pdo.status_word().matches(StatusWord::HOMING_COMPLETE_STATE));
    }

    #[test]
    fn actual_position_tracks_commanded_target_instantaneously() {
        let mut pdo = SimulatedPdo::new();
        pdo.set_target_position(42.5);
        assert_eq!(pdo.actual_position(), 42.5);
    }

    #[test]
    fn actual_velocity_reflects_target_delta() {
        let mut pdo = SimulatedPdo::new();
        pdo.set_target_position(0.0);
        pdo.set_target_position(1.0);
        assert_eq!(pdo.actual_velocity(), 1000.0);
    }

    #[test]
    fn injected_error_code_surfaces_and_clears_on_fault_reset() {
        let mut pdo = SimulatedPdo::new();
        pdo.inject_error_code(0x1234);
        assert_eq!(pdo.error_code(), 0x1234);
        pdo.fault_reset();
        assert_eq!(pdo.error_code(), 0);
    }
}
