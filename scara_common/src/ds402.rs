//! DS402 control/status word layout (CANopen-over-EtherCAT servo drive profile).
//!
//! Bit positions and composite masks match the wire profile used by the
//! drives this controller talks to (§6). `ControlWord` is written by the host
//! each cycle; `StatusWord` is read back. Composite `STATE_*` masks let the
//! CoE FSM (`coe_fsm`) test "are we in state X" with a single `contains`
//! rather than hand-rolled bit arithmetic at every call site.

use bitflags::bitflags;

bitflags! {
    /// Bits written to `0x6040:00` each cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlWord: u16 {
        const SWITCH_ON        = 1 << 0;
        const ENABLE_VOLTAGE   = 1 << 1;
        const QUICK_STOP       = 1 << 2;
        const ENABLE_OPERATION = 1 << 3;
        const OP_SPECIFIC_1    = 1 << 4;
        const OP_SPECIFIC_2    = 1 << 5;
        const OP_SPECIFIC_3    = 1 << 6;
        const RESET_FAULT      = 1 << 7;
        const HALT             = 1 << 8;

        /// Restart after FAULT.
        const FAULT_RESET = Self::RESET_FAULT.bits();
        /// Drop to SWITCH_ON_DISABLED / switch-on-disable-operation.
        const SWITCH_ON_OR_DISABLE_OPERATION =
            Self::SWITCH_ON.bits() | Self::ENABLE_VOLTAGE.bits() | Self::QUICK_STOP.bits();
        /// SHUTDOWN: request READY_TO_SWITCH_ON.
        const SHUTDOWN = Self::ENABLE_VOLTAGE.bits() | Self::QUICK_STOP.bits();
        /// Drive into OPERATION_ENABLED.
        const ENABLE_OPERATION_CMD = Self::SWITCH_ON.bits()
            | Self::ENABLE_VOLTAGE.bits()
            | Self::QUICK_STOP.bits()
            | Self::ENABLE_OPERATION.bits();
        /// Cut power entirely.
        const DISABLE_VOLTAGE = 0;
        /// Homing: set absolute point, no blend.
        const SET_ABS_POINT_NOBLEND = Self::SWITCH_ON.bits()
            | Self::ENABLE_VOLTAGE.bits()
            | Self::QUICK_STOP.bits()
            | Self::ENABLE_OPERATION.bits()
            | Self::OP_SPECIFIC_1.bits();
    }
}

bitflags! {
    /// Bits read from `0x6041:00` each cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusWord: u16 {
        const READY_TO_SWITCH_ON    = 1 << 0;
        const SWITCHED_ON           = 1 << 1;
        const OPERATION_ENABLE      = 1 << 2;
        const FAULT                 = 1 << 3;
        const VOLTAGE_ENABLED       = 1 << 4;
        const QUICK_STOP            = 1 << 5;
        const SWITCH_ON_DISABLED    = 1 << 6;
        const WARNING               = 1 << 7;
        const REMOTE                = 1 << 9;
        const TARGET_REACHED        = 1 << 10;
        const INTERNAL_LIMIT_ACTIVE = 1 << 11;
        const SETPOINT_ACKNOWLEDGE  = 1 << 12;

        const READY_TO_SWITCH_ON_STATE =
            Self::VOLTAGE_ENABLED.bits() | Self::READY_TO_SWITCH_ON.bits();
        const ON_STATE = Self::QUICK_STOP.bits()
            | Self::VOLTAGE_ENABLED.bits()
            | Self::OPERATION_ENABLE.bits()
            | Self::SWITCHED_ON.bits()
            | Self::READY_TO_SWITCH_ON.bits();
        const HOMING_COMPLETE_STATE = Self::ON_STATE.bits()
            | Self::TARGET_REACHED.bits()
            | Self::SETPOINT_ACKNOWLEDGE.bits();
        const OFF_STATE = Self::SWITCH_ON_DISABLED.bits();
    }
}

impl StatusWord {
    /// True if every bit of `mask` is set (drive has reached that composite state).
    #[inline]
    pub const fn matches(self, mask: Self) -> bool {
        self.intersection(mask).bits() == mask.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_state_mask_matches_individual_bits() {
        let sw = StatusWord::READY_TO_SWITCH_ON
            | StatusWord::SWITCHED_ON
            | StatusWord::OPERATION_ENABLE
            | StatusWord::VOLTAGE_ENABLED
            | StatusWord::QUICK_STOP;
        assert!(sw.matches(StatusWord::ON_STATE));
    }

    #[test]
    fn missing_bit_fails_match() {
        let sw = StatusWord::READY_TO_SWITCH_ON
            | StatusWord::SWITCHED_ON
            | StatusWord::VOLTAGE_ENABLED
            | StatusWord::QUICK_STOP;
        assert!(!sw.matches(StatusWord::ON_STATE));
    }

    #[test]
    fn off_state_is_switch_on_disabled_only() {
        let sw = StatusWord::SWITCH_ON_DISABLED;
        assert!(sw.matches(StatusWord::OFF_STATE));
    }

    #[test]
    fn homing_complete_implies_on_state() {
        assert!(StatusWord::HOMING_COMPLETE_STATE.matches(StatusWord::ON_STATE));
    }

    #[test]
    fn control_word_constants_match_wire_values() {
        assert_eq!(ControlWord::SHUTDOWN.bits(), 0x0006);
        assert_eq!(ControlWord::SWITCH_ON_OR_DISABLE_OPERATION.bits(), 0x0007);
        assert_eq!(ControlWord::ENABLE_OPERATION_CMD.bits(), 0x000F);
        assert_eq!(ControlWord::FAULT_RESET.bits(), 0x0080);
        assert_eq!(ControlWord::SET_ABS_POINT_NOBLEND.bits(), 0x001F);
    }
}
