//! System-wide constants for the SCARA workspace.
//!
//! Single source of truth for all numeric limits and defaults. Imported by
//! both crates — no duplication permitted.

use static_assertions::const_assert;

/// Number of controlled axes. Fixed: two revolute joints plus the
/// screw-coupled rotation/Z wrist pair.
pub const NUM_AXES: usize = 4;
const_assert!(NUM_AXES == 4);

/// Shoulder link length [mm].
pub const L1_MM: f64 = 200.0;

/// Elbow link length [mm].
pub const L2_MM: f64 = 200.0;

/// Z/rotation screw pitch [mm per revolution], expressed as mm per degree.
pub const SCREW_PITCH_MM_PER_DEG: f64 = 16.0 / 360.0;

/// Shoulder joint lower bound [deg].
pub const ALPHA_MIN_DEG: f64 = -45.0;

/// Shoulder joint upper bound [deg].
pub const ALPHA_MAX_DEG: f64 = 225.0;

/// Elbow joint lower bound [deg].
pub const BETA_MIN_DEG: f64 = -150.0;

/// Elbow joint upper bound [deg].
pub const BETA_MAX_DEG: f64 = 150.0;
const_assert!(ALPHA_MIN_DEG < ALPHA_MAX_DEG);
const_assert!(BETA_MIN_DEG < BETA_MAX_DEG);

/// Radius of the cylindrical keep-out region behind the base [mm].
pub const BASE_KEEPOUT_MM: f64 = 100.0;

/// Extra clearance added to the keep-out radius for the reject test [mm].
pub const BASE_KEEPOUT_BORDER_MM: f64 = 10.0;

/// Maximum allowed jump between consecutive `Motor::move` targets [deg].
pub const MAX_MOVE_DELTA_DEG: f64 = 300.0;

/// Torque history capacity used for the moving-average guard.
pub const TORQUE_HISTORY_LEN: usize = 500;
const_assert!(TORQUE_HISTORY_LEN > 0);

/// CoE SAFE_RESET hold before stepping to PREPARE_TO_SWITCH_ON.
pub const MOTOR_RESET_DELAY: std::time::Duration = std::time::Duration::from_millis(10);

/// CoE ENABLE overall timeout before restarting from OFF.
pub const MOTOR_INIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Forced-halt grace period after the first abort signal.
pub const HALT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Bus-health supervisor cadence, expressed as a multiple of the cycle period.
pub const BUS_SUPERVISOR_CYCLE_MULTIPLE: u32 = 10;

/// Thermal supervisor sampling period.
pub const THERMAL_SUPERVISOR_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

/// Thermal shutdown threshold [millidegrees C], matching the platform sensor unit.
pub const THERMAL_SHUTDOWN_MILLIDEG_C: i64 = 80_000;

/// DC-sync wake-up bias placing the Linux tick shortly after the sync0 edge [ns].
pub const DC_SYNC_BIAS_NS: i64 = 50_000;

/// DC-sync proportional gain divisor.
pub const DC_SYNC_PROPORTIONAL_DIVISOR: i64 = 100;

/// DC-sync integral gain divisor. Fixed at 20 per the documented PI gains; see
/// `DESIGN.md` for why this does not follow the historical `/200` variant.
pub const DC_SYNC_INTEGRAL_DIVISOR: i64 = 20;

/// Default machine-bus-down forced-halt working counter margin check cadence note:
/// the bus supervisor itself owns its own timer, this just documents the multiple.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_bounds_are_ordered() {
        assert!(ALPHA_MIN_DEG < ALPHA_MAX_DEG);
        assert!(BETA_MIN_DEG < BETA_MAX_DEG);
    }

    #[test]
    fn keepout_border_is_positive() {
        assert!(BASE_KEEPOUT_BORDER_MM > 0.0);
        assert!(BASE_KEEPOUT_MM > 0.0);
    }

    #[test]
    fn num_axes_matches_arm_layout() {
        assert_eq!(NUM_AXES, 4);
    }
}
