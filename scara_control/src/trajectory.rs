//! Jerk-limited per-axis online trajectory generator (§4.6).
//!
//! No Rust binding for a jerk-limited OTG library exists anywhere in this
//! workspace's dependency corpus, so this is a from-scratch implementation
//! behind the small trait the design notes call for (§9: "the OTG library
//! dependency stays abstract"). Each axis runs an independent bang-bang
//! jerk profile that accelerates, cruises, and decelerates toward the
//! target, clamped to the configured velocity/acceleration/jerk limits.

use scara_common::consts::NUM_AXES;

/// Per-axis dynamic limits and current target.
#[derive(Debug, Clone, Copy)]
pub struct AxisLimits {
    pub max_velocity: f64,
    pub max_acceleration: f64,
    pub max_jerk: f64,
}

/// OTG input state for one axis, mutated in place each tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisState {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub target_position: f64,
}

/// Tick-level result for the whole multi-axis generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtgResult {
    Working,
    Finished,
    Error,
}

const POSITION_TOLERANCE: f64 = 1e-4;
const VELOCITY_TOLERANCE: f64 = 1e-4;

/// The subset of OTG behavior the cyclic loop needs, kept as a trait per the
/// design notes so the generator implementation can be swapped without
/// touching `fsm`/`cycle`.
pub trait Otg {
    fn reset(&mut self, states: &[AxisState; NUM_AXES]);
    /// `input` carries this tick's commanded `target_position` per axis (the
    /// rest of its fields are ignored — position/velocity/acceleration live
    /// in the generator's own state, seeded once by `reset`).
    fn update(&mut self, input: &[AxisState; NUM_AXES], dt_s: f64, limits: &[AxisLimits; NUM_AXES]) -> (
        [AxisState; NUM_AXES],
        OtgResult,
    );
}

/// Bang-bang jerk-limited generator: each axis independently ramps
/// acceleration at `max_jerk` toward whichever sign drives it closer to
/// target, clamping velocity and acceleration to their configured ceilings.
/// Not a time-optimal multi-axis sync (no `synchronisationMethod` blending),
/// matching the kinematic-CSP-only non-goal (§1).
#[derive(Debug, Default)]
pub struct JerkLimitedOtg {
    states: [AxisState; NUM_AXES],
}

impl JerkLimitedOtg {
    pub fn new() -> Self {
        Self::default()
    }

    fn step_axis(state: &mut AxisState, limits: &AxisLimits, dt: f64) -> bool {
        let error = state.target_position - state.position;
        let stopping_distance = (state.velocity * state.velocity) / (2.0 * limits.max_acceleration.max(1e-9));

        let desired_accel_sign = if error.abs() < stopping_distance && state.velocity.abs() > VELOCITY_TOLERANCE {
            -state.velocity.signum()
        } else if error > POSITION_TOLERANCE {
            1.0
        } else if error < -POSITION_TOLERANCE {
            -1.0
        } else {
            0.0
        };

        let target_accel = desired_accel_sign * limits.max_acceleration;
        let accel_delta = (target_accel - state.acceleration).clamp(
            -limits.max_jerk * dt,
            limits.max_jerk * dt,
        );
        state.acceleration = (state.acceleration + accel_delta)
            .clamp(-limits.max_acceleration, limits.max_acceleration);

        state.velocity = (state.velocity + state.acceleration * dt)
            .clamp(-limits.max_velocity, limits.max_velocity);
        state.position += state.velocity * dt;

        let settled = error.abs() < POSITION_TOLERANCE
            && state.velocity.abs() < VELOCITY_TOLERANCE
            && state.acceleration.abs() < VELOCITY_TOLERANCE;
        if settled {
            state.position = state.target_position;
            state.velocity = 0.0;
            state.acceleration = 0.0;
        }
        settled
    }
}

impl Otg for JerkLimitedOtg {
    fn reset(&mut self, states: &[AxisState; NUM_AXES]) {
        self.states = *states;
    }

    fn update(&mut self, input: &[AxisState; NUM_AXES], dt_s: f64, limits: &[AxisLimits; NUM_AXES]) -> ([AxisState; NUM_AXES], OtgResult) {
        if dt_s <= 0.0 {
            return (self.states, OtgResult::Error);
        }
        for (state, inp) in self.states.iter_mut().zip(input.iter()) {
            state.target_position = inp.target_position;
        }
        let mut all_settled = true;
        for (state, limit) in self.states.iter_mut().zip(limits.iter()) {
            let settled = Self::step_axis(state, limit, dt_s);
            all_settled &= settled;
        }
        let result = if all_settled { OtgResult::Finished } else { OtgResult::Working };
        (self.states, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> [AxisLimits; NUM_AXES] {
        [AxisLimits {
            max_velocity: 600.0,
            max_acceleration: 50_000.0,
            max_jerk: 600_000.0,
        }; NUM_AXES]
    }

    #[test]
    fn converges_to_target_within_bounded_ticks() {
        let mut otg = JerkLimitedOtg::new();
        let mut initial = [AxisState::default(); NUM_AXES];
        initial[0].target_position = 10.0;
        otg.reset(&initial);

        let limits = limits();
        let mut result = OtgResult::Working;
        for _ in 0..100_000 {
            let (_, r) = otg.update(&initial, 0.001, &limits);
            result = r;
            if result == OtgResult::Finished {
                break;
            }
        }
        assert_eq!(result, OtgResult::Finished);
    }

    #[test]
    fn never_exceeds_velocity_ceiling() {
        let mut otg = JerkLimitedOtg::new();
        let mut initial = [AxisState::default(); NUM_AXES];
        initial[0].target_position = 1000.0;
        otg.reset(&initial);

        let limits = limits();
        for _ in 0..2000 {
            let (states, _) = otg.update(&initial, 0.001, &limits);
            assert!(states[0].velocity.abs() <= limits[0].max_velocity + 1e-6);
        }
    }

    #[test]
    fn zero_dt_is_an_error() {
        let mut otg = JerkLimitedOtg::new();
        otg.reset(&[AxisState::default(); NUM_AXES]);
        let (_, result) = otg.update(&[AxisState::default(); NUM_AXES], 0.0, &limits());
        assert_eq!(result, OtgResult::Error);
    }

    #[test]
    fn already_at_target_finishes_immediately() {
        let mut otg = JerkLimitedOtg::new();
        otg.reset(&[AxisState::default(); NUM_AXES]);
        let (_, result) = otg.update(&[AxisState::default(); NUM_AXES], 0.001, &limits());
        assert_eq!(result, OtgResult::Finished);
    }
}
