//! Forward/inverse SCARA kinematics and the pre/postprocessing safety
//! envelope (§4.5).
//!
//! The inverse-kinematics form here (law-of-cosines, `atan2`-based) is a
//! fresh implementation of the written algorithm rather than a port of any
//! historical C++ revision — see `DESIGN.md`'s open-question notes on why
//! the two older quadrant-branching forms were not used as a template.

use scara_common::config::KinematicsConfig;

/// Kinematic-step result code (§4.5, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KinematicResult {
    Success,
    JointLimit,
    Singularity,
    ForwardKinematic,
}

impl KinematicResult {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A Cartesian target, in mm/degrees. Also the wire shape for `goto`/
/// `moveLinear` payloads and the `pose` field of the status snapshot (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CartesianPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
}

/// A joint-space target, in degrees. `theta`/`phi` are the screw-coupled
/// rotation/Z pair; `phi` is the pure rotation term and `theta` folds in the
/// Z contribution via the screw pitch.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JointPose {
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
    pub phi: f64,
}

/// Reject-and-clamp the keep-out region behind the base, and range-check
/// `z`/`r`. Mutates a copy of the requested pose, returning the clamped pose
/// alongside the result code.
pub fn preprocessing(pose: CartesianPose, k: &KinematicsConfig) -> (CartesianPose, KinematicResult) {
    let mut out = pose;
    let mut result = KinematicResult::Success;

    let keepout = k.base_keepout_mm + k.base_keepout_border_mm;
    if out.y <= 0.0 && out.x.abs() < keepout {
        out.x = if out.x >= 0.0 { keepout } else { -keepout };
        result = KinematicResult::JointLimit;
    }

    if out.z < 0.0 {
        out.z = 0.0;
        result = KinematicResult::JointLimit;
    }

    if out.r < -180.0 {
        out.r = -180.0;
        result = KinematicResult::JointLimit;
    } else if out.r > 180.0 {
        out.r = 180.0;
        result = KinematicResult::JointLimit;
    }

    (out, result)
}

/// Solve joint angles for a Cartesian target, after subtracting `tool_offset`
/// along `r`.
pub fn inverse_kinematics(
    pose: CartesianPose,
    tool_offset: f64,
    k: &KinematicsConfig,
) -> (JointPose, KinematicResult) {
    let r_rad = pose.r.to_radians();
    let x = pose.x - tool_offset * r_rad.cos();
    let y = pose.y - tool_offset * r_rad.sin();

    let l1 = k.l1_mm;
    let l2 = k.l2_mm;

    let c2 = (x * x + y * y - l1 * l1 - l2 * l2) / (2.0 * l1 * l2);
    let s2 = (1.0 - c2 * c2).max(0.0).sqrt();
    let k1 = l1 + l2 * c2;
    let k2 = l2 * s2;

    let (mut alpha, mut beta) = if x >= 0.0 {
        let alpha = y.atan2(x) - k1.atan2(k2);
        let beta = s2.atan2(c2);
        (alpha, beta)
    } else {
        let alpha = -(y.atan2(-x) - k1.atan2(k2));
        let beta = -s2.atan2(c2);
        (alpha, beta)
    };

    alpha = 90.0_f64.to_radians() - alpha;
    beta = -beta;

    let mut alpha_deg = alpha.to_degrees();
    let mut beta_deg = beta.to_degrees();

    if alpha_deg.is_nan() || beta_deg.is_nan() {
        return (
            JointPose {
                alpha: 0.0,
                beta: 0.0,
                theta: 0.0,
                phi: 0.0,
            },
            KinematicResult::Singularity,
        );
    }

    let mut result = KinematicResult::Success;
    if alpha_deg < k.alpha_min_deg {
        alpha_deg = k.alpha_min_deg;
        result = KinematicResult::JointLimit;
    } else if alpha_deg > k.alpha_max_deg {
        alpha_deg = k.alpha_max_deg;
        result = KinematicResult::JointLimit;
    }
    if beta_deg < k.beta_min_deg {
        beta_deg = k.beta_min_deg;
        result = KinematicResult::JointLimit;
    } else if beta_deg > k.beta_max_deg {
        beta_deg = k.beta_max_deg;
        result = KinematicResult::JointLimit;
    }

    let phi = -(alpha_deg + beta_deg + pose.r);
    let theta = phi + pose.z / k.screw_pitch_mm_per_deg;

    (
        JointPose {
            alpha: alpha_deg,
            beta: beta_deg,
            theta,
            phi,
        },
        result,
    )
}

/// Forward kinematics: joint angles -> Cartesian pose, re-adding `tool_offset`.
pub fn forward_kinematics(joint: JointPose, tool_offset: f64, k: &KinematicsConfig) -> CartesianPose {
    let alpha_rad = (90.0_f64.to_radians()) - joint.alpha.to_radians();
    let beta_rad = -joint.beta.to_radians();

    let shoulder = alpha_rad;
    let elbow = shoulder + beta_rad;

    let x = k.l1_mm * shoulder.cos() + k.l2_mm * elbow.cos();
    let y = k.l1_mm * shoulder.sin() + k.l2_mm * elbow.sin();

    let r = -(joint.alpha + joint.beta + joint.phi);
    let z = (joint.theta - joint.phi) * k.screw_pitch_mm_per_deg;

    let r_rad = r.to_radians();
    CartesianPose {
        x: x + tool_offset * r_rad.cos(),
        y: y + tool_offset * r_rad.sin(),
        z,
        r,
    }
}

/// Re-run the forward pass on a candidate joint pose and reject it if the
/// predicted tool position would re-enter the keep-out.
pub fn postprocessing(joint: JointPose, tool_offset: f64, k: &KinematicsConfig) -> KinematicResult {
    let predicted = forward_kinematics(joint, tool_offset, k);
    let keepout = k.base_keepout_mm + k.base_keepout_border_mm;
    if predicted.y <= 0.0 && predicted.x.abs() < keepout {
        KinematicResult::ForwardKinematic
    } else {
        KinematicResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KinematicsConfig {
        KinematicsConfig::default()
    }

    #[test]
    fn round_trip_within_reach_matches_within_tolerance() {
        let k = config();
        let joint = JointPose {
            alpha: 30.0,
            beta: 45.0,
            theta: 10.0,
            phi: 0.0,
        };
        let cartesian = forward_kinematics(joint, 0.0, &k);
        let (pose, result) = preprocessing(cartesian, &k);
        let (ik, ik_result) = inverse_kinematics(pose, 0.0, &k);

        if ik_result.is_success() {
            assert!((ik.alpha - joint.alpha).abs() < 1e-3, "alpha mismatch: {} vs {}", ik.alpha, joint.alpha);
            assert!((ik.beta - joint.beta).abs() < 1e-3, "beta mismatch: {} vs {}", ik.beta, joint.beta);
        } else {
            assert_eq!(result, KinematicResult::JointLimit);
        }
    }

    #[test]
    fn keepout_clamps_and_flags_joint_limit() {
        let k = config();
        let pose = CartesianPose {
            x: 50.0,
            y: -50.0,
            z: 0.0,
            r: 0.0,
        };
        let (clamped, result) = preprocessing(pose, &k);
        assert_eq!(result, KinematicResult::JointLimit);
        assert!(clamped.x.abs() >= k.base_keepout_mm + k.base_keepout_border_mm - 1e-9);
    }

    #[test]
    fn in_reach_goto_has_no_joint_limit() {
        let k = config();
        let pose = CartesianPose {
            x: 110.0,
            y: 170.0,
            z: 0.0,
            r: 0.0,
        };
        let (clamped, preproc_result) = preprocessing(pose, &k);
        assert_eq!(preproc_result, KinematicResult::Success);
        let (joint, ik_result) = inverse_kinematics(clamped, 0.0, &k);
        assert_eq!(ik_result, KinematicResult::Success);
        assert!(joint.alpha.is_finite());
        assert!(joint.beta.is_finite());
    }

    #[test]
    fn unreachable_point_is_singularity() {
        let k = config();
        // Far outside the L1+L2 reach envelope.
        let pose = CartesianPose {
            x: 10_000.0,
            y: 10_000.0,
            z: 0.0,
            r: 0.0,
        };
        let (_, result) = inverse_kinematics(pose, 0.0, &k);
        assert_eq!(result, KinematicResult::Singularity);
    }

    #[test]
    fn z_below_zero_is_clamped() {
        let k = config();
        let pose = CartesianPose {
            x: 110.0,
            y: 170.0,
            z: -5.0,
            r: 0.0,
        };
        let (clamped, result) = preprocessing(pose, &k);
        assert_eq!(result, KinematicResult::JointLimit);
        assert_eq!(clamped.z, 0.0);
    }

    #[test]
    fn r_out_of_range_is_clamped() {
        let k = config();
        let pose = CartesianPose {
            x: 110.0,
            y: 170.0,
            z: 0.0,
            r: 200.0,
        };
        let (clamped, result) = preprocessing(pose, &k);
        assert_eq!(result, KinematicResult::JointLimit);
        assert_eq!(clamped.r, 180.0);
    }
}
