//! TOML machine configuration loader with validation (§10.3).
//!
//! Loads cycle timing, per-axis calibration, kinematics constants, the
//! default dynamics preset, and bring-up parameters from a single TOML file.
//! Validation runs once at startup; a failure here aborts bring-up before the
//! cyclic thread starts (§7 `ConfigInvalid`) and never recurs mid-run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-axis calibration and soft-limit envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    pub axis_id: u8,
    /// Raw PDO units per degree.
    pub position_ratio: f64,
    /// Raw PDO units per deg/s.
    pub velocity_ratio: f64,
    pub soft_min_deg: f64,
    pub soft_max_deg: f64,
    pub torque_threshold_percent: f64,
    pub torque_limit_percent: f64,
    pub homing_offset: i32,
    /// SDO homing mode code (§9 open question: configurable, default 35).
    #[serde(default = "default_homing_mode")]
    pub homing_mode: i16,
}

fn default_homing_mode() -> i16 {
    35
}

/// Default dynamics preset applied until a settings PUT lands (§4.10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DynamicsPreset {
    pub max_velocity: f64,
    pub max_acceleration: f64,
    pub max_jerk: f64,
}

impl Default for DynamicsPreset {
    fn default() -> Self {
        Self {
            max_velocity: 600.0,
            max_acceleration: 50_000.0,
            max_jerk: 600.0,
        }
    }
}

/// Kinematics constants (§4.5). Defaults match the SCARA geometry this
/// controller is built for; exposed as config so a different arm can be
/// driven without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicsConfig {
    pub l1_mm: f64,
    pub l2_mm: f64,
    pub screw_pitch_mm_per_deg: f64,
    pub alpha_min_deg: f64,
    pub alpha_max_deg: f64,
    pub beta_min_deg: f64,
    pub beta_max_deg: f64,
    pub base_keepout_mm: f64,
    pub base_keepout_border_mm: f64,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            l1_mm: crate::consts::L1_MM,
            l2_mm: crate::consts::L2_MM,
            screw_pitch_mm_per_deg: crate::consts::SCREW_PITCH_MM_PER_DEG,
            alpha_min_deg: crate::consts::ALPHA_MIN_DEG,
            alpha_max_deg: crate::consts::ALPHA_MAX_DEG,
            beta_min_deg: crate::consts::BETA_MIN_DEG,
            beta_max_deg: crate::consts::BETA_MAX_DEG,
            base_keepout_mm: crate::consts::BASE_KEEPOUT_MM,
            base_keepout_border_mm: crate::consts::BASE_KEEPOUT_BORDER_MM,
        }
    }
}

/// RT scheduling parameters (§5, §10.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtConfig {
    pub cpu_core: usize,
    pub rt_priority: i32,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu_core: 2,
            rt_priority: 49,
        }
    }
}

/// Complete, validated machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Cycle/sync0 period in microseconds.
    pub cycle_time_us: u64,
    pub axes: Vec<AxisConfig>,
    #[serde(default)]
    pub kinematics: KinematicsConfig,
    #[serde(default)]
    pub default_dynamics: DynamicsPreset,
    #[serde(default)]
    pub rt: RtConfig,
    /// Message-bus endpoint, e.g. a NATS URL (§6).
    pub bus_url: String,
    /// EtherCAT network interface name (§6).
    pub iface: String,
}

/// Parse and validate a [`MachineConfig`] from a TOML file on disk.
pub fn load_config(path: impl AsRef<Path>) -> Result<MachineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    load_config_from_str(&raw)
}

/// Parse and validate a [`MachineConfig`] from an in-memory TOML string.
/// Split out from [`load_config`] so tests exercise validation without
/// touching the filesystem.
pub fn load_config_from_str(raw: &str) -> Result<MachineConfig, ConfigError> {
    let config: MachineConfig = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &MachineConfig) -> Result<(), ConfigError> {
    if config.cycle_time_us == 0 {
        return Err(ConfigError::Validation("cycle_time_us must be nonzero".into()));
    }
    if config.axes.len() != crate::consts::NUM_AXES {
        return Err(ConfigError::Validation(format!(
            "expected {} axes, found {}",
            crate::consts::NUM_AXES,
            config.axes.len()
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for axis in &config.axes {
        if !seen.insert(axis.axis_id) {
            return Err(ConfigError::Validation(format!(
                "duplicate axis_id {}",
                axis.axis_id
            )));
        }
        if !(axis.soft_min_deg < axis.soft_max_deg) {
            return Err(ConfigError::Validation(format!(
                "axis {} soft limits out of order: {} >= {}",
                axis.axis_id, axis.soft_min_deg, axis.soft_max_deg
            )));
        }
        if axis.position_ratio <= 0.0 || axis.velocity_ratio <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "axis {} calibration ratios must be positive",
                axis.axis_id
            )));
        }
        if axis.torque_threshold_percent <= 0.0 || axis.torque_threshold_percent > 100.0 {
            return Err(ConfigError::Validation(format!(
                "axis {} torque_threshold_percent out of range",
                axis.axis_id
            )));
        }
    }

    if config.kinematics.l1_mm <= 0.0 || config.kinematics.l2_mm <= 0.0 {
        return Err(ConfigError::Validation("link lengths must be positive".into()));
    }
    if !(config.kinematics.alpha_min_deg < config.kinematics.alpha_max_deg) {
        return Err(ConfigError::Validation("alpha bounds out of order".into()));
    }
    if !(config.kinematics.beta_min_deg < config.kinematics.beta_max_deg) {
        return Err(ConfigError::Validation("beta bounds out of order".into()));
    }

    Ok(())
}
