//! Convenience re-exports for crates that consume `scara_common`.

pub use crate::bus::{Bus, BusInfo, DrivePdo, InProcessBus, InProcessKv, KvStore, PubSub, SlaveState};
pub use crate::coe_fsm::{CoeCommand, CoeFsm, CoeState};
pub use crate::config::{AxisConfig, DynamicsPreset, KinematicsConfig, MachineConfig, RtConfig};
pub use crate::ds402::{ControlWord, StatusWord};
pub use crate::error::{BusError, CommandError, ConfigError};
pub use crate::event::{Event, EventLog, Level};
