//! Command dispatch, status snapshot, and settings ingest (§4.10, C10).
//!
//! Grounded in the reference `Robot::command`/`NC::control`/`NC::kv` trio:
//! inbound commands are decoded behind a fault-tolerant boundary (a decode
//! failure is logged and dropped, never touching FSM state) and applied as
//! single-field mutations on the FSM, matching `evo_control_unit`'s
//! `command::arbitration` decode-then-dispatch shape but over JSON instead of
//! a fixed-layout SHM struct.

use scara_common::bus::{DrivePdo, KvStore, PubSub};
use scara_common::config::DynamicsPreset;
use scara_common::consts::NUM_AXES;
use scara_common::error::CommandError;
use scara_common::event::EventLog;
use serde::{Deserialize, Serialize};

use crate::fsm::MotionFsm;
use crate::kinematics::{CartesianPose, JointPose};
use crate::trajectory::Otg;

/// EtherCAT timing status captured by the cyclic pipeline each tick and
/// folded into the outbound status snapshot (§3 "EtherCAT status (C11)").
/// Owned here rather than by the FSM: it describes the bus/DC layer the FSM
/// itself never touches.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EtherCatStatus {
    pub interval_ns: i64,
    pub sync0_ns: i64,
    pub compensation_ns: i64,
    pub integral: i64,
    pub state: EtherCatBusState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EtherCatBusState {
    #[default]
    Operational,
    Degraded,
}

/// Decoded inbound command (§4.10's command table). Unknown/malformed
/// payloads never reach this type — [`decode_command`] rejects them first.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Stop,
    Start,
    Goto { pose: CartesianPose },
    MoveLinear { pose: CartesianPose, duration_s: f64 },
    Jog { delta: JointPose },
    Waypoints { poses: Vec<CartesianPose> },
    Reset,
    Home,
    SetHome { offsets: [i32; NUM_AXES], homing_mode: i16 },
    HotStart,
}

/// Raw wire shape: one flat JSON object with a `command` discriminator and
/// whichever payload fields that command uses. Matches §4.10's table
/// directly rather than a tagged/adjacently-tagged enum, since the source
/// commands are flat structs keyed by a type byte.
#[derive(Debug, Deserialize)]
struct RawCommand {
    command: String,
    #[serde(default)]
    pose: Option<CartesianPose>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    jog: Option<JointPose>,
    #[serde(default)]
    waypoints: Option<Vec<CartesianPose>>,
    #[serde(default)]
    offsets: Option<[i32; NUM_AXES]>,
    #[serde(default)]
    homing_mode: Option<i16>,
}

/// Decode one JSON payload off `motion.command` into a [`Command`]. Never
/// panics on malformed input; every failure becomes a [`CommandError`] for
/// the caller to log, leaving the FSM untouched.
pub fn decode_command(payload: &[u8]) -> Result<Command, CommandError> {
    let raw: RawCommand = serde_json::from_slice(payload).map_err(|e| CommandError::MalformedPayload {
        command: "<undecoded>".into(),
        reason: e.to_string(),
    })?;

    let need_pose = || {
        raw.pose.ok_or_else(|| CommandError::MalformedPayload {
            command: raw.command.clone(),
            reason: "missing pose".into(),
        })
    };

    match raw.command.as_str() {
        "stop" => Ok(Command::Stop),
        "start" => Ok(Command::Start),
        "goto" => Ok(Command::Goto { pose: need_pose()? }),
        "moveLinear" => Ok(Command::MoveLinear {
            pose: need_pose()?,
            duration_s: raw.duration.ok_or_else(|| CommandError::MalformedPayload {
                command: raw.command.clone(),
                reason: "missing duration".into(),
            })?,
        }),
        "jog" => Ok(Command::Jog {
            delta: raw.jog.ok_or_else(|| CommandError::MalformedPayload {
                command: raw.command.clone(),
                reason: "missing jog delta".into(),
            })?,
        }),
        "waypoints" => Ok(Command::Waypoints {
            poses: raw.waypoints.ok_or_else(|| CommandError::MalformedPayload {
                command: raw.command.clone(),
                reason: "missing waypoints array".into(),
            })?,
        }),
        "reset" => Ok(Command::Reset),
        "home" => Ok(Command::Home),
        "setHome" => Ok(Command::SetHome {
            offsets: raw.offsets.ok_or_else(|| CommandError::MalformedPayload {
                command: raw.command.clone(),
                reason: "missing offsets".into(),
            })?,
            homing_mode: raw.homing_mode.unwrap_or(35),
        }),
        "hotStart" => Ok(Command::HotStart),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Apply one decoded command to the FSM (§4.10's effect column). Every
/// branch is a single, self-contained mutation — no command reads back
/// another command's effect within the same call.
pub fn apply_command<P: DrivePdo, O: Otg>(cmd: Command, fsm: &mut MotionFsm<P, O>, log: &mut EventLog) {
    match cmd {
        Command::Stop => {
            fsm.run = false;
            fsm.jog = false;
        }
        Command::Start => {
            if fsm.estop {
                fsm.run = true;
            }
        }
        Command::Goto { pose } => {
            if fsm.estop && !fsm.jog {
                fsm.target = pose;
            }
        }
        Command::MoveLinear { pose, duration_s } => {
            if fsm.estop && !fsm.jog {
                densify_linear(fsm, pose, duration_s);
            }
        }
        Command::Jog { delta } => {
            if fsm.estop {
                fsm.run = true;
                fsm.jog = true;
                fsm.jog_target = JointPose {
                    alpha: fsm.jog_target.alpha + delta.alpha,
                    beta: fsm.jog_target.beta + delta.beta,
                    theta: fsm.jog_target.theta + delta.theta,
                    phi: fsm.jog_target.phi + delta.phi,
                };
            }
        }
        Command::Waypoints { poses } => {
            if fsm.estop {
                fsm.waypoints = poses.into();
            }
        }
        Command::Reset => {
            fsm.request_reset();
        }
        Command::Home => {
            fsm.needs_homing = true;
            fsm.run = true;
        }
        Command::SetHome { offsets, homing_mode } => {
            for (motor, offset) in fsm.group_mut().motors.iter_mut().zip(offsets.iter()) {
                motor.set_homing_mode(homing_mode);
                motor.set_homing_offset(*offset);
            }
            fsm.needs_homing = true;
            fsm.run = true;
        }
        Command::HotStart => {
            fsm.needs_homing = false;
        }
    }
    log.debug("command applied");
}

/// `moveLinear` (§4.10): densify the path from the last queued pose (or the
/// current target if the queue is empty) to `pose` by linear interpolation,
/// one waypoint per cycle's worth of `duration_s` — left coarse (10 segments)
/// since the OTG, not this planner, owns the actual velocity/accel shaping.
fn densify_linear<P: DrivePdo, O: Otg>(fsm: &mut MotionFsm<P, O>, pose: CartesianPose, _duration_s: f64) {
    const SEGMENTS: usize = 10;
    let start = fsm.waypoints.back().copied().unwrap_or(fsm.target);
    for i in 1..=SEGMENTS {
        let t = i as f64 / SEGMENTS as f64;
        fsm.waypoints.push_back(CartesianPose {
            x: start.x + (pose.x - start.x) * t,
            y: start.y + (pose.y - start.y) * t,
            z: start.z + (pose.z - start.z) * t,
            r: start.r + (pose.r - start.r) * t,
        });
    }
}

/// One drive's contribution to the status snapshot's `drives[]` array
/// (§4.10).
#[derive(Debug, Clone, Serialize)]
pub struct DriveStatus {
    pub slave_id: u8,
    pub error_code: u16,
    pub fault: bool,
    pub last_fault: Option<String>,
    pub actual_torque_percent: f64,
    pub following_error_deg: f64,
}

/// The outbound `motion.status` payload (§4.10).
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub run: bool,
    pub estop: bool,
    pub alarm: bool,
    pub needs_homing: bool,
    pub state: &'static str,
    pub otg_result: &'static str,
    pub kinematic_alarm: bool,
    pub ethercat: EtherCatStatus,
    pub drives: Vec<DriveStatus>,
    pub pose: CartesianPose,
    pub runtime_duration: u64,
    pub power_on_duration: u64,
    pub cpu_temperature_millideg_c: Option<i64>,
    pub diag_msg: Option<String>,
}

/// Build the status snapshot from the FSM's own accessors plus the
/// externally-tracked EtherCAT/thermal context (§4.10, §3 "EtherCAT status").
pub fn build_status<P: DrivePdo, O: Otg>(
    fsm: &MotionFsm<P, O>,
    ethercat: EtherCatStatus,
    cpu_temperature_millideg_c: Option<i64>,
) -> StatusSnapshot {
    let ethercat_fault = ethercat.state == EtherCatBusState::Degraded;
    let drives = fsm
        .group()
        .motors
        .iter()
        .map(|m| DriveStatus {
            slave_id: m.axis_id,
            error_code: m.error_code(),
            fault: m.fault(),
            last_fault: m.last_fault().map(str::to_string),
            actual_torque_percent: m.torque_percent(),
            following_error_deg: m.following_error_deg(),
        })
        .collect();

    StatusSnapshot {
        run: fsm.run,
        estop: fsm.estop,
        alarm: fsm.alarm(ethercat_fault),
        needs_homing: fsm.needs_homing,
        state: fsm.state().as_str(),
        otg_result: otg_result_str(fsm.otg_result()),
        kinematic_alarm: fsm.kinematic_alarm(),
        ethercat,
        drives,
        pose: fsm.pose(),
        runtime_duration: fsm.runtime_duration(),
        power_on_duration: fsm.power_on_duration(),
        cpu_temperature_millideg_c,
        diag_msg: fsm.last_diag().map(str::to_string),
    }
}

fn otg_result_str(result: crate::trajectory::OtgResult) -> &'static str {
    match result {
        crate::trajectory::OtgResult::Working => "working",
        crate::trajectory::OtgResult::Finished => "finished",
        crate::trajectory::OtgResult::Error => "error",
    }
}

/// Settings wire shape for the `dynamics.active` KV key (§4.10). Mirrors the
/// source `Preset` record; this controller applies one set of dynamic limits
/// across all four axes (see `DESIGN.md`), so only `axis_configurations[0]`
/// is used — `synchronisation_method` has no counterpart in the OTG (§9
/// open questions) and is accepted but otherwise unused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicsSettingsPut {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub axis_configurations: [DynamicsPreset; NUM_AXES],
    #[serde(default)]
    pub synchronisation_method: SynchronisationMethod,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SynchronisationMethod {
    #[default]
    None,
    Time,
    TimeIfNecessary,
    Phase,
}

/// Poll the `dynamics.active` KV key and, if it changed since `last_seen`,
/// apply it to the FSM. Returns the raw bytes just applied so the caller can
/// update its `last_seen` without a second KV round-trip.
pub fn ingest_dynamics_settings<K: KvStore, P: DrivePdo, O: Otg>(
    kv: &K,
    last_seen: Option<&[u8]>,
    fsm: &mut MotionFsm<P, O>,
    log: &mut EventLog,
) -> Option<Vec<u8>> {
    let raw = kv.get("dynamics.active")?;
    if Some(raw.as_slice()) == last_seen {
        return None;
    }
    match serde_json::from_slice::<DynamicsSettingsPut>(&raw) {
        Ok(put) => {
            fsm.update_dynamics(put.axis_configurations[0]);
            log.info(format!("Dynamics preset '{}' applied", put.name));
        }
        Err(e) => {
            log.warning(format!("dynamics.active payload rejected: {e}"));
        }
    }
    Some(raw)
}

/// Drain one inbound command off `motion.command`, decode it behind the
/// fault-tolerant boundary, and apply it. Returns `false` if nothing was
/// queued. Decode failures are logged and swallowed — the FSM is never
/// touched on a bad payload.
pub fn poll_command<B: PubSub, P: DrivePdo, O: Otg>(bus: &B, fsm: &mut MotionFsm<P, O>, log: &mut EventLog) -> bool {
    let Some(payload) = bus.try_recv("motion.command") else {
        return false;
    };
    match decode_command(&payload) {
        Ok(cmd) => apply_command(cmd, fsm, log),
        Err(e) => log.error(format!("rejected command: {e}")),
    }
    true
}

/// Publish a status snapshot plus the drained event log, exactly once per
/// status tick (§4.10 "The status emitter also drains the event log").
pub fn publish_status<B: PubSub>(bus: &B, snapshot: &StatusSnapshot, log: &mut EventLog) {
    if let Ok(body) = serde_json::to_vec(snapshot) {
        bus.publish("motion.status", &body);
    }
    for event in log.drain() {
        if let Ok(body) = serde_json::to_vec(&event) {
            bus.publish("motion.event", &body);
        }
    }
}
