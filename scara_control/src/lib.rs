//! Cyclic RT loop, kinematics, trajectory shaping, and state machines for the
//! SCARA motion controller.
//!
//! `scara_common` carries the wire-level constants and the abstract bus/PDO
//! traits; this crate composes them into the actual control pipeline —
//! kinematics (§4.5), trajectory shaping (§4.6), the per-drive cooked view
//! and drive group (§4.4), the top-level motion FSM (§4.7), the command/
//! status façade (§4.10), the bus/thermal supervisors (§4.9), DC time
//! discipline (§4.1), and the fixed-period cyclic pipeline that ties them all
//! together (§4.11). `drive_sim` is the in-process simulated backend (§4.12)
//! used whenever no real EtherCAT master is wired up.

pub mod cycle;
pub mod dc_sync;
pub mod drive_sim;
pub mod facade;
pub mod fsm;
pub mod kinematics;
pub mod motor;
pub mod supervisors;
pub mod trajectory;
