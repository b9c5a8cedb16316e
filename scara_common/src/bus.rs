//! Abstract bus and pub/sub capability traits (§4.2, §9 design notes).
//!
//! The Motion FSM and the façade are generic over these traits rather than
//! over a concrete EtherCAT master or message-bus client, so the same
//! `scara_control` code drives either the real hardware backend (behind an
//! optional feature) or the in-process simulated ones (`scara_control`'s
//! `drive_sim` module and this crate's `InProcessBus`) used in development
//! and tests. This is the "tagged variant, not inheritance" shape called for
//! in the design notes: two concrete implementations of one small trait
//! rather than a base/derived pair.

use crate::ds402::{ControlWord, StatusWord};

/// Per-drive PDO view: the capability set the CoE FSM and `Motor` need,
/// independent of whether the bytes come from a real EtherCAT master or the
/// in-process simulator.
pub trait DrivePdo {
    fn status_word(&self) -> StatusWord;
    fn set_control_word(&mut self, word: ControlWord);

    fn actual_position(&self) -> f64;
    fn actual_velocity(&self) -> f64;
    fn actual_torque_percent(&self) -> f64;
    fn following_error(&self) -> f64;
    fn error_code(&self) -> u16;
    fn emergency_stop(&self) -> bool;

    fn set_target_position(&mut self, raw_units: f64);

    /// SDO writes; all return a working-counter-style success count (1 on
    /// success, 0 on failure) so the Group can sum fan-out results exactly
    /// as the cyclic PDO exchange does.
    fn set_mode_of_operation(&mut self, mode: i8) -> i32;
    fn set_homing_mode(&mut self, mode: i16) -> i32;
    fn set_homing_offset(&mut self, offset: i32) -> i32;
    fn set_torque_limit(&mut self, percent: f64) -> i32;
    fn set_following_window(&mut self, window: i32) -> i32;
    fn fault_reset(&mut self) -> i32;
}

/// Bus-wide bring-up and per-cycle exchange (§4.2). A real backend delegates
/// this to an EtherCAT master library; the simulated backend loops bytes
/// back locally with zero latency.
pub trait Bus {
    type Error: std::error::Error;

    fn bring_up(&mut self, iface: &str) -> Result<BusInfo, Self::Error>;
    fn send_process(&mut self);
    fn receive_process(&mut self) -> i32;
    fn set_dc_sync0(&mut self, slave: u16, enabled: bool, period_ns: u32, shift_ns: i32);
    fn statecheck(&mut self, slave: u16) -> SlaveState;
    fn reconfig_slave(&mut self, slave: u16);
    fn recover_slave(&mut self, slave: u16);

    /// DC reference time for the cycle just exchanged, nanoseconds (§4.1).
    /// Real backends read this off the master's DC register; a backend with
    /// no hardware DC clock (the simulator) can leave the default, which
    /// reports perfect phase lock.
    fn dc_reference_time_ns(&mut self) -> i64 {
        0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BusInfo {
    pub slave_count: u16,
    pub expected_wkc: i32,
    pub dc_capable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Init,
    PreOp,
    SafeOp,
    Operational,
    Error,
}

/// Abstract pub/sub handle for command ingress and status/event egress
/// (§6, §9). `InProcessBus` below is the always-available backend used in
/// development and tests; a real message-bus client would implement the
/// same trait against its own connection.
pub trait PubSub: Send {
    fn publish(&self, subject: &str, payload: &[u8]);
    /// Non-blocking poll; returns `None` if nothing is queued. The façade's
    /// ingress loop is expected to poll with a short timeout so shutdown
    /// stays observable, per §5's suspension-point contract.
    fn try_recv(&self, subject: &str) -> Option<Vec<u8>>;
}

/// Simple crossbeam-channel-backed pub/sub used wherever no real message-bus
/// client is wired up. Subjects are modeled as independent channels created
/// lazily; `publish` on a subject with no subscriber is a no-op, matching
/// fire-and-forget bus semantics.
pub struct InProcessBus {
    command_tx: crossbeam_channel::Sender<Vec<u8>>,
    command_rx: crossbeam_channel::Receiver<Vec<u8>>,
    status_tx: crossbeam_channel::Sender<Vec<u8>>,
    status_rx: crossbeam_channel::Receiver<Vec<u8>>,
    event_tx: crossbeam_channel::Sender<Vec<u8>>,
    event_rx: crossbeam_channel::Receiver<Vec<u8>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        Self {
            command_tx,
            command_rx,
            status_tx,
            status_rx,
            event_tx,
            event_rx,
        }
    }

    fn channel_for(&self, subject: &str) -> Option<(&crossbeam_channel::Sender<Vec<u8>>, &crossbeam_channel::Receiver<Vec<u8>>)> {
        match subject {
            "motion.command" => Some((&self.command_tx, &self.command_rx)),
            "motion.status" => Some((&self.status_tx, &self.status_rx)),
            "motion.event" => Some((&self.event_tx, &self.event_rx)),
            _ => None,
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub for InProcessBus {
    fn publish(&self, subject: &str, payload: &[u8]) {
        if let Some((tx, _)) = self.channel_for(subject) {
            let _ = tx.send(payload.to_vec());
        }
    }

    fn try_recv(&self, subject: &str) -> Option<Vec<u8>> {
        self.channel_for(subject).and_then(|(_, rx)| rx.try_recv().ok())
    }
}

/// Key-value settings store watch (§4.10 `dynamics.active`). An in-process
/// stand-in mirroring the real store's `put`/`get`/watch shape closely
/// enough that a real client slots in behind the same trait.
pub trait KvStore {
    fn put(&self, key: &str, value: Vec<u8>);
    fn get(&self, key: &str) -> Option<Vec<u8>>;
}

#[derive(Default)]
pub struct InProcessKv {
    inner: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InProcessKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InProcessKv {
    fn put(&self, key: &str, value: Vec<u8>) {
        self.inner.lock().unwrap().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().get(key).cloned()
    }
}
