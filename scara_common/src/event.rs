//! Bounded, leveled, drainable event log (§4.8).
//!
//! Single-producer/single-consumer by construction: the cyclic thread is the
//! only producer, the status emitter is the only consumer, draining the
//! whole queue once per status tick. Each leveled helper also mirrors the
//! message through `tracing` at a matching severity (§10.1), so the same
//! picture is visible whether an operator is tailing process logs or
//! subscribing to `motion.event`.

use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Event severity. `Kinematic` and `EtherCAT` are domain-specific levels
/// alongside the usual log levels, matching the subsystems that raise them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Kinematic,
    #[serde(rename = "ethercat")]
    EtherCat,
}

impl Level {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Kinematic => "kinematic",
            Self::EtherCat => "ethercat",
        }
    }
}

/// A single log/status event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub level: Level,
    /// Nanoseconds since the Unix epoch.
    pub time_ns: i64,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Generates a 32-character lowercase hex id with the 13th character fixed to
/// `'4'` — a UUID-v4-ish shape without a dedicated UUID dependency, matching
/// the reference generator this is grounded on.
pub fn generate_event_id() -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(32);
    for i in 0..32 {
        if i == 12 {
            out.push('4');
        } else {
            let digit = rng.gen_range(0..16u8);
            out.push(std::char::from_digit(digit as u32, 16).unwrap());
        }
    }
    out
}

fn now_ns() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
}

impl Event {
    pub fn new(level: Level, message: impl Into<String>, detail: Option<serde_json::Value>) -> Self {
        Self {
            id: generate_event_id(),
            level,
            time_ns: now_ns(),
            message: message.into(),
            detail,
        }
    }
}

/// Bounded FIFO of [`Event`]. Bounded in the sense that the status emitter is
/// expected to drain it every tick; no hard capacity is enforced beyond what
/// memory allows, matching the reference implementation's unbounded deque —
/// a cyclic producer that never halts on a full queue is safer than one that
/// silently drops safety-relevant events.
#[derive(Debug, Default)]
pub struct EventLog {
    queue: VecDeque<Event>,
}

macro_rules! level_helper {
    ($name:ident, $level:expr, $tracing_macro:ident) => {
        pub fn $name(&mut self, message: impl Into<String>) {
            let message = message.into();
            tracing::$tracing_macro!("{message}");
            self.queue.push_back(Event::new($level, message, None));
        }
    };
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    level_helper!(debug, Level::Debug, debug);
    level_helper!(info, Level::Info, info);
    level_helper!(warning, Level::Warning, warn);
    level_helper!(error, Level::Error, error);
    level_helper!(critical, Level::Critical, error);

    /// Kinematic events are domain-internal and do not necessarily warrant a
    /// matching tracing line at warn/error severity; still recorded at debug
    /// so a trace-level log capture shows the same timeline.
    pub fn kinematic(&mut self, message: impl Into<String>, detail: Option<serde_json::Value>) {
        let message = message.into();
        tracing::debug!(kind = "kinematic", "{message}");
        self.queue.push_back(Event::new(Level::Kinematic, message, detail));
    }

    pub fn ethercat(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(kind = "ethercat", "{message}");
        self.queue.push_back(Event::new(Level::EtherCat, message, None));
    }

    /// Drain the whole queue in FIFO order. Each event appears exactly once.
    pub fn drain(&mut self) -> Vec<Event> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_has_fixed_version_nibble() {
        let id = generate_event_id();
        assert_eq!(id.len(), 32);
        assert_eq!(id.chars().nth(12), Some('4'));
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_not_constant() {
        let a = generate_event_id();
        let b = generate_event_id();
        assert_ne!(a, b, "two consecutive ids should not collide in practice");
    }

    #[test]
    fn fifo_order_preserved_and_drain_empties_queue() {
        let mut log = EventLog::new();
        log.info("first");
        log.warning("second");
        log.critical("third");

        assert_eq!(log.len(), 3);
        let drained = log.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].message, "first");
        assert_eq!(drained[1].message, "second");
        assert_eq!(drained[2].message, "third");
        assert!(log.is_empty());
    }

    #[test]
    fn drain_is_idempotent_on_empty_queue() {
        let mut log = EventLog::new();
        assert!(log.drain().is_empty());
    }

    #[test]
    fn level_as_str_matches_serde_rename() {
        assert_eq!(Level::EtherCat.as_str(), "ethercat");
        assert_eq!(Level::Kinematic.as_str(), "kinematic");
    }
}
