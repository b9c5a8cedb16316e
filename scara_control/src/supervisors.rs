//! Bus-health and thermal supervisors (§4.9, C9).
//!
//! Grounded in `original_source/src/check.hpp`'s `check()`/`systemCheck()`:
//! two independent watchdogs on their own cadence, communicating with the
//! Motion FSM only through shared flags (`EtherCATFault`, `shutdown`) and the
//! event log, never by touching FSM state directly — matching §9's "replace
//! callback-driven ingress... supervisors communicate only through
//! `EtherCATFault` and `shutdown`" design note.

use scara_common::bus::{Bus, SlaveState};
use scara_common::event::EventLog;

/// Bus-health watchdog (§4.9 "Bus supervisor"). Runs every `N` cycles (10x
/// the cycle period per the spec); `poll` is meant to be called on that
/// reduced cadence by the caller, not every cycle.
pub struct BusSupervisor {
    expected_wkc: i32,
    slave_count: u16,
    operational: bool,
}

impl BusSupervisor {
    pub fn new(expected_wkc: i32, slave_count: u16) -> Self {
        Self {
            expected_wkc,
            slave_count,
            operational: false,
        }
    }

    /// Poll bus health given the latest working counter. Returns the new
    /// `EtherCATFault` flag value. Attempts in order, per non-operational
    /// slave: SAFE_OP+ACK, SAFE_OP->OP, reconfig, recover.
    pub fn poll<B: Bus>(&mut self, bus: &mut B, wkc: i32, log: &mut EventLog) -> bool {
        if wkc < self.expected_wkc {
            if self.operational {
                log.ethercat(format!(
                    "WKC less than expected {wkc} < {}, preventing further motion",
                    self.expected_wkc
                ));
                self.operational = false;
            }

            for slave in 1..=self.slave_count {
                match bus.statecheck(slave) {
                    SlaveState::SafeOp => {
                        log.ethercat(format!("Slave {slave} is in SAFE_OP, change to OPERATIONAL."));
                        bus.reconfig_slave(slave);
                    }
                    SlaveState::Error => {
                        log.ethercat(format!("Slave {slave} is in SAFE_OP + ERROR, attempting ack."));
                        bus.reconfig_slave(slave);
                    }
                    SlaveState::Init | SlaveState::PreOp => {
                        log.ethercat(format!("Slave {slave} reconfigured"));
                        bus.reconfig_slave(slave);
                    }
                    SlaveState::Operational => {}
                }
                if bus.statecheck(slave) == SlaveState::Init {
                    log.ethercat(format!("Slave {slave} lost, attempting recovery"));
                    bus.recover_slave(slave);
                }
            }
            true
        } else if !self.operational {
            log.ethercat("Operational state reached for all slaves");
            self.operational = true;
            false
        } else {
            false
        }
    }
}

/// Thermal watchdog (§4.9 "Thermal supervisor"). Polled at 1 Hz cadence by
/// the caller; reads a platform temperature sensor and requests shutdown
/// above the configured threshold.
pub struct ThermalSupervisor {
    threshold_millideg_c: i64,
}

impl ThermalSupervisor {
    pub fn new(threshold_millideg_c: i64) -> Self {
        Self { threshold_millideg_c }
    }

    /// Evaluate a freshly-read temperature sample (millidegrees C). Returns
    /// `true` if shutdown should be requested.
    pub fn evaluate(&self, millideg_c: i64, log: &mut EventLog) -> bool {
        if millideg_c > self.threshold_millideg_c {
            log.critical(format!(
                "CPU temperature too high: {:.1} C",
                millideg_c as f64 / 1000.0
            ));
            true
        } else {
            false
        }
    }

    /// Read the platform thermal-zone sensor file, matching
    /// `/sys/class/thermal/thermal_zone1/temp`'s millidegree-C convention.
    pub fn read_temperature(path: &std::path::Path) -> Option<i64> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scara_common::bus::BusInfo;

    struct FakeBus {
        states: std::collections::HashMap<u16, SlaveState>,
        reconfigured: Vec<u16>,
        recovered: Vec<u16>,
    }

    impl FakeBus {
        fn new(slave_count: u16, state: SlaveState) -> Self {
            let mut states = std::collections::HashMap::new();
            for s in 1..=slave_count {
                states.insert(s, state);
            }
            Self {
                states,
                reconfigured: Vec::new(),
                recovered: Vec::new(),
            }
        }
    }

    impl Bus for FakeBus {
        type Error = std::convert::Infallible;

        fn bring_up(&mut self, _iface: &str) -> Result<BusInfo, Self::Error> {
            Ok(BusInfo {
                slave_count: self.states.len() as u16,
                expected_wkc: self.states.len() as i32,
                dc_capable: true,
            })
        }
        fn send_process(&mut self) {}
        fn receive_process(&mut self) -> i32 {
            self.states.len() as i32
        }
        fn set_dc_sync0(&mut self, _slave: u16, _enabled: bool, _period_ns: u32, _shift_ns: i32) {}
        fn statecheck(&mut self, slave: u16) -> SlaveState {
            *self.states.get(&slave).unwrap_or(&SlaveState::Init)
        }
        fn reconfig_slave(&mut self, slave: u16) {
            self.reconfigured.push(slave);
            self.states.insert(slave, SlaveState::Operational);
        }
        fn recover_slave(&mut self, slave: u16) {
            self.recovered.push(slave);
        }
    }

    #[test]
    fn wkc_shortfall_sets_fault_and_recovers() {
        let mut sup = BusSupervisor::new(2, 2);
        let mut bus = FakeBus::new(2, SlaveState::SafeOp);
        let mut log = EventLog::new();
        let fault = sup.poll(&mut bus, 1, &mut log);
        assert!(fault);
        assert_eq!(bus.reconfigured, vec![1, 2]);
        assert!(!log.is_empty());
    }

    #[test]
    fn wkc_recovered_clears_fault_once() {
        let mut sup = BusSupervisor::new(2, 2);
        let mut bus = FakeBus::new(2, SlaveState::Operational);
        let mut log = EventLog::new();
        sup.poll(&mut bus, 1, &mut log); // degraded first
        let fault = sup.poll(&mut bus, 2, &mut log);
        assert!(!fault);
        let drained = log.drain();
        assert!(drained.iter().any(|e| e.message.contains("Operational state reached")));
    }

    #[test]
    fn thermal_threshold_trips_shutdown() {
        let sup = ThermalSupervisor::new(80_000);
        let mut log = EventLog::new();
        assert!(!sup.evaluate(79_000, &mut log));
        assert!(sup.evaluate(81_000, &mut log));
    }
}
