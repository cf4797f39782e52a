//! Bus statistics.
//!
//! The counters are written by the worker only and read by anyone holding the
//! driver. Each counter is read atomically, a [`Statistics`] snapshot as a whole
//! is not.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::logging::LogMask;

#[derive(Debug, Default)]
pub struct Stats {
    pub rx_mac_errors: AtomicU32,
    pub rx_total: AtomicU32,
    pub rx_success: AtomicU32,
    pub rx_short: AtomicU32,
    pub rx_sender: AtomicU32,
    pub rx_format: AtomicU32,
    pub tx_total: AtomicU32,
    pub tx_fail: AtomicU32,
}

pub(crate) fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Stats {
    pub fn snapshot(&self, log_mask: LogMask, running: bool) -> Statistics {
        let get = |counter: &AtomicU32| counter.load(Ordering::Relaxed);
        Statistics {
            rx_mac_errors: get(&self.rx_mac_errors),
            rx_total: get(&self.rx_total),
            rx_success: get(&self.rx_success),
            rx_short: get(&self.rx_short),
            rx_sender: get(&self.rx_sender),
            rx_format: get(&self.rx_format),
            tx_total: get(&self.tx_total),
            tx_fail: get(&self.tx_fail),
            log_mask,
            running,
        }
    }
}

/// A read-only copy of the bus statistics.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Tokens that were unknown or out of sequence.
    pub rx_mac_errors: u32,
    /// Data telegrams received.
    pub rx_total: u32,
    /// Data telegrams passed on to the inbound queue.
    pub rx_success: u32,
    /// Telegrams too short to be data telegrams.
    pub rx_short: u32,
    /// Telegrams from a device that did not own the bus.
    pub rx_sender: u32,
    /// Telegrams with an invalid destination or an unexpected read response.
    pub rx_format: u32,
    /// Transmissions started.
    pub tx_total: u32,
    /// Transmissions that were not echoed or not acknowledged.
    pub tx_fail: u32,
    pub log_mask: LogMask,
    pub running: bool,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics")?;
        writeln!(f, "RX bus access errors    {}", self.rx_mac_errors)?;
        writeln!(f, "RX total                {}", self.rx_total)?;
        writeln!(f, "RX success              {}", self.rx_success)?;
        writeln!(f, "RX too short            {}", self.rx_short)?;
        writeln!(f, "RX wrong sender         {}", self.rx_sender)?;
        writeln!(f, "RX bad format           {}", self.rx_format)?;
        writeln!(f, "TX total                {}", self.tx_total)?;
        write!(f, "TX failures             {}", self.tx_fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::default_mask;

    #[test]
    fn test_snapshot() {
        let stats = Stats::default();
        bump(&stats.rx_total);
        bump(&stats.rx_total);
        bump(&stats.tx_fail);
        let snapshot = stats.snapshot(default_mask(), true);
        assert_eq!(snapshot.rx_total, 2);
        assert_eq!(snapshot.tx_fail, 1);
        assert_eq!(snapshot.rx_success, 0);
        assert!(snapshot.running);

        let table = snapshot.to_string();
        assert!(table.starts_with("Statistics\n"));
        assert!(table.contains("RX total                2\n"));
        assert!(table.ends_with("TX failures             1"));
    }
}
