//! Category filtered logging on top of the `log` facade.
//!
//! Every message of the driver belongs to one [`LogCategory`]. The categories
//! that are printed are selected at runtime with a [`LogMask`], so the byte and
//! token traces of a busy bus cost nothing unless they were asked for.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use enumset::{EnumSet, EnumSetType};

/// Message categories. The declaration order defines the bit in the numeric mask.
#[derive(EnumSetType, Debug)]
pub enum LogCategory {
    /// Errors and protocol anomalies, 0x01
    Error,
    /// Start and stop, 0x02
    Info,
    /// Bus timing and setup details, 0x04
    Verbose,
    /// Received and transmitted data telegrams, 0x08
    Packet,
    /// Tokens: polls, releases and acknowledgments, 0x10
    Token,
    /// Every single byte read or written, 0x20
    Byte,
}

impl LogCategory {
    /// Level the messages of this category are logged with.
    pub const fn level(self) -> log::Level {
        match self {
            LogCategory::Error => log::Level::Error,
            LogCategory::Info => log::Level::Info,
            LogCategory::Verbose | LogCategory::Packet | LogCategory::Token => log::Level::Debug,
            LogCategory::Byte => log::Level::Trace,
        }
    }
}

/// Set of enabled categories.
pub type LogMask = EnumSet<LogCategory>;

/// Categories enabled unless configured otherwise.
pub fn default_mask() -> LogMask {
    LogCategory::Error | LogCategory::Info
}

/// Convert a numeric mask, ignoring unknown bits.
pub fn mask_from_bits(bits: u32) -> LogMask {
    LogMask::from_u32_truncated(bits)
}

/// Drop the categories the installed logger would discard anyway.
pub fn clamp_to_logger(mask: LogMask) -> LogMask {
    let max = log::max_level();
    mask.iter()
        .filter(|category| category.level() <= max)
        .collect()
}

/// The log mask shared between the worker and the controlling thread.
#[derive(Debug)]
pub struct LogFilter(AtomicU32);

impl LogFilter {
    pub fn new(mask: LogMask) -> Self {
        Self(AtomicU32::new(mask.as_u32()))
    }

    pub fn mask(&self) -> LogMask {
        mask_from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set_mask(&self, mask: LogMask) {
        self.0.store(mask.as_u32(), Ordering::Relaxed);
    }

    pub fn enabled(&self, category: LogCategory) -> bool {
        self.mask().contains(category)
    }
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::new(default_mask())
    }
}

/// Log a message if its category is enabled in the filter.
///
/// The arguments are only formatted when the message is printed.
macro_rules! bus_log {
    ($filter:expr, $category:ident, $($arg:tt)+) => {
        if $filter.enabled($crate::logging::LogCategory::$category) {
            log::log!($crate::logging::LogCategory::$category.level(), $($arg)+);
        }
    };
}

/// Direction of a dumped telegram.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Hex dump of a telegram, with gaps after the header and before the CRC.
pub struct PacketDump<'a> {
    pub direction: Direction,
    pub telegram: &'a [u8],
}

impl<'a> PacketDump<'a> {
    pub fn rx(telegram: &'a [u8]) -> Self {
        Self {
            direction: Direction::Rx,
            telegram,
        }
    }

    pub fn tx(telegram: &'a [u8]) -> Self {
        Self {
            direction: Direction::Tx,
            telegram,
        }
    }
}

impl fmt::Display for PacketDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.direction {
            Direction::Rx => "RX:",
            Direction::Tx => "TX:",
        })?;
        let crc_pos = self.telegram.len().checked_sub(2);
        for (i, byte) in self.telegram.iter().enumerate() {
            write!(f, " {:02x}", byte)?;
            if i == 3 || Some(i) == crc_pos {
                f.write_str(" ")?;
            }
        }
        Ok(())
    }
}
