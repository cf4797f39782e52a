//! Bus driver for the EMS heating appliance bus.
//!
//! The EMS bus is a half-duplex, token passing serial bus. A bus master hands
//! the bus to one device at a time by sending a poll token. The polled device
//! may broadcast, write to another device (acknowledged with `0x01`) or read
//! from another device (answered immediately) before it releases the bus again.
//!
//! The crate is layered like the bus itself:
//!
//! - [`codec`] turns the parity-marked byte stream of a tty into telegrams, and
//!   produces the break that terminates an outgoing telegram.
//! - [`transmit`] sends a telegram with echo verification.
//! - [`bus`] is the arbitration state machine that decides what to do with
//!   every received telegram, and what to send when we are polled.
//! - [`driver`] runs the state machine on a worker thread between a
//!   [`Transport`] and two [`PacketQueue`]s.
//!
//! # Example
//!
//! ```no_run
//! use ems_serio::{Config, Driver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut driver = Driver::new(Config::default());
//! driver.start("/dev/ttyAMA0")?;
//!
//! let (outbound, inbound) = driver.queues().expect("queues are open while running");
//! // Read the UBA monitor message from the boiler (0x08).
//! outbound.try_send(&[0x0b, 0x88, 0x18, 0x00, 0x20, 0x00])?;
//! if let Some(telegram) = inbound.recv_timeout(std::time::Duration::from_secs(5)) {
//!     println!("{:02x?}", &telegram[..]);
//! }
//!
//! driver.stop()?;
//! driver.join();
//! println!("{}", driver.statistics());
//! # Ok(()) }
//! ```

use core::time::Duration;

use arrayvec::ArrayVec;

#[macro_use]
mod logging;

mod buffer;
pub mod bus;
pub mod codec;
pub mod crc;
pub mod driver;
mod nom_parser;
pub mod queue;
pub mod serial;
pub mod stats;
pub mod transmit;
pub mod transport;
pub mod types;

pub use crate::bus::{Bus, BusState};
pub use crate::crc::{crc, crc_ok};
pub use crate::driver::{Config, Driver, StopHandle};
pub use crate::logging::{mask_from_bits, LogCategory, LogMask};
pub use crate::queue::PacketQueue;
pub use crate::serial::SerialTransport;
pub use crate::stats::Statistics;
pub use crate::transport::Transport;
pub use crate::types::{addr, Address};

/// Longest telegram that is accepted from the bus or the outbound queue.
pub const MAX_TELEGRAM_LEN: usize = 32;

/// Shortest data telegram: source, destination, type, offset, one data byte, CRC.
pub const MIN_DATA_LEN: usize = 6;

/// Length of the header compared when matching a read response.
pub const HEADER_LEN: usize = 4;

/// A raw telegram as it is received from or sent to the bus.
pub type Telegram = ArrayVec<u8, MAX_TELEGRAM_LEN>;

/// Bus address of the bus master.
pub const MASTER_ID: Address = addr(0x08);

/// Destination address of broadcast telegrams.
pub const BROADCAST_ID: Address = addr(0x00);

/// Our own bus address unless configured otherwise.
pub const CLIENT_ID: Address = addr(0x0b);

/// Token value acknowledging a write.
pub const ACK: u8 = 0x01;

/// Flag in the destination byte marking a read request.
pub const READ_FLAG: u8 = 0x80;

/// Time to wait for the echo of a written byte, and for the break acknowledgment.
pub const ECHO_TIMEOUT: Duration = Duration::from_millis(200);

/// How long we may keep the bus after being polled before we have to release it.
pub const MAX_BUS_TIME: Duration = Duration::from_micros(200 * 1000);

/// A failed outbound telegram is retried this many times before it is dropped.
pub const MAX_TX_RETRIES: u8 = 5;

/// Serial line speed of the EMS bus.
pub const BAUD_RATE: u32 = 9600;
