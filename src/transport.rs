//! The byte channel the driver talks to the bus through.

use core::time::Duration;
use std::io;

/// A duplex byte channel to the bus, configured for parity marking on input.
///
/// Every byte written to the bus is also received back, since all parties see
/// all bus traffic. Framing and parity errors are reported in-band: the erroneous
/// byte is preceded by `0xff 0x00`, and a literal `0xff` is doubled.
pub trait Transport {
    /// Wait up to `timeout` for a byte. Returns `Ok(None)` if none arrived in time.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Write a single byte to the bus.
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Enable or disable the even parity bit on transmission.
    ///
    /// A `0x00` sent with even parity keeps the 9th bit low, which the other
    /// parties receive as a break.
    fn set_parity_mode(&mut self, enabled: bool) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }

    fn set_parity_mode(&mut self, enabled: bool) -> io::Result<()> {
        (**self).set_parity_mode(enabled)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }

    fn set_parity_mode(&mut self, enabled: bool) -> io::Result<()> {
        (**self).set_parity_mode(enabled)
    }
}
