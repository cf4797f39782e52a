//! Framing of telegrams on a parity-marked serial stream.
//!
//! Telegrams on the EMS bus are separated by a break, a `0x00` with the 9th
//! bit low. The tty is configured to mark framing and parity errors in-band,
//! so a break is read as `0xff 0x00 0x00` and a literal `0xff` as `0xff 0xff`.
//!
//! [`Decoder`] reverses this marking byte by byte, and [`send_break`] produces
//! the break that terminates an outgoing telegram.

use std::io;

use arrayvec::ArrayVec;

use crate::buffer::{Buffer, Push};
use crate::transport::Transport;
use crate::{Telegram, MAX_TELEGRAM_LEN};

/// A break as it is received from a parity-marking tty.
pub const BREAK_IN: [u8; 3] = [0xff, 0x00, 0x00];

/// The byte sent with even parity to produce a break.
pub const BREAK_OUT: u8 = 0x00;

const MARK: u8 = 0xff;

/// Longest receive-side image of a telegram: every byte doubled, plus the break.
pub const MAX_WIRE_LEN: usize = 2 * MAX_TELEGRAM_LEN + BREAK_IN.len();

/// Receive-side representation of a telegram.
pub type WireImage = ArrayVec<u8, MAX_WIRE_LEN>;

/// Escape state of the decoder.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Escape {
    /// Plain data.
    Normal,
    /// A `0xff` was read.
    Mark,
    /// `0xff 0x00` was read, the next byte had a framing or parity error.
    Marked,
}

/// What the decoder did with a byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// More bytes are needed.
    NeedData,
    /// A break was read, the telegram is complete.
    Break,
    /// The byte did not fit into the buffer. Reported once per telegram.
    Overflow,
    /// `0xff` followed by something else than `0x00` or `0xff`.
    InvalidEscape(u8),
    /// A byte other than `0x00` was received with a framing or parity error.
    ParityError(u8),
}

/// Decoder for the parity-marked receive stream.
#[derive(Debug)]
pub struct Decoder {
    escape: Escape,
    buffer: Buffer,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            escape: Escape::Normal,
            buffer: Buffer::new(),
        }
    }

    /// Start a new telegram, discarding anything received so far.
    pub fn reset(&mut self) {
        self.escape = Escape::Normal;
        self.buffer.clear();
    }

    pub fn escape(&self) -> Escape {
        self.escape
    }

    /// Feed one received byte.
    pub fn feed(&mut self, byte: u8) -> Decoded {
        match (self.escape, byte) {
            (Escape::Normal, MARK) => {
                self.escape = Escape::Mark;
                Decoded::NeedData
            }
            (Escape::Normal, _) => self.store(byte),
            (Escape::Mark, 0x00) => {
                self.escape = Escape::Marked;
                Decoded::NeedData
            }
            (Escape::Mark, MARK) => {
                self.escape = Escape::Normal;
                self.store(MARK)
            }
            (Escape::Mark, _) => {
                self.escape = Escape::Normal;
                Decoded::InvalidEscape(byte)
            }
            (Escape::Marked, 0x00) => {
                self.escape = Escape::Normal;
                Decoded::Break
            }
            (Escape::Marked, _) => {
                self.escape = Escape::Normal;
                Decoded::ParityError(byte)
            }
        }
    }

    /// The telegram received so far.
    pub fn telegram(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    /// The current telegram lost bytes beyond [`MAX_TELEGRAM_LEN`].
    pub fn overflowed(&self) -> bool {
        self.buffer.overflowed()
    }

    /// Take the received telegram and start a new one.
    pub fn take(&mut self) -> Telegram {
        self.escape = Escape::Normal;
        self.buffer.take()
    }

    fn store(&mut self, byte: u8) -> Decoded {
        match self.buffer.push(byte) {
            Push::Overflow => Decoded::Overflow,
            Push::Stored | Push::Dropped => Decoded::NeedData,
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// The bytes a parity-marking receiver reads for `telegram`, including the break.
///
/// Telegrams longer than [`MAX_TELEGRAM_LEN`] are truncated.
pub fn wire_image(telegram: &[u8]) -> WireImage {
    let mut wire = WireImage::new();
    for byte in telegram.iter().take(MAX_TELEGRAM_LEN) {
        wire.push(*byte);
        if *byte == MARK {
            wire.push(MARK);
        }
    }
    wire.try_extend_from_slice(&BREAK_IN)
        .expect("BUG: wire image buffer too small.");
    wire
}

/// Terminate a telegram with a break.
///
/// There is no way to send a 9 bit character through a POSIX tty, so the
/// parity bit is enabled while a `0x00` is written. Even parity of `0x00`
/// keeps the 9th bit low.
pub fn send_break<T: Transport + ?Sized>(transport: &mut T) -> io::Result<()> {
    transport.set_parity_mode(true)?;
    let written = transport.write_byte(BREAK_OUT);
    let restored = transport.set_parity_mode(false);
    written.and(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::EchoLink;

    fn decode(wire: &[u8]) -> (Telegram, Vec<Decoded>) {
        let mut decoder = Decoder::new();
        let mut events = Vec::new();
        for byte in wire {
            match decoder.feed(*byte) {
                Decoded::NeedData => {}
                Decoded::Break => return (decoder.take(), events),
                other => events.push(other),
            }
        }
        panic!("no break in {:02x?}", wire);
    }

    #[test]
    fn test_plain_telegram() {
        let (telegram, events) = decode(&[0x08, 0x00, 0x07, 0x00, 0x0b, 0xff, 0x00, 0x00]);
        assert_eq!(&telegram[..], &[0x08, 0x00, 0x07, 0x00, 0x0b]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_escaped_ff() {
        let wire = wire_image(&[0x0b, 0x90, 0xff, 0x00, 0xff, 0x6f]);
        assert_eq!(
            &wire[..],
            &[0x0b, 0x90, 0xff, 0xff, 0x00, 0xff, 0xff, 0x6f, 0xff, 0x00, 0x00]
        );
        let (telegram, events) = decode(&wire);
        assert_eq!(&telegram[..], &[0x0b, 0x90, 0xff, 0x00, 0xff, 0x6f]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let telegrams: [&[u8]; 4] = [
            &[0x8b],
            &[0xff],
            &[0x0b, 0x08, 0x35, 0x00, 0x11, 0x01, 0x6b],
            &[0xff; MAX_TELEGRAM_LEN],
        ];
        for telegram in telegrams.iter() {
            let (decoded, events) = decode(&wire_image(telegram));
            assert_eq!(&decoded[..], *telegram);
            assert!(events.is_empty());
        }
    }

    #[test]
    fn test_break_resets_escape_state() {
        let mut decoder = Decoder::new();
        for byte in [0x08, 0x00, 0x07].iter() {
            assert_eq!(decoder.feed(*byte), Decoded::NeedData);
        }
        assert_eq!(decoder.feed(0xff), Decoded::NeedData);
        assert_eq!(decoder.escape(), Escape::Mark);
        assert_eq!(decoder.feed(0x00), Decoded::NeedData);
        assert_eq!(decoder.escape(), Escape::Marked);
        assert_eq!(decoder.feed(0x00), Decoded::Break);
        assert_eq!(decoder.escape(), Escape::Normal);
        assert_eq!(&decoder.take()[..], &[0x08, 0x00, 0x07]);
        assert!(decoder.telegram().is_empty());
    }

    #[test]
    fn test_invalid_escape_is_discarded() {
        let (telegram, events) = decode(&[0x08, 0xff, 0x12, 0x09, 0xff, 0x00, 0x00]);
        assert_eq!(&telegram[..], &[0x08, 0x09]);
        assert_eq!(events, vec![Decoded::InvalidEscape(0x12)]);
    }

    #[test]
    fn test_parity_error_is_discarded() {
        let (telegram, events) = decode(&[0x08, 0xff, 0x00, 0x55, 0x09, 0xff, 0x00, 0x00]);
        assert_eq!(&telegram[..], &[0x08, 0x09]);
        assert_eq!(events, vec![Decoded::ParityError(0x55)]);
    }

    #[test]
    fn test_overflow() {
        let mut wire = vec![0x42; MAX_TELEGRAM_LEN + 5];
        wire.extend_from_slice(&BREAK_IN);
        let (telegram, events) = decode(&wire);
        assert_eq!(telegram.len(), MAX_TELEGRAM_LEN);
        assert_eq!(events, vec![Decoded::Overflow]);
    }

    #[test]
    fn test_overflow_flag() {
        let mut decoder = Decoder::new();
        for _ in 0..MAX_TELEGRAM_LEN {
            decoder.feed(0x42);
        }
        assert!(!decoder.overflowed());
        assert_eq!(decoder.feed(0x42), Decoded::Overflow);
        assert!(decoder.overflowed());
        decoder.reset();
        assert!(!decoder.overflowed());
    }

    #[test]
    fn test_reset() {
        let mut decoder = Decoder::new();
        decoder.feed(0x08);
        decoder.feed(0xff);
        decoder.reset();
        assert_eq!(decoder.escape(), Escape::Normal);
        assert!(decoder.telegram().is_empty());
    }

    #[test]
    fn test_send_break() {
        let mut link = EchoLink::new();
        send_break(&mut link).unwrap();
        assert_eq!(link.breaks, 1);
        assert!(link.tx.is_empty());
        // parity is off again, so the next byte is plain data
        link.write_byte(0x0b).unwrap();
        assert_eq!(link.tx, vec![0x0b]);
    }
}
