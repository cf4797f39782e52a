use crate::Telegram;

/// Receive buffer for one telegram. Bytes beyond [`crate::MAX_TELEGRAM_LEN`] are dropped.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Telegram,
    overflowed: bool,
}

/// Result of pushing a byte into the buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Push {
    Stored,
    /// The first byte that did not fit.
    Overflow,
    /// Later bytes that did not fit, these are not reported again.
    Dropped,
}

impl Buffer {
    pub fn new() -> Buffer {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn push(&mut self, byte: u8) -> Push {
        if self.data.try_push(byte).is_ok() {
            Push::Stored
        } else if self.overflowed {
            Push::Dropped
        } else {
            self.overflowed = true;
            Push::Overflow
        }
    }

    /// Whether bytes were dropped since the last `take` or `clear`.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn take(&mut self) -> Telegram {
        self.overflowed = false;
        core::mem::take(&mut self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.overflowed = false;
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_TELEGRAM_LEN;

    #[test]
    fn test_overflow_reported_once() {
        let mut buf = Buffer::new();
        for i in 0..MAX_TELEGRAM_LEN {
            assert_eq!(buf.push(i as u8), Push::Stored);
        }
        assert_eq!(buf.push(0xaa), Push::Overflow);
        assert_eq!(buf.push(0xbb), Push::Dropped);
        assert_eq!(buf.len(), MAX_TELEGRAM_LEN);
        assert!(buf.overflowed());

        let telegram = buf.take();
        assert_eq!(telegram.len(), MAX_TELEGRAM_LEN);
        assert_eq!(buf.len(), 0);
        assert!(!buf.overflowed());
        assert_eq!(buf.push(0x01), Push::Stored);
        assert_eq!(buf.as_ref(), &[0x01]);
    }
}
