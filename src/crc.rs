//! EMS telegram checksum.

use crate::types::Address;

/// Compute the EMS CRC of a telegram.
///
/// The last byte of `telegram` is the CRC slot and is not part of the sum.
pub fn crc(telegram: &[u8]) -> u8 {
    let data = match telegram.split_last() {
        Some((_crc, data)) => data,
        None => return 0,
    };
    data.iter().fold(0u8, |crc, byte| {
        let shifted = crc << 1;
        let crc = if crc & 0x80 != 0 {
            shifted ^ 0x19
        } else {
            shifted
        };
        crc ^ byte
    })
}

/// Check the trailing CRC byte of a received telegram.
pub fn crc_ok(telegram: &[u8]) -> bool {
    match telegram.last() {
        Some(received) => *received == crc(telegram),
        None => false,
    }
}

/// Set the source address and recompute the CRC of an outbound data telegram.
pub(crate) fn stamp(telegram: &mut [u8], source: Address) {
    if let Some(src) = telegram.first_mut() {
        *src = *source;
    }
    let sum = crc(telegram);
    if let Some(last) = telegram.last_mut() {
        *last = sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr;

    #[test]
    fn test_crc() {
        assert_eq!(crc(&[0x0b, 0x08, 0x35, 0x00, 0x11, 0x01, 0x00]), 0x6b);
        assert_eq!(crc(&[0x08, 0x00, 0x07, 0x00, 0x0b, 0x80, 0x00, 0x00]), 0x77);
        // the carry out of bit 7 folds in 0x19
        assert_eq!(crc(&[0x0b, 0x90, 0xff, 0x00, 0x00, 0x6f, 0x03, 0x00]), 0xe3);
        assert_eq!(crc(&[]), 0);
        assert_eq!(crc(&[0x42]), 0);
    }

    #[test]
    fn test_crc_ok() {
        assert!(crc_ok(&[0x0b, 0x08, 0x35, 0x00, 0x11, 0x01, 0x6b]));
        assert!(!crc_ok(&[0x0b, 0x08, 0x35, 0x00, 0x11, 0x01, 0x6c]));
        assert!(!crc_ok(&[]));
    }

    #[test]
    fn test_stamp() {
        let mut telegram = [0x00, 0x08, 0x35, 0x00, 0x11, 0x01, 0xaa];
        stamp(&mut telegram, addr(0x0b));
        assert_eq!(telegram, [0x0b, 0x08, 0x35, 0x00, 0x11, 0x01, 0x6b]);
    }
}
