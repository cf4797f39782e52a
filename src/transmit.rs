//! Echo verified transmission of telegrams.
//!
//! Every byte we write to the bus is read back. A byte is only considered sent
//! when its echo arrived unchanged within [`ECHO_TIMEOUT`]; a mismatch means
//! another party was talking at the same time. A telegram is complete once the
//! break was sent and read back.

use crate::codec::{send_break, BREAK_IN, BREAK_OUT};
use crate::logging::{LogFilter, PacketDump};
use crate::transport::Transport;
use crate::ECHO_TIMEOUT;

const ESCAPED: u8 = 0xff;

/// Transmit `telegram`, returning the number of bytes that were echoed.
///
/// Returns `telegram.len()` if all bytes were echoed and the break was
/// acknowledged. If the break is missing, the telegram counts as not sent
/// and 0 is returned.
pub fn transmit<T: Transport + ?Sized>(
    transport: &mut T,
    telegram: &[u8],
    log: &LogFilter,
) -> usize {
    let sent = send_bytes(transport, telegram, log);
    if sent < telegram.len() {
        return sent;
    }

    bus_log!(log, Byte, "WR {:#04x} BREAK", BREAK_OUT);
    if let Err(e) = send_break(transport) {
        bus_log!(log, Error, "Sending the break failed: {}", e);
        return 0;
    }
    if !receive_break(transport, log) {
        bus_log!(log, Error, "TX fail: {} not acknowledged", PacketDump::tx(telegram));
        return 0;
    }
    sent
}

fn send_bytes<T: Transport + ?Sized>(transport: &mut T, telegram: &[u8], log: &LogFilter) -> usize {
    for (i, byte) in telegram.iter().copied().enumerate() {
        bus_log!(log, Byte, "WR {:#04x}", byte);
        if let Err(e) = transport.write_byte(byte) {
            bus_log!(log, Error, "write() failed: {}", e);
            return i;
        }
        let echo = match read_echo(transport, log) {
            Some(echo) => echo,
            None => return i,
        };
        if echo != byte {
            bus_log!(
                log,
                Error,
                "TX fail: sent {:#04x} but echo is {:#04x}",
                byte,
                echo
            );
            return i;
        }
        if echo == ESCAPED {
            // the tty doubles a literal 0xff
            match read_echo(transport, log) {
                Some(ESCAPED) => {}
                Some(other) => {
                    bus_log!(
                        log,
                        Error,
                        "TX fail: parity escaping expected 0xff but got {:#04x}",
                        other
                    );
                    return i;
                }
                None => return i,
            }
        }
    }
    telegram.len()
}

fn read_echo<T: Transport + ?Sized>(transport: &mut T, log: &LogFilter) -> Option<u8> {
    match transport.read_byte(ECHO_TIMEOUT) {
        Ok(Some(echo)) => {
            bus_log!(log, Byte, "RD {:#04x}", echo);
            Some(echo)
        }
        Ok(None) => {
            bus_log!(log, Error, "Echo not received after {:?}", ECHO_TIMEOUT);
            None
        }
        Err(e) => {
            bus_log!(log, Error, "read() failed: {}", e);
            None
        }
    }
}

/// Wait for the break that terminates our own telegram.
pub(crate) fn receive_break<T: Transport + ?Sized>(transport: &mut T, log: &LogFilter) -> bool {
    for expected in BREAK_IN.iter().copied() {
        match read_echo(transport, log) {
            Some(byte) if byte == expected => {}
            Some(byte) => {
                bus_log!(
                    log,
                    Error,
                    "TX fail: expected break char {:#04x} but got {:#04x}",
                    expected,
                    byte
                );
                return false;
            }
            None => return false,
        }
    }
    true
}
