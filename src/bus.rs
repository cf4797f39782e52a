//! Bus arbitration state machine.
//!
//! The bus master polls the devices one after another by sending a token with
//! bit 7 set and the device address in the lower bits. The polled device owns
//! the bus until it sends its own address as a release token. While owning the
//! bus, a device may
//!
//! - broadcast a telegram (destination 0x00), which is not answered,
//! - write to another device, which answers with an ACK token (0x01),
//! - read from another device (destination ORed with 0x80), which answers
//!   immediately with a data telegram.
//!
//! [`Bus`] follows this conversation for every device, so it can tell valid
//! telegrams from garbage, and it transmits the telegrams of the outbound queue
//! whenever we are polled ourselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::{Decoded, Decoder};
use crate::crc::stamp;
use crate::driver::Shared;
use crate::logging::PacketDump;
use crate::nom_parser::{parse_telegram, Frame, Token};
use crate::queue::PacketQueue;
use crate::stats::bump;
use crate::transmit::transmit;
use crate::transport::Transport;
use crate::types::{Address, Destination, Header, ReadExpectation};
use crate::{
    Telegram, BROADCAST_ID, MASTER_ID, MAX_BUS_TIME, MAX_TELEGRAM_LEN, MAX_TX_RETRIES,
    MIN_DATA_LEN, READ_FLAG,
};

/// How long a single read may block before the stop flag is checked again.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Who is talking on the bus, as far as we can tell.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusState {
    /// The bus belongs to the master.
    Released,
    /// A device was polled and owns the bus.
    Assigned,
    /// The polled device wrote to another device and waits for the ACK.
    Wrote,
    /// The polled device read from another device and waits for the answer.
    Read,
}

/// A telegram from the outbound queue and its failed transmission attempts.
#[derive(Debug)]
struct Pending {
    telegram: Telegram,
    failures: u8,
}

/// The protocol state of the bus, owned by the worker.
#[derive(Debug)]
pub struct BusContext {
    client_id: Address,
    state: BusState,
    polled: Option<Address>,
    read_expected: ReadExpectation,
    pending: Option<Pending>,
    granted_at: Option<Instant>,
}

impl BusContext {
    pub fn new(client_id: Address) -> Self {
        Self {
            client_id,
            state: BusState::Released,
            polled: None,
            read_expected: ReadExpectation::default(),
            pending: None,
            granted_at: None,
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn polled(&self) -> Option<Address> {
        self.polled
    }

    pub fn client_id(&self) -> Address {
        self.client_id
    }

    /// Failed attempts of the pending outbound telegram, -1 if there is none.
    pub fn retry_state(&self) -> i8 {
        self.pending.as_ref().map_or(-1, |p| p.failures as i8)
    }

    fn we_are_polled(&self) -> bool {
        self.polled == Some(self.client_id)
    }

    fn polled_is(&self, src: u8) -> bool {
        self.polled.map_or(false, |polled| polled == src)
    }
}

/// The bus state machine together with the transport and the queues it serves.
pub struct Bus<T> {
    ctx: BusContext,
    transport: T,
    decoder: Decoder,
    outbound: PacketQueue,
    inbound: PacketQueue,
    shared: Arc<Shared>,
}

impl<T: Transport> Bus<T> {
    pub(crate) fn new(
        client_id: Address,
        transport: T,
        outbound: PacketQueue,
        inbound: PacketQueue,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            ctx: BusContext::new(client_id),
            transport,
            decoder: Decoder::new(),
            outbound,
            inbound,
            shared,
        }
    }

    pub fn context(&self) -> &BusContext {
        &self.ctx
    }

    /// Receive and process telegrams until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) {
        while let Some(telegram) = self.receive(stop) {
            self.handle_telegram(&telegram);
        }
    }

    /// Read bytes until a break completes a telegram.
    ///
    /// Returns `None` once `stop` is set. The flag is checked between reads,
    /// which block at most [`READ_POLL_INTERVAL`].
    pub fn receive(&mut self, stop: &AtomicBool) -> Option<Telegram> {
        let log = &self.shared.log;
        self.decoder.reset();
        let mut parity_errors = 0u32;
        loop {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            let byte = match self.transport.read_byte(READ_POLL_INTERVAL) {
                Ok(Some(byte)) => byte,
                Ok(None) => continue,
                Err(e) => {
                    bus_log!(log, Error, "read() failed: {}", e);
                    std::thread::sleep(READ_POLL_INTERVAL);
                    continue;
                }
            };
            bus_log!(log, Byte, "RD {:#04x}", byte);
            match self.decoder.feed(byte) {
                Decoded::NeedData => {}
                Decoded::Break => {
                    if parity_errors > 0 {
                        bus_log!(
                            log,
                            Error,
                            "Discarded {} bytes with parity errors",
                            parity_errors
                        );
                        parity_errors = 0;
                    }
                    if self.decoder.overflowed() {
                        bus_log!(
                            log,
                            Error,
                            "Discarded package longer than {} bytes",
                            MAX_TELEGRAM_LEN
                        );
                        bump(&self.shared.stats.rx_total);
                        bump(&self.shared.stats.rx_format);
                        self.decoder.reset();
                        continue;
                    }
                    return Some(self.decoder.take());
                }
                Decoded::Overflow => bus_log!(
                    log,
                    Error,
                    "Maximum packet size reached. Following characters ignored. \
                     Is your serial connected and is it detecting breaks?"
                ),
                Decoded::InvalidEscape(byte) => {
                    bus_log!(log, Error, "Ignored invalid escape 0xff {:#04x}", byte)
                }
                Decoded::ParityError(_) => parity_errors += 1,
            }
        }
    }

    /// Process one received telegram.
    pub fn handle_telegram(&mut self, telegram: &[u8]) {
        let log = &self.shared.log;
        match parse_telegram(telegram) {
            Frame::Token(token) => {
                bus_log!(log, Token, "{}", PacketDump::rx(telegram));
                self.handle_token(token);
            }
            Frame::Short => {
                bus_log!(log, Packet, "{}", PacketDump::rx(telegram));
                bump(&self.shared.stats.rx_total);
                bus_log!(log, Error, "Ignored short package");
                if matches!(self.ctx.state, BusState::Wrote | BusState::Read) {
                    self.ctx.state = BusState::Assigned;
                }
                bump(&self.shared.stats.rx_short);
            }
            Frame::Data(header) => {
                bus_log!(log, Packet, "{}", PacketDump::rx(telegram));
                bump(&self.shared.stats.rx_total);
                if self.validate(&header, telegram) {
                    self.accept(telegram);
                }
            }
        }
    }

    fn handle_token(&mut self, token: Token) {
        let log = &self.shared.log;
        let stats = &self.shared.stats;
        match token {
            Token::Ack => {
                if self.ctx.state != BusState::Wrote {
                    bus_log!(
                        log,
                        Error,
                        "Got an ACK without prior write message from {:?}",
                        self.ctx.polled
                    );
                    bump(&stats.rx_mac_errors);
                }
                if self.ctx.we_are_polled() {
                    // our write was acknowledged, we may send the next one
                    self.handle_poll();
                } else {
                    self.ctx.state = BusState::Assigned;
                }
            }
            Token::Release(id) => {
                if self.ctx.state != BusState::Assigned {
                    bus_log!(
                        log,
                        Error,
                        "Got bus release from {} without prior poll request",
                        id
                    );
                    bump(&stats.rx_mac_errors);
                }
                self.ctx.polled = None;
                self.ctx.state = BusState::Released;
            }
            Token::Assign(id) => {
                // a poll to a device that does not exist leaves us in Assigned
                if !matches!(self.ctx.state, BusState::Released | BusState::Assigned) {
                    bus_log!(
                        log,
                        Error,
                        "Got bus assign to {} without prior bus release from {:?}",
                        id,
                        self.ctx.polled
                    );
                    bump(&stats.rx_mac_errors);
                }
                self.ctx.polled = Some(id);
                if self.ctx.we_are_polled() {
                    self.ctx.granted_at = Some(Instant::now());
                    self.handle_poll();
                } else {
                    self.ctx.state = BusState::Assigned;
                }
            }
            Token::Unknown(byte) => {
                bus_log!(log, Error, "Ignored unknown MAC package {:#04x}", byte);
                bump(&stats.rx_mac_errors);
            }
        }
    }

    /// Check a data telegram against the bus state. Returns whether it is accepted.
    fn validate(&mut self, header: &Header, telegram: &[u8]) -> bool {
        let log = &self.shared.log;
        let stats = &self.shared.stats;
        let ctx = &mut self.ctx;

        // We don't track the bus timeouts of other devices, so the master may
        // talk while we still consider the bus assigned. Only the answer to a
        // read from the master keeps the state.
        if header.src == *MASTER_ID
            && (ctx.state != BusState::Read || !ctx.read_expected.matches(telegram))
        {
            ctx.state = BusState::Released;
            return true;
        }

        match ctx.state {
            BusState::Assigned => {
                if !ctx.polled_is(header.src) && header.src != *MASTER_ID {
                    bus_log!(
                        log,
                        Error,
                        "Ignored package from {:#04x} instead of polled {:?} or master",
                        header.src,
                        ctx.polled
                    );
                    bump(&stats.rx_sender);
                    return false;
                }
                let dst = header.dst.address;
                if header.dst.read {
                    if !dst.is_device() {
                        bus_log!(
                            log,
                            Error,
                            "Ignored read from {:#04x} to invalid address {}",
                            header.src,
                            dst
                        );
                        bump(&stats.rx_format);
                        return false;
                    }
                    ctx.read_expected = ReadExpectation::for_request(header);
                    ctx.state = BusState::Read;
                } else if dst == BROADCAST_ID {
                    // nothing to wait for
                } else if !dst.is_device() {
                    bus_log!(
                        log,
                        Error,
                        "Ignored write from {:#04x} to invalid address {}",
                        header.src,
                        dst
                    );
                    bump(&stats.rx_format);
                    return false;
                } else {
                    ctx.state = BusState::Wrote;
                }
                true
            }
            BusState::Read => {
                ctx.state = BusState::Assigned;
                if !ctx.read_expected.matches(telegram) {
                    bus_log!(
                        log,
                        Error,
                        "Ignored not expected read header: {:02x?}",
                        &telegram[..telegram.len().min(4)]
                    );
                    bump(&stats.rx_format);
                    return false;
                }
                if ctx.we_are_polled() {
                    // the answer to our own read, go on with the next telegram
                    self.handle_poll();
                }
                true
            }
            BusState::Wrote => {
                bus_log!(
                    log,
                    Error,
                    "Received package from {:#04x} when waiting for write ACK",
                    header.src
                );
                bump(&stats.rx_sender);
                false
            }
            BusState::Released => {
                if header.src != *MASTER_ID {
                    bus_log!(
                        log,
                        Error,
                        "Received package from {:#04x} when bus is not assigned",
                        header.src
                    );
                    bump(&stats.rx_sender);
                    return false;
                }
                true
            }
        }
    }

    /// Pass a valid telegram to the application.
    ///
    /// The CRC is left to the consumer, checking it here delays the answer to
    /// the next poll.
    fn accept(&mut self, telegram: &[u8]) {
        bump(&self.shared.stats.rx_success);
        if let Err(e) = self.inbound.try_send(telegram) {
            bus_log!(self.shared.log, Error, "RX: Could not add packet to queue: {}", e);
        }
    }

    /// We own the bus: send the next outbound telegram or release the bus.
    fn handle_poll(&mut self) {
        self.fetch_outbound();

        let held = self
            .ctx
            .granted_at
            .map_or(Duration::MAX, |granted| granted.elapsed());
        bus_log!(
            self.shared.log,
            Verbose,
            "Occupying bus since {} us",
            held.as_micros()
        );

        let telegram = match &self.ctx.pending {
            Some(pending) if held < MAX_BUS_TIME => pending.telegram.clone(),
            _ => {
                self.release_bus();
                return;
            }
        };

        bus_log!(self.shared.log, Packet, "{}", PacketDump::tx(&telegram));
        if !self.send(&telegram) {
            let failures = self.ctx.pending.as_mut().map_or(0, |pending| {
                pending.failures += 1;
                pending.failures
            });
            bus_log!(
                self.shared.log,
                Error,
                "TX failed, {}/{}",
                failures,
                MAX_TX_RETRIES
            );
            // give the bus back and try again on the next poll
            self.ctx.polled = None;
            self.ctx.state = BusState::Released;
            return;
        }

        self.ctx.pending = None;
        let dst = telegram.get(1).copied().unwrap_or(*BROADCAST_ID);
        if dst == *BROADCAST_ID {
            self.release_bus();
        } else if dst & READ_FLAG != 0 {
            let byte = |i: usize| telegram.get(i).copied().unwrap_or_default();
            self.ctx.read_expected = ReadExpectation::new(
                Destination::from(dst).address,
                byte(0),
                byte(2),
                byte(3),
            );
            self.ctx.state = BusState::Read;
        } else {
            self.ctx.state = BusState::Wrote;
        }
    }

    /// Take a new telegram from the outbound queue unless one is still pending.
    fn fetch_outbound(&mut self) {
        if let Some(pending) = &self.ctx.pending {
            if pending.failures <= MAX_TX_RETRIES {
                return;
            }
            bus_log!(
                self.shared.log,
                Error,
                "TX failed {} times. Dropping message.",
                pending.failures
            );
            self.ctx.pending = None;
        }
        if let Some(mut telegram) = self.outbound.try_recv() {
            if telegram.len() >= MIN_DATA_LEN {
                stamp(&mut telegram, self.ctx.client_id);
            }
            self.ctx.pending = Some(Pending {
                telegram,
                failures: 0,
            });
        }
    }

    fn release_bus(&mut self) {
        let release = [*self.ctx.client_id];
        bus_log!(self.shared.log, Token, "{}", PacketDump::tx(&release));
        if !self.send(&release) {
            bus_log!(self.shared.log, Error, "TX poll reply failed");
        }
        // our release token is consumed as echo, it never comes back through handle_token
        self.ctx.polled = None;
        self.ctx.state = BusState::Released;
    }

    fn send(&mut self, telegram: &[u8]) -> bool {
        bump(&self.shared.stats.tx_total);
        let sent = transmit(&mut self.transport, telegram, &self.shared.log);
        if sent != telegram.len() {
            bump(&self.shared.stats.tx_fail);
            return false;
        }
        true
    }
}
