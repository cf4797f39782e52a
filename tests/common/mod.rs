#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Error, ErrorKind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ems_serio::codec::{wire_image, BREAK_IN};
use ems_serio::Transport;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Line {
    /// Bytes on their way to the driver's tty.
    rx: VecDeque<u8>,
    /// Data bytes the driver wrote.
    sent: Vec<u8>,
    breaks: usize,
    parity: bool,
}

/// A simulated EMS bus with one driver port on it. The test plays the master.
#[derive(Default)]
pub struct EmsBus {
    line: Mutex<Line>,
    data_available: Condvar,
}

impl EmsBus {
    pub fn new() -> Arc<EmsBus> {
        Default::default()
    }

    pub fn new_port(self: &Arc<Self>) -> BusPort {
        BusPort {
            bus: Arc::clone(self),
            do_read_error: false,
            do_write_error: false,
        }
    }

    /// Put a telegram and its break on the bus.
    pub fn inject(&self, telegram: &[u8]) {
        self.line
            .lock()
            .unwrap()
            .rx
            .extend(wire_image(telegram).iter());
        self.data_available.notify_all();
    }

    pub fn sent(&self) -> Vec<u8> {
        self.line.lock().unwrap().sent.clone()
    }

    pub fn breaks(&self) -> usize {
        self.line.lock().unwrap().breaks
    }

    /// Wait until the driver wrote `len` bytes and `breaks` breaks in total,
    /// and read back all echoes.
    pub fn wait_sent(&self, len: usize, breaks: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            {
                let line = self.line.lock().unwrap();
                if line.sent.len() >= len && line.breaks >= breaks && line.rx.is_empty() {
                    return line.sent.clone();
                }
            }
            if Instant::now() > deadline {
                panic!("Driver sent only {:02x?}", self.sent());
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

/// The driver's end of the bus. Every written byte is echoed the way a tty
/// with parity marking reports it.
pub struct BusPort {
    bus: Arc<EmsBus>,
    pub do_read_error: bool,
    pub do_write_error: bool,
}

impl Transport for BusPort {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        if self.do_read_error {
            self.do_read_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO read error"));
        }
        let line = self.bus.line.lock().expect("Read mutex is poisoned");
        let mut line = self
            .bus
            .data_available
            .wait_timeout_while(line, timeout, |line| line.rx.is_empty())
            .expect("Mutex lock failed")
            .0;
        Ok(line.rx.pop_front())
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        if self.do_write_error {
            self.do_write_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO write error"));
        }
        let mut line = self.bus.line.lock().unwrap();
        if line.parity {
            line.breaks += 1;
            line.rx.extend(BREAK_IN.iter());
        } else {
            line.sent.push(byte);
            line.rx.push_back(byte);
            if byte == 0xff {
                line.rx.push_back(0xff);
            }
        }
        drop(line);
        self.bus.data_available.notify_all();
        Ok(())
    }

    fn set_parity_mode(&mut self, enabled: bool) -> io::Result<()> {
        self.bus.line.lock().unwrap().parity = enabled;
        Ok(())
    }
}
