//! [`Transport`] on a local tty.
//!
//! The port is opened with `serialport` and then tuned with termios directly:
//! `serialport` only knows parity checking with `IGNPAR`, which would swallow
//! the breaks that delimit the telegrams. The termios calls go through a
//! second handle on the same tty, the settings belong to the device.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use nix::sys::termios::{self, ControlFlags, InputFlags, SetArg, Termios};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits, TTYPort};
use snafu::ResultExt;

use crate::driver::{Error, OpenPortSnafu, TermiosSnafu};
use crate::transport::Transport;
use crate::BAUD_RATE;

/// A tty configured for the EMS bus: 9600 8N1 with parity marking on input.
pub struct SerialTransport {
    port: TTYPort,
    control: File,
    normal: Termios,
    parity: Termios,
    timeout: Duration,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<Self, Error> {
        let timeout = crate::bus::READ_POLL_INTERVAL;
        // before serialport locks the tty with TIOCEXCL
        let control = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY | nix::libc::O_NONBLOCK)
            .open(path)
            .map_err(serialport::Error::from)
            .context(OpenPortSnafu { port: path })?;
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open_native()
            .context(OpenPortSnafu { port: path })?;

        let mut normal = termios::tcgetattr(&control).context(TermiosSnafu)?;
        // breaks and framing errors arrive in-band as 0xff 0x00 <byte>
        normal.input_flags.insert(InputFlags::PARMRK);
        normal.input_flags.remove(
            InputFlags::IGNPAR
                | InputFlags::INPCK
                | InputFlags::ISTRIP
                | InputFlags::IGNBRK
                | InputFlags::BRKINT
                | InputFlags::IXON
                | InputFlags::IXOFF,
        );
        normal
            .control_flags
            .remove(ControlFlags::PARENB | ControlFlags::PARODD);
        let mut parity = normal.clone();
        parity.control_flags.insert(ControlFlags::PARENB);

        termios::tcsetattr(&control, SetArg::TCSANOW, &normal).context(TermiosSnafu)?;
        port.clear(ClearBuffer::All)
            .context(OpenPortSnafu { port: path })?;
        log::debug!("Opened {} at {} baud", path, BAUD_RATE);

        Ok(Self {
            port,
            control,
            normal,
            parity,
            timeout,
        })
    }
}

impl Transport for SerialTransport {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.port.write_all(&[byte])
    }

    fn set_parity_mode(&mut self, enabled: bool) -> io::Result<()> {
        let settings = if enabled { &self.parity } else { &self.normal };
        // the previous byte must leave the line with the old settings
        termios::tcsetattr(&self.control, SetArg::TCSADRAIN, settings)
            .map_err(io::Error::from)
    }
}
