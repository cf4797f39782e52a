//! Range-checked bus address, and the header types shared by the receive and
//! transmit paths.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::ops::Deref;

use crate::{HEADER_LEN, READ_FLAG};

/// Error type for this module
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid EMS bus address.
    #[snafu(display("Invalid address"))]
    InvalidAddress,
}

const fn invalid_address() -> InvalidAddressSnafu {
    InvalidAddressSnafu
}

/// Address is a range-checked [0, 127] integer, representing a device on the bus.
///
/// ## Example
/// ```
/// use ems_serio::Address;
/// use std::convert::TryInto;
/// let boiler = Address::new(0x08).unwrap();
/// let boiler: Address = 0x08.try_into().unwrap();
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Address(u8);

/// Create a new [`Address`], panics if it is out of range.
pub const fn addr(a: u8) -> Address {
    if a <= 0x7f {
        return Address(a);
    }
    panic!("Invalid address.")
}

impl Address {
    /// Create a new address, checking that the address is in \[0, 127\].
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if `address` is out of range.
    pub fn new(address: impl TryInto<u8>) -> Result<Self, Error> {
        let address = address.try_into().ok().with_context(invalid_address)?;
        ensure!(address <= 0x7f, invalid_address());
        Ok(Self(address))
    }

    /// Address carried in the low seven bits of a token or destination byte.
    pub const fn from_masked(byte: u8) -> Self {
        Self(byte & !READ_FLAG)
    }

    /// Device addresses start at the bus master, lower ones are reserved.
    pub const fn is_device(self) -> bool {
        self.0 >= 0x08
    }
}

impl Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<u8> for Address {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#04x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// The destination byte of a data telegram.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Destination {
    pub address: Address,
    pub read: bool,
}

impl From<u8> for Destination {
    fn from(byte: u8) -> Self {
        Self {
            address: Address::from_masked(byte),
            read: byte & READ_FLAG != 0,
        }
    }
}

/// First four bytes of a data telegram.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Header {
    pub src: u8,
    pub dst: Destination,
    pub kind: u8,
    pub offset: u8,
}

/// Header the immediate answer to a read request has to carry.
///
/// The responder swaps source and destination, and echoes the message type
/// and offset of the request.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub struct ReadExpectation([u8; HEADER_LEN]);

impl ReadExpectation {
    pub fn new(responder: Address, requester: u8, kind: u8, offset: u8) -> Self {
        Self([*responder, requester, kind, offset])
    }

    /// Expectation for a read request, given the request header.
    pub fn for_request(header: &Header) -> Self {
        Self::new(header.dst.address, header.src, header.kind, header.offset)
    }

    /// Does the telegram start with the expected header?
    pub fn matches(&self, telegram: &[u8]) -> bool {
        telegram.get(..HEADER_LEN) == Some(&self.0[..])
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.0
    }
}
