use nom::branch::alt;
use nom::combinator::{all_consuming, map, verify};
use nom::number::complete::u8;
use nom::sequence::tuple;
use nom::IResult;

use crate::types::{Address, Destination, Header};
use crate::{ACK, MIN_DATA_LEN, READ_FLAG};

type Buf = [u8];

/// Meaning of a single byte telegram.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(crate) enum Token {
    /// Acknowledgment of a write.
    Ack,
    /// The given device gives the bus back to the master.
    Release(Address),
    /// The master hands the bus to the given device.
    Assign(Address),
    Unknown(u8),
}

/// Classification of a received telegram.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(crate) enum Frame {
    Token(Token),
    Data(Header),
    /// Longer than a token, but too short to be a data telegram.
    Short,
}

pub(crate) fn parse_telegram(buf: &Buf) -> Frame {
    if buf.len() == 1 {
        return Frame::Token(parse_token(buf));
    }
    if buf.len() < MIN_DATA_LEN {
        return Frame::Short;
    }
    match header(buf) {
        Ok((_payload, header)) => Frame::Data(header),
        Err(_) => Frame::Short,
    }
}

fn parse_token(buf: &Buf) -> Token {
    match all_consuming(alt((ack, release, assign)))(buf) {
        Ok((_, token)) => token,
        Err(_) => Token::Unknown(buf[0]),
    }
}

fn ack(buf: &Buf) -> IResult<&Buf, Token> {
    map(verify(u8, |b: &u8| *b == ACK), |_| Token::Ack)(buf)
}

fn release(buf: &Buf) -> IResult<&Buf, Token> {
    map(verify(u8, |b: &u8| (0x08..READ_FLAG).contains(b)), |b| {
        Token::Release(Address::from_masked(b))
    })(buf)
}

fn assign(buf: &Buf) -> IResult<&Buf, Token> {
    map(verify(u8, |b: &u8| b & READ_FLAG != 0), |b| {
        Token::Assign(Address::from_masked(b))
    })(buf)
}

fn header(buf: &Buf) -> IResult<&Buf, Header> {
    map(tuple((u8, u8, u8, u8)), |(src, dst, kind, offset)| Header {
        src,
        dst: Destination::from(dst),
        kind,
        offset,
    })(buf)
}
