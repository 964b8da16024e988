//! Buffered read/write of `Frame` values over a `TcpStream` (spec's
//! supplemented wire layer). Structurally this is the teacher's
//! `Connection`: a `BufWriter` plus a growable `BytesMut` read buffer, with
//! the same check-then-parse decode loop, retargeted at NSQ's binary framing
//! instead of RESP.

use crate::frame::{self, Frame};

use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// The four-byte preamble nsqd expects before anything else on the wire.
const MAGIC_V2: &[u8; 4] = b"  V2";

#[derive(Debug)]
pub(crate) struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub(crate) fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Sends the protocol version preamble. Must be the first thing written
    /// on a freshly accepted socket.
    pub(crate) async fn send_magic(&mut self) -> crate::Result<()> {
        self.stream.write_all(MAGIC_V2).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads a single `Frame`, buffering more data from the socket as
    /// needed. Returns `None` on a clean EOF between frames.
    pub(crate) async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        use frame::Error::Incomplete;

        loop {
            let mut buf = Cursor::new(&self.buffer[..]);

            match frame::check(&mut buf) {
                Ok(_) => {
                    let len = buf.position() as usize;
                    buf.set_position(0);
                    let frame = frame::parse(&mut buf)?;
                    self.buffer.advance(len);
                    return Ok(Some(frame));
                }
                Err(Incomplete) => {}
                Err(e) => return Err(e.into()),
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    return Err("connection reset by peer".into());
                }
            }
        }
    }

    /// Writes a raw, already-encoded NSQ command line (and optional body) to
    /// the socket and flushes it. Command encoding itself lives in `cmd`.
    pub(crate) async fn write_command(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
