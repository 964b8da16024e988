//! The wire-level `ConnHandle` implementation and the single task that
//! drives one live nsqd connection: reads frames off the socket, turns them
//! into `ConnEvent`s for the reader's mailbox, answers heartbeats, and
//! relays the outbound `RDY`/`FIN`/`REQ`/`TOUCH` commands the flow-control
//! core decides to send. This is the "event wiring" piece named in the
//! crate's overview; it has no say over *when* credit moves, only over how
//! a decision already made by `ConnectionRdy`/`ReaderRdy` reaches nsqd.

use crate::cmd::{Cls, Fin, Identify, Nop, Req, Rdy, Sub, Touch};
use crate::conn::Connection;
use crate::connection_rdy::ConnHandle;
use crate::event::{ConnEvent, Stimulus};
use crate::frame::Frame;
use crate::shutdown::Shutdown;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

/// Outbound commands queued for the connection's writer loop. Each variant
/// is already a fully-formed decision (e.g. "send RDY 5"); encoding happens
/// on the writer task, not the caller.
#[derive(Debug)]
enum Outbound {
    Rdy(Rdy),
    Fin(Fin),
    Req(Req),
    Touch(Touch),
    Cls(Cls),
}

impl Outbound {
    fn encode(&self) -> Vec<u8> {
        match self {
            Outbound::Rdy(c) => c.encode(),
            Outbound::Fin(c) => c.encode(),
            Outbound::Req(c) => c.encode(),
            Outbound::Touch(c) => c.encode(),
            Outbound::Cls(c) => c.encode(),
        }
    }
}

/// The `ConnHandle` the flow-control core drives. Cheap to hold and cheap to
/// clone: sending a command is just pushing onto an unbounded channel for
/// the connection's own task to encode and write.
///
/// `fin`/`req` double as the "message-handling callback surface" named in
/// spec §1 as an external collaborator: the application calls these once it
/// is done with a message, and besides writing the wire command they also
/// raise the `FINISHED`/`REQUEUED` stimulus (spec §6) that drives
/// `ReaderRdy::handle_finished`/`handle_requeued`. Nothing else in this
/// crate produces those two stimuli — the wire layer only ever reads
/// `MESSAGE` frames off the socket.
#[derive(Debug, Clone)]
pub struct TcpNsqConnection {
    id: String,
    max_rdy_count: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<Stimulus>,
}

impl TcpNsqConnection {
    pub fn fin(&self, id: crate::frame::MessageId) {
        let _ = self.outbound.send(Outbound::Fin(Fin(id)));
        let _ = self.events.send(Stimulus::Conn(self.id.clone(), ConnEvent::Finished));
    }

    pub fn req(&self, id: crate::frame::MessageId, timeout_ms: u64) {
        let _ = self.outbound.send(Outbound::Req(Req { id, timeout_ms }));
        let _ = self.events.send(Stimulus::Conn(self.id.clone(), ConnEvent::Requeued));
    }

    pub fn touch(&self, id: crate::frame::MessageId) {
        let _ = self.outbound.send(Outbound::Touch(Touch(id)));
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Cls(Cls));
    }
}

impl ConnHandle for TcpNsqConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn max_rdy_count(&self) -> u64 {
        self.max_rdy_count
    }

    fn set_rdy(&mut self, n: u64) {
        // The writer task may already be gone (connection closed); a send
        // failure here just means the RDY decision has nowhere left to go.
        let _ = self.outbound.send(Outbound::Rdy(Rdy(n)));
    }
}

/// Dials `addr`, runs the `IDENTIFY`/`SUB` handshake, and spawns the task
/// that owns the connection for the rest of its life. Returns the
/// `ConnHandle` the caller hands to `ReaderRdy::add_connection`, along with
/// nsqd's advertised `max_rdy_count` ceiling from the `IDENTIFY` reply.
///
/// `max_rdy_count` is passed in rather than parsed from nsqd's negotiated
/// config JSON: this crate's scope is flow control, not full config
/// negotiation, so the ceiling is supplied by the caller (typically from an
/// earlier, separate config round-trip).
#[instrument(skip(client_id, events, shutdown), fields(%addr))]
pub async fn connect(
    addr: &str,
    topic: &str,
    channel: &str,
    client_id: &str,
    max_rdy_count: u64,
    events: mpsc::UnboundedSender<Stimulus>,
    mut shutdown: Shutdown,
) -> crate::Result<TcpNsqConnection> {
    let socket = TcpStream::connect(addr).await?;
    let id = format!("{}#{}", addr, client_id);
    let mut conn = Connection::new(socket);

    conn.send_magic().await?;
    conn.write_command(&Identify::new(serde_json::json!({ "client_id": client_id })).encode())
        .await?;

    // nsqd acks IDENTIFY and SUB separately — two distinct response frames,
    // not one combined one. Consume IDENTIFY's own ack first so it isn't
    // left for the main read loop (or the SUB check below) to misread.
    match conn.read_frame().await? {
        Some(Frame::Response(_)) => {}
        Some(Frame::Error(body)) => {
            return Err(format!("IDENTIFY rejected: {}", String::from_utf8_lossy(&body)).into());
        }
        Some(_) => return Err("unexpected frame before IDENTIFY acknowledgement".into()),
        None => return Err("connection closed during IDENTIFY handshake".into()),
    }

    conn.write_command(&Sub::new(topic, channel).encode()).await?;

    // Wait for nsqd's OK before admitting the connection: spec §3's
    // lifecycle enters a connection into the active set "after the broker
    // acknowledges subscription", and spec §4.1 ties the state machine's
    // start to a `SUBSCRIBED` event. Folding that wait into the handshake
    // here, rather than raising a separate async event once `connect`
    // already returned, keeps the "entered active set" transition
    // synchronous with the caller's `add_connection` call.
    match conn.read_frame().await? {
        Some(Frame::Response(body)) if &body[..] == b"OK" => {}
        Some(Frame::Error(body)) => {
            return Err(format!("SUB rejected: {}", String::from_utf8_lossy(&body)).into());
        }
        Some(_) => return Err("unexpected frame before SUB acknowledgement".into()),
        None => return Err("connection closed during SUB handshake".into()),
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let handle = TcpNsqConnection {
        id: id.clone(),
        max_rdy_count,
        outbound: outbound_tx,
        events: events.clone(),
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = conn.read_frame() => {
                    match frame {
                        Ok(Some(frame)) => {
                            if frame.is_heartbeat() {
                                if conn.write_command(&Nop.encode()).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                            if !deliver(&id, frame, &events) {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(conn = %id, "connection closed by peer");
                            break;
                        }
                        Err(e) => {
                            error!(conn = %id, error = %e, "read error");
                            break;
                        }
                    }
                }
                cmd = outbound_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if conn.write_command(&cmd.encode()).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    let _ = conn.write_command(&Cls.encode()).await;
                    break;
                }
            }
        }

        let _ = events.send(Stimulus::Removed(id));
    });

    Ok(handle)
}

/// Translates one nsqd frame into a `ConnEvent` and pushes it onto the
/// reader's mailbox. Returns `false` if the mailbox is gone, signalling the
/// connection's task to stop.
fn deliver(id: &str, frame: Frame, events: &mpsc::UnboundedSender<Stimulus>) -> bool {
    let event = match frame {
        Frame::Message(msg) => ConnEvent::Message(msg),
        Frame::Response(body) => {
            debug!(conn = %id, body = %String::from_utf8_lossy(&body), "response frame");
            return true;
        }
        Frame::Error(body) => {
            warn!(conn = %id, body = %String::from_utf8_lossy(&body), "error frame");
            ConnEvent::Backoff
        }
    };

    events.send(Stimulus::Conn(id.to_string(), event)).is_ok()
}
