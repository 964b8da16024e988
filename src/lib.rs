//! Flow-control core for an NSQ consumer.
//!
//! An NSQ consumer holds one connection per nsqd it subscribes through, and
//! must keep each connection's RDY credit fresh so the broker knows how many
//! unacknowledged messages it may push. This crate owns that bookkeeping: a
//! per-connection credit controller ([`connection_rdy::ConnectionRdy`]) and a
//! reader-level coordinator ([`reader_rdy::ReaderRdy`]) that apportions a
//! single global in-flight budget across every live connection and drives a
//! shared backoff policy when message handling starts failing.
//!
//! Everything else — socket I/O, framing, the subscribe handshake, heartbeat
//! replies — lives in [`connection`] and [`conn`] as a real but intentionally
//! small collaborator; it exists so the core is driven by something real, not
//! just test doubles, but it carries no flow-control logic of its own.

mod error;
pub use error::{Error, Result};

pub mod backoff;
pub mod cmd;
pub mod config;
pub mod conn;
pub mod connection;
pub mod connection_rdy;
pub mod event;
pub mod frame;
pub mod reader_actor;
pub mod reader_rdy;
pub mod round_robin;
pub mod scheduler;
pub mod shutdown;

pub use config::Config;
pub use connection_rdy::ConnectionRdy;
pub use reader_actor::ReaderHandle;
pub use reader_rdy::ReaderRdy;
pub use shutdown::Shutdown;
