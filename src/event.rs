//! Event kinds exchanged between the wire layer, the flow-control core, and
//! the `ReaderRdy` actor's mailbox.
//!
//! Spec §9 calls for turning "event emitters and ad-hoc event names" into a
//! closed tagged set; `ConnEvent` is that set for the wire-connection
//! collaborator (spec §6), and `Stimulus` is the internal mailbox message
//! type the single-task actor (spec §5) drains.

use crate::frame::Message;

/// Events published by one connection's event stream (spec §6). `Requeued`
/// and `Requeue` are synonyms in the prose spec; this crate only has the one
/// variant.
#[derive(Debug, Clone)]
pub enum ConnEvent {
    Message(Message),
    Finished,
    Requeued,
    Subscribed,
    Backoff,
    Closed,
}

/// Internal stimuli processed one at a time by the `ReaderRdy` actor's single
/// task. Every deferred timer (idle surrender, backoff expiry, low-RDY
/// rebalance) is re-delivered through this same channel as a fresh event,
/// per spec §5 ("the timer abstraction ... delivers its callback as a fresh
/// event on the same task").
#[derive(Debug, Clone)]
pub enum Stimulus {
    /// A connection-level event arrived for the named connection.
    Conn(String, ConnEvent),
    /// A connection's idle timer (armed by the low-RDY regime) expired.
    IdleExpired(String),
    /// The global backoff-expiry timer fired; time to try one connection.
    BackoffExpired,
    /// The low-RDY periodic rebalance tick fired.
    RebalanceTick,
    /// The connection closed or was explicitly dropped by the owner.
    Removed(String),
}
