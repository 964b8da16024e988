//! Per-connection RDY credit controller (spec §4.1). One instance per live
//! broker connection; owns the connection's RDY cap, in-flight counter, and
//! the four-state lifecycle `INIT -> {BACKOFF, ONE, MAX}`.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event::Stimulus;
use crate::scheduler::{self, TimerHandle};

/// The opaque handle to the external connection object (spec §3): capable of
/// sending an RDY command and reporting the broker's advertised ceiling.
/// The wire layer (`connection::TcpNsqConnection`) implements this; tests use
/// a recording double.
pub trait ConnHandle: std::fmt::Debug + Send {
    fn id(&self) -> &str;
    fn max_rdy_count(&self) -> u64;
    fn set_rdy(&mut self, n: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Backoff,
    One,
    Max,
}

/// The per-connection RDY state machine described in spec §4.1.
#[derive(Debug)]
pub struct ConnectionRdy<C: ConnHandle> {
    conn: C,
    max_conn_rdy: u64,
    in_flight: u64,
    last_rdy_sent: u64,
    state: State,
    idle_timer: Option<TimerHandle>,
}

impl<C: ConnHandle> ConnectionRdy<C> {
    pub fn new(conn: C) -> Self {
        ConnectionRdy {
            conn,
            max_conn_rdy: 0,
            in_flight: 0,
            last_rdy_sent: 0,
            state: State::Init,
            idle_timer: None,
        }
    }

    pub fn id(&self) -> &str {
        self.conn.id()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn max_conn_rdy(&self) -> u64 {
        self.max_conn_rdy
    }

    pub fn last_rdy_sent(&self) -> u64 {
        self.last_rdy_sent
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    /// True iff this connection is saturated: every credit it holds is
    /// currently in flight.
    pub fn is_starved(&self) -> bool {
        self.in_flight == self.max_conn_rdy && self.max_conn_rdy > 0
    }

    /// Sends `n` to the broker only when it falls within `[0, max_conn_rdy]`.
    /// Out-of-range requests are dropped at the wire but `last_rdy_sent` is
    /// still recorded, per spec §4.1 ("useful when a cap is lowered after the
    /// decision to send was made").
    fn set_rdy(&mut self, n: u64) {
        self.last_rdy_sent = n;
        if n <= self.max_conn_rdy {
            self.conn.set_rdy(n);
        } else {
            trace!(
                conn = self.conn.id(),
                n,
                max_conn_rdy = self.max_conn_rdy,
                "suppressed out-of-range RDY request at the wire"
            );
        }
    }

    /// Request a new cap. The effective cap is `min(m, conn.max_rdy_count())`
    /// (spec §4.1). If currently `MAX`, the new cap is pushed immediately;
    /// otherwise it takes effect on the next transition into `MAX`.
    pub fn set_connection_rdy_max(&mut self, m: u64) {
        self.max_conn_rdy = m.min(self.conn.max_rdy_count());

        if self.state == State::Max {
            self.set_rdy(self.max_conn_rdy);
        }

        // Spec §7/§8 invariant 1: 0 <= last_rdy_sent <= max_conn_rdy <=
        // conn.max_rdy_count() at every quiescent point. The upper half is
        // structural (the clamp above), but last_rdy_sent can only be
        // checked once a cap change has had a chance to resend it.
        debug_assert!(
            self.last_rdy_sent <= self.max_conn_rdy,
            "RDY invariant violated for {}: last_rdy_sent={} exceeds max_conn_rdy={}",
            self.conn.id(),
            self.last_rdy_sent,
            self.max_conn_rdy
        );
        debug_assert!(
            self.max_conn_rdy <= self.conn.max_rdy_count(),
            "RDY invariant violated for {}: max_conn_rdy={} exceeds broker ceiling={}",
            self.conn.id(),
            self.max_conn_rdy,
            self.conn.max_rdy_count()
        );
    }

    /// "You may increase credit." Advances the lifecycle per the transition
    /// table in spec §4.1.
    pub fn bump(&mut self) {
        match self.state {
            State::Init => {
                if self.max_conn_rdy > 0 {
                    self.state = State::Max;
                    self.set_rdy(self.max_conn_rdy);
                }
            }
            State::Backoff => {
                if self.max_conn_rdy > 0 {
                    self.state = State::One;
                    self.set_rdy(1);
                }
            }
            State::One => {
                self.state = State::Max;
                self.set_rdy(self.max_conn_rdy);
            }
            State::Max => {
                // Idempotent self-loop: re-send the current cap.
                self.set_rdy(self.max_conn_rdy);
            }
        }
    }

    /// "Drop credit to zero now."
    pub fn backoff(&mut self) {
        match self.state {
            State::One | State::Max | State::Init => {
                self.state = State::Backoff;
                self.set_rdy(0);
            }
            State::Backoff => {
                // Already there; entry action is idempotent, no-op on
                // repeated stimuli.
            }
        }
    }

    /// Arm a one-shot timer that, if it fires before the next message,
    /// delivers a `backoff()` to this connection via `mailbox` (spec §4.1).
    /// Any call to [`ConnectionRdy::on_message`] cancels it.
    pub fn backoff_on_idle(&mut self, ms: u64, mailbox: &mpsc::UnboundedSender<Stimulus>) {
        if let Some(prev) = self.idle_timer.take() {
            prev.cancel();
        }
        let id = self.conn.id().to_string();
        self.idle_timer = Some(scheduler::schedule(
            std::time::Duration::from_millis(ms),
            mailbox.clone(),
            Stimulus::IdleExpired(id),
        ));
    }

    /// A message was delivered on the wire: cancel any idle timer and count
    /// it as in flight.
    pub fn on_message(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
        self.in_flight += 1;
        debug!(conn = self.conn.id(), in_flight = self.in_flight, "message received");
    }

    /// A message finished or was requeued: one fewer in flight.
    pub fn on_message_done(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Drop the idle timer, e.g. when the owning `ReaderRdy` removes this
    /// connection (spec §5: "Removing a connection cancels its idle timer").
    pub fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &C {
        &self.conn
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ConnHandle;

    #[derive(Debug, Clone)]
    pub struct RecordingConn {
        pub id: String,
        pub max_rdy_count: u64,
        pub sent: Vec<u64>,
    }

    impl RecordingConn {
        pub fn new(id: impl Into<String>, max_rdy_count: u64) -> Self {
            RecordingConn {
                id: id.into(),
                max_rdy_count,
                sent: Vec::new(),
            }
        }

        pub fn last_sent(&self) -> Option<u64> {
            self.sent.last().copied()
        }
    }

    impl ConnHandle for RecordingConn {
        fn id(&self) -> &str {
            &self.id
        }

        fn max_rdy_count(&self) -> u64 {
            self.max_rdy_count
        }

        fn set_rdy(&mut self, n: u64) {
            self.sent.push(n);
        }
    }
}
