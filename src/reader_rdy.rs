//! Reader-level coordinator (spec §4.2). One instance per consumer; owns the
//! set of live connections, apportions the global in-flight budget across
//! them, drives the global backoff policy, and handles the low-RDY regime
//! where `maxInFlight < |connections|`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::backoff::BackoffTimer;
use crate::connection_rdy::{ConnHandle, ConnectionRdy};
use crate::event::Stimulus;
use crate::round_robin::RoundRobinList;
use crate::scheduler::{self, TimerHandle};

/// How long a connection holding the single shared low-RDY credit may sit
/// idle before it is asked to give the credit back (spec §4.2).
const LOW_RDY_IDLE_TIMEOUT_MS: u64 = 1_000;

/// How often `ReaderRdy` re-checks the low-RDY rotation as a safety net
/// against the eventless case (spec §4.2).
const LOW_RDY_REBALANCE_INTERVAL_MS: u64 = 1_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Zero,
    TryOne,
    Max,
    Backoff,
}

/// The reader-level coordinator described in spec §4.2.
pub struct ReaderRdy<C: ConnHandle> {
    max_in_flight: u64,
    backoff_timer: Box<dyn BackoffTimer>,
    connections: HashMap<String, ConnectionRdy<C>>,
    round_robin: RoundRobinList<String>,
    state: State,
    backoff_timer_handle: Option<TimerHandle>,
    balance_timer_handle: Option<TimerHandle>,
    /// Connections currently holding the shared low-RDY credit, tracked so
    /// `balance` can hand it back before rotating it onward (spec §4.2:
    /// "at most `maxInFlight − inFlight()` connections simultaneously hold a
    /// nonzero `lastRdySent`").
    low_rdy_holders: Vec<String>,
    mailbox: mpsc::UnboundedSender<Stimulus>,
}

impl<C: ConnHandle> ReaderRdy<C> {
    pub fn new(
        max_in_flight: u64,
        backoff_timer: Box<dyn BackoffTimer>,
        mailbox: mpsc::UnboundedSender<Stimulus>,
    ) -> Self {
        assert!(max_in_flight > 0, "maxInFlight must be a positive integer");
        ReaderRdy {
            max_in_flight,
            backoff_timer,
            connections: HashMap::new(),
            round_robin: RoundRobinList::new(),
            state: State::Zero,
            backoff_timer_handle: None,
            balance_timer_handle: None,
            low_rdy_holders: Vec::new(),
            mailbox,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// True iff at least one connection is starved (spec §4.2).
    pub fn is_starved(&self) -> bool {
        self.connections.values().any(ConnectionRdy::is_starved)
    }

    /// Sum of per-connection in-flight counts (spec §4.2).
    pub fn in_flight(&self) -> u64 {
        self.connections.values().map(ConnectionRdy::in_flight).sum()
    }

    pub fn connection_cap(&self, id: &str) -> Option<u64> {
        self.connections.get(id).map(ConnectionRdy::max_conn_rdy)
    }

    pub fn connection_last_rdy_sent(&self, id: &str) -> Option<u64> {
        self.connections.get(id).map(ConnectionRdy::last_rdy_sent)
    }

    pub fn connection_state(&self, id: &str) -> Option<crate::connection_rdy::State> {
        self.connections.get(id).map(ConnectionRdy::state)
    }

    fn is_low_rdy_regime(&self) -> bool {
        let n = self.round_robin.len() as u64;
        n > 0 && self.max_in_flight < n
    }

    /// Wrap `conn` in a `ConnectionRdy`, admit it to the active set, and
    /// rebalance (spec §4.2's `addConnection`, combined with the "once ready"
    /// admission step: callers invoke this once the broker has acknowledged
    /// the subscribe handshake).
    #[instrument(skip(self, conn), fields(id = conn.id()))]
    pub fn add_connection(&mut self, conn: C) {
        let id = conn.id().to_string();
        debug!("admitting connection");
        self.connections.insert(id.clone(), ConnectionRdy::new(conn));
        self.round_robin.add(id.clone());

        match self.state {
            State::Zero => {
                self.state = State::Max;
                self.balance();
                if !self.is_low_rdy_regime() {
                    self.bump_all();
                }
            }
            State::TryOne | State::Max => {
                self.balance();
                // `is_low_rdy_regime()` answers whether the *real*
                // maxInFlight/N ratio is scarce; it says nothing about
                // TRY_ONE's own max=1 override (balance() applies that
                // override internally regardless of the real ratio). A
                // newly admitted connection must never be bumped directly
                // while still probing with one — only `raise_success()`'s
                // `bump_all()` on transition into MAX is allowed to hand it
                // credit, or the probe ends up holding RDY 1 on two
                // connections at once.
                if self.state == State::Max && !self.is_low_rdy_regime() {
                    if let Some(c) = self.connections.get_mut(&id) {
                        c.bump();
                    }
                }
            }
            State::Backoff => {
                self.balance();
                if let Some(c) = self.connections.get_mut(&id) {
                    c.backoff();
                }
            }
        }
    }

    /// Drop `id` from the active set; if the reader now has no connections
    /// left, go to `ZERO` and cancel every pending timer (spec §3: "connections
    /// empty iff state = ZERO").
    #[instrument(skip(self))]
    pub fn remove_connection(&mut self, id: &str) {
        if let Some(mut c) = self.connections.remove(id) {
            c.cancel_idle_timer();
        }
        self.round_robin.remove(&id.to_string());

        if self.connections.is_empty() {
            self.state = State::Zero;
            self.cancel_backoff_timer();
            self.cancel_balance_timer();
        } else {
            self.balance();
        }
    }

    /// A message was delivered on `id`'s connection.
    pub fn handle_message(&mut self, id: &str) {
        if let Some(c) = self.connections.get_mut(id) {
            c.on_message();
        }
    }

    /// `id`'s connection reported `FINISHED`.
    #[instrument(skip(self))]
    pub fn handle_finished(&mut self, id: &str) {
        if let Some(c) = self.connections.get_mut(id) {
            c.on_message_done();
        }
        self.backoff_timer.success();

        if self.is_low_rdy_regime() {
            self.surrender_low_rdy(id);
            self.balance();
        } else if let Some(c) = self.connections.get_mut(id) {
            c.bump();
        }

        self.raise_success();
    }

    /// `id`'s connection reported `REQUEUED` (a requeue not part of a global
    /// backoff trip; see spec §5's note on requeue/backoff ordering).
    pub fn handle_requeued(&mut self, id: &str) {
        if let Some(c) = self.connections.get_mut(id) {
            c.on_message_done();
        }
        if self.state != State::Backoff {
            if let Some(c) = self.connections.get_mut(id) {
                c.bump();
            }
        }
    }

    /// `id`'s connection (or the application handling its messages) raised a
    /// `BACKOFF` event: trip the global backoff state.
    pub fn handle_backoff_event(&mut self, _id: &str) {
        match self.state {
            State::TryOne | State::Max | State::Backoff => self.enter_backoff(),
            State::Zero => {}
        }
    }

    /// `id`'s own idle timer (armed by the low-RDY regime) fired: it gives
    /// its credit back, and — if still in the low-RDY regime — the rotation
    /// advances to the next connection.
    pub fn handle_idle_expired(&mut self, id: &str) {
        self.surrender_low_rdy(id);
        if self.is_low_rdy_regime() {
            self.balance();
        }
    }

    /// Give `id`'s low-RDY credit back immediately: cancel its idle timer,
    /// drop it to `RDY 0`, and make it eligible to be picked again on a
    /// future rotation.
    fn surrender_low_rdy(&mut self, id: &str) {
        self.low_rdy_holders.retain(|h| h != id);
        if let Some(c) = self.connections.get_mut(id) {
            c.cancel_idle_timer();
            c.backoff();
        }
    }

    /// The global backoff-expiry timer fired: probe with one connection.
    pub fn handle_backoff_expired(&mut self) {
        if self.state == State::Backoff {
            self.enter_try_one();
        }
    }

    /// The low-RDY periodic rebalance tick fired.
    pub fn handle_rebalance_tick(&mut self) {
        if self.is_low_rdy_regime() {
            self.balance();
        }
    }

    fn raise_success(&mut self) {
        if self.state == State::TryOne {
            self.state = State::Max;
            self.balance();
            if !self.is_low_rdy_regime() {
                self.bump_all();
            }
        }
    }

    fn enter_backoff(&mut self) {
        info!("entering global backoff");
        self.state = State::Backoff;
        self.backoff_timer.failure();
        self.cancel_balance_timer();
        self.low_rdy_holders.clear();

        for c in self.connections.values_mut() {
            c.cancel_idle_timer();
            c.backoff();
        }

        self.cancel_backoff_timer();
        let interval = self.backoff_timer.get_interval();
        self.backoff_timer_handle = Some(scheduler::schedule(
            interval,
            self.mailbox.clone(),
            Stimulus::BackoffExpired,
        ));
    }

    fn enter_try_one(&mut self) {
        debug!("probing with one connection");
        self.state = State::TryOne;
        self.cancel_backoff_timer();
        self.low_rdy_holders.clear();

        let chosen = self.round_robin.next(1).into_iter().next().cloned();
        if let Some(id) = chosen {
            if let Some(c) = self.connections.get_mut(&id) {
                c.bump();
            }
            // balance()'s low-rdy branch treats TRY_ONE's max=1 override the
            // same as a real low-RDY regime (spec §4.2's per_conn<1 split is
            // defined purely by the N/max ratio, TRY_ONE or not); recording
            // the probed connection here keeps that branch from handing the
            // same single credit to a second connection via the round-robin
            // cursor on the next add_connection/remove_connection-triggered
            // balance() call.
            self.low_rdy_holders.push(id);
        }
    }

    fn bump_all(&mut self) {
        let ids: Vec<String> = self.round_robin.iter().cloned().collect();
        for id in ids {
            if let Some(c) = self.connections.get_mut(&id) {
                c.bump();
            }
        }
    }

    /// Recompute per-connection RDY caps. See spec §4.2 for the full
    /// normal-regime / low-RDY-regime split.
    fn balance(&mut self) {
        let n = self.round_robin.len() as u64;
        if n == 0 {
            return;
        }

        let max = if self.state == State::TryOne { 1 } else { self.max_in_flight };
        let per_conn = max / n;
        let ids: Vec<String> = self.round_robin.iter().cloned().collect();

        if per_conn >= 1 {
            self.cancel_balance_timer();
            self.low_rdy_holders.clear();
            let remainder = self.max_in_flight % n;
            for (i, id) in ids.iter().enumerate() {
                let cap = per_conn + if (i as u64) < remainder { 1 } else { 0 };
                if let Some(c) = self.connections.get_mut(id) {
                    c.set_connection_rdy_max(cap);
                }
            }
        } else {
            for id in &ids {
                if let Some(c) = self.connections.get_mut(id) {
                    c.set_connection_rdy_max(1);
                }
            }

            // Top up or trim the holder set incrementally rather than
            // reselecting from scratch, so a connection keeps its turn
            // across unrelated `balance` calls (e.g. another connection
            // joining) and only gives up credit via an explicit surrender
            // (spec §4.2: finish or idle timeout while in the low-RDY
            // regime).
            self.low_rdy_holders.retain(|id| self.connections.contains_key(id));

            let available = max.saturating_sub(self.in_flight()) as usize;

            while self.low_rdy_holders.len() > available {
                let id = self.low_rdy_holders.remove(0);
                if let Some(c) = self.connections.get_mut(&id) {
                    c.cancel_idle_timer();
                    c.backoff();
                }
            }

            let mut attempts = 0;
            while self.low_rdy_holders.len() < available && attempts < n {
                attempts += 1;
                let next = match self.round_robin.next(1).into_iter().next().cloned() {
                    Some(id) => id,
                    None => break,
                };
                if self.low_rdy_holders.contains(&next) {
                    continue;
                }
                if let Some(c) = self.connections.get_mut(&next) {
                    c.bump();
                    c.backoff_on_idle(LOW_RDY_IDLE_TIMEOUT_MS, &self.mailbox);
                }
                self.low_rdy_holders.push(next);
            }

            self.arm_balance_timer();
        }
    }

    fn arm_balance_timer(&mut self) {
        self.cancel_balance_timer();
        self.balance_timer_handle = Some(scheduler::schedule(
            Duration::from_millis(LOW_RDY_REBALANCE_INTERVAL_MS),
            self.mailbox.clone(),
            Stimulus::RebalanceTick,
        ));
    }

    fn cancel_backoff_timer(&mut self) {
        if let Some(handle) = self.backoff_timer_handle.take() {
            handle.cancel();
        }
    }

    fn cancel_balance_timer(&mut self) {
        if let Some(handle) = self.balance_timer_handle.take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffTimer;
    use crate::connection_rdy::test_support::RecordingConn;

    #[derive(Debug)]
    struct FixedBackoff(Duration);

    impl BackoffTimer for FixedBackoff {
        fn success(&mut self) {}
        fn failure(&mut self) {}
        fn get_interval(&self) -> Duration {
            self.0
        }
    }

    fn new_reader(max_in_flight: u64) -> (ReaderRdy<RecordingConn>, mpsc::UnboundedReceiver<Stimulus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = ReaderRdy::new(max_in_flight, Box::new(FixedBackoff(Duration::from_secs(1))), tx);
        (reader, rx)
    }

    // S1. Single connection, happy path.
    #[tokio::test(start_paused = true)]
    async fn s1_single_connection_happy_path() {
        let (mut reader, _rx) = new_reader(5);
        reader.add_connection(RecordingConn::new("c1", 100));

        assert_eq!(reader.connection_last_rdy_sent("c1"), Some(5));

        reader.handle_message("c1");
        reader.handle_finished("c1");
        assert_eq!(reader.connection_last_rdy_sent("c1"), Some(5));
        assert_eq!(reader.in_flight(), 0);
    }

    // S2. Even distribution.
    #[tokio::test(start_paused = true)]
    async fn s2_even_distribution() {
        let (mut reader, _rx) = new_reader(10);
        reader.add_connection(RecordingConn::new("a", 100));
        reader.add_connection(RecordingConn::new("b", 100));
        reader.add_connection(RecordingConn::new("c", 100));

        assert_eq!(reader.state(), State::Max);

        let caps = [
            reader.connection_cap("a").unwrap(),
            reader.connection_cap("b").unwrap(),
            reader.connection_cap("c").unwrap(),
        ];
        let mut sorted = caps;
        sorted.sort_unstable();
        assert_eq!(sorted, [3, 3, 4]);
        assert_eq!(caps.iter().sum::<u64>(), 10);

        for (id, cap) in [("a", caps[0]), ("b", caps[1]), ("c", caps[2])] {
            assert_eq!(reader.connection_last_rdy_sent(id), Some(cap));
        }
    }

    // S3. Backoff trip.
    #[tokio::test(start_paused = true)]
    async fn s3_backoff_trip() {
        let (mut reader, mut rx) = new_reader(5);
        reader.add_connection(RecordingConn::new("c1", 100));
        assert_eq!(reader.connection_last_rdy_sent("c1"), Some(5));

        reader.handle_backoff_event("c1");
        assert_eq!(reader.state(), State::Backoff);
        assert_eq!(reader.connection_last_rdy_sent("c1"), Some(0));

        // The backoff-expiry timer was scheduled for 1s (FixedBackoff).
        let stim = rx.recv().await.expect("backoff timer should fire");
        matches!(stim, Stimulus::BackoffExpired);
        reader.handle_backoff_expired();

        assert_eq!(reader.state(), State::TryOne);
        assert_eq!(reader.connection_last_rdy_sent("c1"), Some(1));

        reader.handle_message("c1");
        reader.handle_finished("c1");
        assert_eq!(reader.state(), State::Max);
        assert_eq!(reader.connection_last_rdy_sent("c1"), Some(5));
    }

    // TRY_ONE must grant credit to exactly one connection even with several
    // established, and a connection admitted mid-probe must not pick up the
    // single shared credit out from under the one already probing.
    #[tokio::test(start_paused = true)]
    async fn try_one_with_multiple_connections_bumps_exactly_one() {
        let (mut reader, mut rx) = new_reader(5);
        reader.add_connection(RecordingConn::new("a", 100));
        reader.add_connection(RecordingConn::new("b", 100));
        reader.add_connection(RecordingConn::new("c", 100));

        reader.handle_backoff_event("a");
        assert_eq!(reader.state(), State::Backoff);

        let stim = rx.recv().await.expect("backoff timer should fire");
        matches!(stim, Stimulus::BackoffExpired);
        reader.handle_backoff_expired();
        assert_eq!(reader.state(), State::TryOne);

        let holders: Vec<&str> = ["a", "b", "c"]
            .into_iter()
            .filter(|id| reader.connection_last_rdy_sent(id) == Some(1))
            .collect();
        assert_eq!(holders.len(), 1, "exactly one connection must hold the TRY_ONE credit");

        // Admitting a fourth connection while still probing must not also
        // grant it the shared credit via balance()'s low-rdy top-up.
        reader.add_connection(RecordingConn::new("d", 100));
        let holders_after: Vec<&str> = ["a", "b", "c", "d"]
            .into_iter()
            .filter(|id| reader.connection_last_rdy_sent(id) == Some(1))
            .collect();
        assert_eq!(holders_after, holders, "admission mid-probe must not add a second holder");
    }

    // S4. Low-RDY rotation.
    #[tokio::test(start_paused = true)]
    async fn s4_low_rdy_rotation_via_finish() {
        let (mut reader, _rx) = new_reader(1);
        reader.add_connection(RecordingConn::new("a", 100));
        reader.add_connection(RecordingConn::new("b", 100));
        reader.add_connection(RecordingConn::new("c", 100));

        assert_eq!(reader.connection_cap("a"), Some(1));
        assert_eq!(reader.connection_cap("b"), Some(1));
        assert_eq!(reader.connection_cap("c"), Some(1));

        // Exactly one connection got the single shared credit.
        let holders: Vec<&str> = ["a", "b", "c"]
            .into_iter()
            .filter(|id| reader.connection_last_rdy_sent(id) == Some(1))
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0], "a");

        reader.handle_message("a");
        reader.handle_finished("a");

        assert_eq!(reader.connection_cap("a"), Some(1));
        assert_eq!(reader.connection_last_rdy_sent("b"), Some(1));
        assert_eq!(reader.connection_last_rdy_sent("a"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn s4_low_rdy_rotation_via_idle_timeout() {
        let (mut reader, mut rx) = new_reader(1);
        reader.add_connection(RecordingConn::new("a", 100));
        reader.add_connection(RecordingConn::new("b", 100));
        reader.add_connection(RecordingConn::new("c", 100));

        tokio::time::advance(Duration::from_millis(1001)).await;
        let stim = rx.recv().await.expect("idle timer should fire");
        match stim {
            Stimulus::IdleExpired(id) => {
                reader.handle_idle_expired(&id);
                assert_eq!(id, "a");
            }
            other => panic!("unexpected stimulus: {:?}", other),
        }

        assert_eq!(reader.connection_last_rdy_sent("a"), Some(0));
        assert_eq!(reader.connection_last_rdy_sent("b"), Some(1));
    }

    // S5. Requeue without global backoff.
    #[tokio::test(start_paused = true)]
    async fn s5_requeue_without_global_backoff() {
        let (mut reader, _rx) = new_reader(10);
        reader.add_connection(RecordingConn::new("c1", 100));
        reader.add_connection(RecordingConn::new("c2", 100));

        reader.handle_message("c1");
        reader.handle_requeued("c1");

        assert_eq!(reader.state(), State::Max);
        assert_eq!(reader.connection_last_rdy_sent("c1"), reader.connection_cap("c1"));
    }

    // S6. Last connection removed.
    #[tokio::test(start_paused = true)]
    async fn s6_last_connection_removed() {
        let (mut reader, _rx) = new_reader(5);
        reader.add_connection(RecordingConn::new("c1", 100));
        reader.remove_connection("c1");

        assert_eq!(reader.state(), State::Zero);
        assert!(!reader.is_starved());
        assert_eq!(reader.connection_count(), 0);
    }

    // Invariant 1: 0 <= lastRdySent <= maxConnRdy <= conn.maxRdyCount at
    // every quiescent point.
    #[tokio::test(start_paused = true)]
    async fn invariant_rdy_bounds() {
        let (mut reader, _rx) = new_reader(7);
        reader.add_connection(RecordingConn::new("a", 3));
        reader.add_connection(RecordingConn::new("b", 100));

        for id in ["a", "b"] {
            let cap = reader.connection_cap(id).unwrap();
            let sent = reader.connection_last_rdy_sent(id).unwrap();
            assert!(sent <= cap);
            assert!(cap <= 100);
        }
        // "a"'s broker ceiling of 3 must clamp its cap even though its
        // even-distribution share would be higher.
        assert!(reader.connection_cap("a").unwrap() <= 3);
    }

    // Invariant 3: in MAX and not low-RDY, caps sum to maxInFlight exactly.
    #[tokio::test(start_paused = true)]
    async fn invariant_caps_sum_to_max_in_flight() {
        let (mut reader, _rx) = new_reader(10);
        reader.add_connection(RecordingConn::new("a", 1000));
        reader.add_connection(RecordingConn::new("b", 1000));
        reader.add_connection(RecordingConn::new("c", 1000));

        let total: u64 = ["a", "b", "c"]
            .iter()
            .map(|id| reader.connection_cap(id).unwrap())
            .sum();
        assert_eq!(total, 10);
    }

    // Invariant 6: a second bump in MAX re-sends the cap and does not change
    // state (idempotence).
    #[tokio::test(start_paused = true)]
    async fn invariant_bump_idempotent_in_max() {
        let (mut reader, _rx) = new_reader(5);
        reader.add_connection(RecordingConn::new("c1", 100));
        assert_eq!(reader.state(), State::Max);

        reader.bump_all();
        assert_eq!(reader.state(), State::Max);
        assert_eq!(reader.connection_last_rdy_sent("c1"), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_add_remove_is_transparent() {
        let (mut reader, _rx) = new_reader(5);
        reader.add_connection(RecordingConn::new("c1", 100));
        reader.remove_connection("c1");

        let (mut fresh, _rx2) = new_reader(5);
        assert_eq!(fresh.state(), reader.state());
        assert_eq!(fresh.connection_count(), reader.connection_count());
    }
}
