//! The single task that owns a `ReaderRdy` (spec §5: "a single task owning
//! all reader- and connection-level state, driven by one mailbox"). Mirrors
//! the teacher's `Listener`/`Handler` split in `server.rs`: a small, cheap
//! `ReaderHandle` is cloned out to callers, while the actual state lives on
//! one spawned task nothing else ever touches directly.

use crate::connection_rdy::ConnHandle;
use crate::event::{ConnEvent, Stimulus};
use crate::frame::Message;
use crate::reader_rdy::ReaderRdy;

use tokio::sync::mpsc;
use tracing::{instrument, trace};

/// Requests a `ReaderHandle` forwards to the actor task. Connection
/// admission and removal must run on the actor's own task (they mutate the
/// `ReaderRdy` directly), so they travel over this channel rather than the
/// plain `Stimulus` one timers and the wire layer use.
enum Command<C> {
    Add(C),
    Remove(String),
}

/// A cheap, cloneable handle to a running reader actor.
#[derive(Clone)]
pub struct ReaderHandle<C> {
    commands: mpsc::UnboundedSender<Command<C>>,
    stimuli: mpsc::UnboundedSender<Stimulus>,
}

impl<C: ConnHandle + 'static> ReaderHandle<C> {
    /// Spawns the actor task and returns a handle to it, plus the channel on
    /// which delivered messages are handed to the application: `(connection
    /// id, message)` pairs, in delivery order per connection.
    pub fn spawn(max_in_flight: u64, backoff: Box<dyn crate::backoff::BackoffTimer>) -> (Self, mpsc::UnboundedReceiver<(String, Message)>) {
        let (stim_tx, stim_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        let reader = ReaderRdy::new(max_in_flight, backoff, stim_tx.clone());
        tokio::spawn(run(reader, cmd_rx, stim_rx, msg_tx));

        (ReaderHandle { commands: cmd_tx, stimuli: stim_tx }, msg_rx)
    }

    /// The `Stimulus` sender the wire layer should pass to
    /// [`crate::connection::connect`] so connection events land on this
    /// actor's mailbox.
    pub fn stimulus_sender(&self) -> mpsc::UnboundedSender<Stimulus> {
        self.stimuli.clone()
    }

    /// Admit a newly connected, subscribed connection.
    pub fn add_connection(&self, conn: C) {
        let _ = self.commands.send(Command::Add(conn));
    }

    /// Remove a connection (e.g. once its task has reported `Removed`).
    pub fn remove_connection(&self, id: impl Into<String>) {
        let _ = self.commands.send(Command::Remove(id.into()));
    }
}

async fn run<C: ConnHandle>(
    mut reader: ReaderRdy<C>,
    mut commands: mpsc::UnboundedReceiver<Command<C>>,
    mut stimuli: mpsc::UnboundedReceiver<Stimulus>,
    messages: mpsc::UnboundedSender<(String, Message)>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Add(conn)) => reader.add_connection(conn),
                    Some(Command::Remove(id)) => reader.remove_connection(&id),
                    None => return,
                }
            }
            stim = stimuli.recv() => {
                match stim {
                    Some(stim) => dispatch(&mut reader, stim, &messages),
                    None => return,
                }
            }
        }
    }
}

#[instrument(skip(reader, messages))]
fn dispatch<C: ConnHandle>(
    reader: &mut ReaderRdy<C>,
    stimulus: Stimulus,
    messages: &mpsc::UnboundedSender<(String, Message)>,
) {
    trace!(?stimulus, "dispatching");
    match stimulus {
        Stimulus::Conn(id, event) => match event {
            ConnEvent::Message(msg) => {
                reader.handle_message(&id);
                let _ = messages.send((id, msg));
            }
            ConnEvent::Finished => reader.handle_finished(&id),
            ConnEvent::Requeued => reader.handle_requeued(&id),
            ConnEvent::Subscribed => {}
            ConnEvent::Backoff => reader.handle_backoff_event(&id),
            ConnEvent::Closed => reader.remove_connection(&id),
        },
        Stimulus::IdleExpired(id) => reader.handle_idle_expired(&id),
        Stimulus::BackoffExpired => reader.handle_backoff_expired(),
        Stimulus::RebalanceTick => reader.handle_rebalance_tick(),
        Stimulus::Removed(id) => reader.remove_connection(&id),
    }
}
