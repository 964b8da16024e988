//! Listens for the server shutdown signal (teacher's `shutdown.rs`,
//! unchanged: a graceful-shutdown primitive has nothing redis- or
//! NSQ-specific about it).

use tokio::sync::broadcast;

/// Listens for a shutdown signal from a `broadcast::Sender<()>`. Only one
/// value is ever sent on the channel; once received, `is_shutdown` latches
/// `true` forever.
#[derive(Debug)]
pub struct Shutdown {
    shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown { shutdown: false, notify }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice.
    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }
}
