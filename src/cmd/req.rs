use crate::frame::MessageId;

use tracing::{debug, instrument};

/// `REQ <id> <timeout-ms>`: requeues a message, asking nsqd to redeliver it
/// no sooner than `timeout_ms` from now.
#[derive(Debug)]
pub struct Req {
    pub id: MessageId,
    pub timeout_ms: u64,
}

impl Req {
    #[instrument(skip(self))]
    pub(crate) fn encode(&self) -> Vec<u8> {
        let id = super::format_id(&self.id);
        debug!(%id, timeout_ms = self.timeout_ms, "encoding REQ");
        format!("REQ {} {}\n", id, self.timeout_ms).into_bytes()
    }
}
