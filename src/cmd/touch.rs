use crate::frame::MessageId;

use tracing::{debug, instrument};

/// `TOUCH <id>`: resets a message's processing timeout without finishing or
/// requeueing it.
#[derive(Debug)]
pub struct Touch(pub MessageId);

impl Touch {
    #[instrument(skip(self))]
    pub(crate) fn encode(&self) -> Vec<u8> {
        let id = super::format_id(&self.0);
        debug!(%id, "encoding TOUCH");
        format!("TOUCH {}\n", id).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_message_id() {
        let mut id = [b' '; 16];
        id[..5].copy_from_slice(b"abcde");
        assert_eq!(Touch(id).encode(), b"TOUCH abcde\n");
    }
}
