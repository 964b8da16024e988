use crate::frame::MessageId;

use tracing::{debug, instrument};

/// `FIN <id>`: marks a message as successfully processed.
#[derive(Debug)]
pub struct Fin(pub MessageId);

impl Fin {
    #[instrument(skip(self))]
    pub(crate) fn encode(&self) -> Vec<u8> {
        let id = super::format_id(&self.0);
        debug!(%id, "encoding FIN");
        format!("FIN {}\n", id).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_message_id() {
        let mut id = [b' '; 16];
        id[..5].copy_from_slice(b"abcde");
        assert_eq!(Fin(id).encode(), b"FIN abcde\n");
    }
}
