use tracing::{debug, instrument};

/// `IDENTIFY` negotiates client metadata with nsqd right after the magic
/// preamble. The body is whatever JSON document the caller built; this crate
/// does not interpret nsqd's response, it only needs the handshake to
/// complete so the subsequent `SUB`/`RDY` exchange can begin.
#[derive(Debug)]
pub struct Identify {
    body: Vec<u8>,
}

impl Identify {
    pub fn new(body: serde_json::Value) -> Identify {
        Identify { body: body.to_string().into_bytes() }
    }

    #[instrument(skip(self))]
    pub(crate) fn encode(&self) -> Vec<u8> {
        debug!(bytes = self.body.len(), "encoding IDENTIFY");
        let mut out = Vec::with_capacity(9 + 4 + self.body.len());
        out.extend_from_slice(b"IDENTIFY\n");
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command_line_then_size_prefixed_body() {
        let cmd = Identify::new(serde_json::json!({"client_id": "c1"}));
        let bytes = cmd.encode();
        assert!(bytes.starts_with(b"IDENTIFY\n"));
        let len = u32::from_be_bytes(bytes[9..13].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 13);
    }
}
