use tracing::{debug, instrument};

/// `SUB <topic> <channel>`: subscribes the connection to a topic/channel
/// pair. Must be sent once, right after `IDENTIFY` succeeds.
#[derive(Debug)]
pub struct Sub {
    topic: String,
    channel: String,
}

impl Sub {
    pub fn new(topic: impl Into<String>, channel: impl Into<String>) -> Sub {
        Sub { topic: topic.into(), channel: channel.into() }
    }

    #[instrument(skip(self))]
    pub(crate) fn encode(&self) -> Vec<u8> {
        debug!(topic = %self.topic, channel = %self.channel, "encoding SUB");
        format!("SUB {} {}\n", self.topic, self.channel).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_topic_and_channel() {
        let cmd = Sub::new("topic", "channel");
        assert_eq!(cmd.encode(), b"SUB topic channel\n");
    }
}
