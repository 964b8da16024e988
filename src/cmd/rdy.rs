use tracing::{debug, instrument};

/// `RDY <count>`: the credit grant this entire crate exists to schedule.
#[derive(Debug)]
pub struct Rdy(pub u64);

impl Rdy {
    #[instrument(skip(self))]
    pub(crate) fn encode(&self) -> Vec<u8> {
        debug!(count = self.0, "encoding RDY");
        format!("RDY {}\n", self.0).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_count() {
        assert_eq!(Rdy(5).encode(), b"RDY 5\n");
        assert_eq!(Rdy(0).encode(), b"RDY 0\n");
    }
}
