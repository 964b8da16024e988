/// `CLS`: politely asks nsqd to close the connection.
#[derive(Debug)]
pub struct Cls;

impl Cls {
    pub(crate) fn encode(&self) -> Vec<u8> {
        b"CLS\n".to_vec()
    }
}
