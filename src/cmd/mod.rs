//! NSQ client commands (spec's supplemented wire layer). Unlike the RESP
//! commands this module is descended from, every one of these is
//! client-to-broker only: there is nothing to parse, only to encode and
//! write. Each command knows how to turn itself into the bytes nsqd expects.

mod cls;
mod fin;
mod identify;
mod nop;
mod rdy;
mod req;
mod sub;
mod touch;

pub use cls::Cls;
pub use fin::Fin;
pub use identify::Identify;
pub use nop::Nop;
pub use rdy::Rdy;
pub use req::Req;
pub use sub::Sub;
pub use touch::Touch;

use crate::frame::MessageId;

fn format_id(id: &MessageId) -> String {
    String::from_utf8_lossy(id).trim_end().to_string()
}
