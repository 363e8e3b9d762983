pub mod checksum;
pub mod message;
pub mod opcode;

pub use checksum::adler32;
pub use message::{InboundMessage, OutboundMessage, MAX_MESSAGE_SIZE};
pub use opcode::Opcode;
