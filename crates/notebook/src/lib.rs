pub mod handler;
pub mod message;
pub mod messenger;
pub mod sender;

pub use handler::Handler;
pub use message::OutboundMessage;
pub use messenger::{Command, Disposition, Messenger};
pub use sender::{Broadcast, EmitError, OutboundSender};
