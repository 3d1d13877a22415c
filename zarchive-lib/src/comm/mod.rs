//! The transport layer: channels, sessions, the exactly-once robustifier,
//! and the listener/handshake router. All the blocking and I/O lives here;
//! the coordinator never sees a socket.

pub mod channel;
pub mod communicator;
pub mod robustifier;
pub mod session;

pub use channel::{Channel, ChannelEvent, ChannelId};
pub use communicator::Communicator;
pub use robustifier::{BackendRobustifier, FrontendRobustifier, Robustifier};
pub use session::{Session, SessionId};
