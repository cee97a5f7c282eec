/// Wire envelopes and the encrypted frame format
///
/// The endpoint core is a transparent payload producer: DHT routing and the
/// link layer define delivery, we define the contents.
pub mod frame;
pub mod messages;

pub use frame::{FrameError, ProtocolFrame, ProtocolMessage, ProtocolType};
pub use messages::{DhtMessage, FindIntroTarget, PathTransferMessage, RoutingMessage};
