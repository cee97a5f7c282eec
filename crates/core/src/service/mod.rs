/// Hidden service client layer
///
/// - Addresses (like Tor's .onion) derived from service keys
/// - Signed intro sets published into and resolved from the DHT
/// - The endpoint: identity, publish state machine, prefetch loops
/// - Per-remote outbound contexts aligning paths with introductions
pub mod address;
pub mod endpoint;
pub mod info;
pub mod intro;
pub mod lookup;
pub mod outbound;
pub mod session;
pub mod tag;

pub use address::{Address, AddressError};
pub use endpoint::{Endpoint, EndpointStats, InboundMessage, PathEnsureHook};
pub use info::ServiceInfo;
pub use intro::{IntroSet, Introduction, Signature64};
pub use lookup::{
    CachedTagResult, LookupKind, LookupPurpose, PendingLookup, PendingLookupTable, RouterLookupJob,
};
pub use outbound::{ContextState, ContextTick, OutboundContext};
pub use session::{ReplayWindow, Session, SessionMap};
pub use tag::{ConvoTag, TopicTag};
