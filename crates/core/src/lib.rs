pub mod crypto;
pub mod handshake;
pub mod identity;
pub mod nodedb;
pub mod path;
pub mod protocol;
pub mod router;
pub mod runtime;
pub mod service;

pub use identity::{IdentityError, ServiceIdentity};
pub use nodedb::{MemNodeDb, NodeDb};
pub use router::{RouterContext, RoutingLink};
pub use runtime::{CryptoWorker, EndpointEvent};
pub use service::{Address, Endpoint, IntroSet, Introduction, OutboundContext, ServiceInfo};
