/// Collaborator handles the endpoint core borrows from the owning router
///
/// Process-wide resources (node db, link layer, worker pool) are passed as
/// context parameters rather than reached through globals.
use crate::nodedb::NodeDb;
use crate::protocol::RoutingMessage;
use crate::runtime::CryptoWorker;
use std::sync::Arc;
use veilnet_common::{PathId, Result, RouterId};

/// The link-layer seam: hand a routing message to a path's first hop
///
/// Reliability and session framing live below this line.
pub trait RoutingLink: Send + Sync {
    fn send_routing_message(
        &self,
        upstream: RouterId,
        path: PathId,
        message: RoutingMessage,
    ) -> Result<()>;
}

/// Bundle of router-owned collaborators handed into every endpoint entry point
#[derive(Clone)]
pub struct RouterContext {
    pub nodedb: Arc<dyn NodeDb>,
    pub link: Arc<dyn RoutingLink>,
    pub worker: CryptoWorker,
}

impl RouterContext {
    pub fn new(nodedb: Arc<dyn NodeDb>, link: Arc<dyn RoutingLink>, worker: CryptoWorker) -> Self {
        Self {
            nodedb,
            link,
            worker,
        }
    }
}
