/// Hop selection seam toward the external path builder
///
/// The builder that actually constructs circuits hop-by-hop lives outside
/// this crate; it drains [`BuildRequest`]s from a path set and consults a
/// [`HopSelector`] for each hop. Outbound sessions override the selector to
/// pin the terminal hop to their selected introduction.
use crate::nodedb::NodeDb;
use rand::Rng;
use veilnet_common::{RouterContact, RouterId};

/// One queued path build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildRequest {
    pub num_hops: usize,

    /// Forced terminal hop, when the path must align with an introduction
    pub terminal: Option<RouterId>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HopSelectError {
    #[error("not enough known routers to build a path")]
    NotEnoughRouters,

    #[error("router {0} not known locally")]
    UnknownRouter(RouterId),
}

pub trait HopSelector {
    fn select_hop(
        &self,
        db: &dyn NodeDb,
        prev: Option<&RouterContact>,
        hop: usize,
        num_hops: usize,
    ) -> Result<RouterContact, HopSelectError>;
}

/// Uniform random selection over known relays, avoiding the previous hop
#[derive(Debug, Default)]
pub struct DefaultHopSelector;

impl HopSelector for DefaultHopSelector {
    fn select_hop(
        &self,
        db: &dyn NodeDb,
        prev: Option<&RouterContact>,
        _hop: usize,
        _num_hops: usize,
    ) -> Result<RouterContact, HopSelectError> {
        let candidates: Vec<RouterContact> = db
            .all()
            .into_iter()
            .filter(|rc| prev.map(|p| p.router_id != rc.router_id).unwrap_or(true))
            .collect();
        if candidates.is_empty() {
            return Err(HopSelectError::NotEnoughRouters);
        }
        let idx = rand::rngs::OsRng.gen_range(0..candidates.len());
        Ok(candidates[idx].clone())
    }
}

/// Forces the final hop to the aligned introduction's router
#[derive(Debug)]
pub struct AlignedHopSelector {
    pub terminal: RouterId,
}

impl HopSelector for AlignedHopSelector {
    fn select_hop(
        &self,
        db: &dyn NodeDb,
        prev: Option<&RouterContact>,
        hop: usize,
        num_hops: usize,
    ) -> Result<RouterContact, HopSelectError> {
        if hop == num_hops - 1 {
            db.get_rc(&self.terminal)
                .ok_or(HopSelectError::UnknownRouter(self.terminal))
        } else {
            DefaultHopSelector.select_hop(db, prev, hop, num_hops)
        }
    }
}

/// Select a full hop list for one build
pub fn select_hops(
    db: &dyn NodeDb,
    selector: &dyn HopSelector,
    num_hops: usize,
) -> Result<Vec<RouterId>, HopSelectError> {
    let mut hops = Vec::with_capacity(num_hops);
    let mut prev: Option<RouterContact> = None;
    for hop in 0..num_hops {
        let rc = selector.select_hop(db, prev.as_ref(), hop, num_hops)?;
        hops.push(rc.router_id);
        prev = Some(rc);
    }
    Ok(hops)
}
