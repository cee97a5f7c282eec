/// Node database seam
///
/// Contact storage and verification belong to the router; the endpoint core
/// only asks "do we know this relay" when selecting hops and resolving
/// introductions.
use std::collections::HashMap;
use std::sync::RwLock;
use veilnet_common::{RouterContact, RouterId};

pub trait NodeDb: Send + Sync {
    /// Fetch a relay's contact record, if known
    fn get_rc(&self, router: &RouterId) -> Option<RouterContact>;

    /// Insert or refresh a verified contact record
    fn put_rc(&self, rc: RouterContact);

    /// Snapshot of all known relays, for hop selection
    fn all(&self) -> Vec<RouterContact>;
}

/// In-memory node database
///
/// The production router backs this with disk; the core and its tests only
/// need the map semantics.
#[derive(Default)]
pub struct MemNodeDb {
    contacts: RwLock<HashMap<RouterId, RouterContact>>,
}

impl MemNodeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contacts.read().expect("nodedb lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeDb for MemNodeDb {
    fn get_rc(&self, router: &RouterId) -> Option<RouterContact> {
        self.contacts
            .read()
            .expect("nodedb lock poisoned")
            .get(router)
            .cloned()
    }

    fn put_rc(&self, rc: RouterContact) {
        self.contacts
            .write()
            .expect("nodedb lock poisoned")
            .insert(rc.router_id, rc);
    }

    fn all(&self) -> Vec<RouterContact> {
        self.contacts
            .read()
            .expect("nodedb lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rc(seed: u8) -> RouterContact {
        RouterContact::new(
            RouterId::from([seed; 32]),
            [seed; 32],
            vec![format!("10.0.0.{}:9090", seed)],
        )
    }

    #[test]
    fn test_put_and_get() {
        let db = MemNodeDb::new();
        assert!(db.get_rc(&RouterId::from([1u8; 32])).is_none());

        db.put_rc(rc(1));
        let found = db.get_rc(&RouterId::from([1u8; 32])).unwrap();
        assert_eq!(found.router_id, RouterId::from([1u8; 32]));
    }

    #[test]
    fn test_put_refreshes() {
        let db = MemNodeDb::new();
        db.put_rc(rc(1));
        let mut updated = rc(1);
        updated.addresses.push("10.0.0.99:9090".to_string());
        db.put_rc(updated);

        assert_eq!(db.len(), 1);
        assert_eq!(
            db.get_rc(&RouterId::from([1u8; 32])).unwrap().addresses.len(),
            2
        );
    }
}
