//! Peer and table-subscription bookkeeping for the cluster bus (spec §4.8).
//!
//! Bidirectional mappings in the same shape as the teacher's
//! `ConnectionRegistry`: table → subscribed peers (for broadcast) and peer
//! → subscribed tables (for disconnect cleanup), plus a peer → owned pty
//! devices map so `cfg.req.backup` can be routed to the session owning a
//! device.

use std::collections::{HashMap, HashSet};

/// A connected cluster peer (a client node logged into the master).
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Account name used at login.
    pub account: String,
    /// Node name reported at login.
    pub node_name: String,
    /// Origin tag used to suppress self-echoes (spec §4.8 ordering rule 3).
    pub tag: String,
    /// Whether `cluster.req.login` has completed successfully.
    pub logged_in: bool,
}

/// Bidirectional registry of cluster peers, their table subscriptions, and
/// the pty devices they own.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    peers: HashMap<u64, PeerInfo>,
    table_subscribers: HashMap<String, HashSet<u64>>,
    peer_tables: HashMap<u64, HashSet<String>>,
    /// Device name → owning peer session (spec §4.8 `cfg.req.backup`
    /// routing, spec §4.9 pty ownership).
    device_owners: HashMap<String, u64>,
    peer_devices: HashMap<u64, HashSet<String>>,
}

impl ClusterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected (not yet logged in) peer session.
    pub fn connect(&mut self, session: u64) {
        self.peer_tables.entry(session).or_default();
        self.peer_devices.entry(session).or_default();
    }

    /// Mark a peer as logged in, recording its identity and origin tag.
    pub fn login(&mut self, session: u64, account: String, node_name: String, tag: String) {
        self.peers.insert(session, PeerInfo { account, node_name, tag, logged_in: true });
    }

    /// Look up a peer's info.
    pub fn peer(&self, session: u64) -> Option<&PeerInfo> {
        self.peers.get(&session)
    }

    /// Whether `session` has completed login.
    pub fn is_logged_in(&self, session: u64) -> bool {
        self.peers.get(&session).is_some_and(|p| p.logged_in)
    }

    /// Subscribe `session` to `table`. Idempotent.
    pub fn subscribe(&mut self, session: u64, table: &str) {
        self.table_subscribers.entry(table.to_owned()).or_default().insert(session);
        self.peer_tables.entry(session).or_default().insert(table.to_owned());
    }

    /// All sessions currently subscribed to `table`.
    pub fn subscribers_of(&self, table: &str) -> impl Iterator<Item = u64> + '_ {
        self.table_subscribers.get(table).into_iter().flatten().copied()
    }

    /// Record that `session` owns `device` (a pty row), used to route
    /// `cfg.req.backup` and to clean up on disconnect.
    pub fn own_device(&mut self, session: u64, device: &str) {
        self.device_owners.insert(device.to_owned(), session);
        self.peer_devices.entry(session).or_default().insert(device.to_owned());
    }

    /// Stop tracking ownership of `device`, returning its prior owner.
    pub fn disown_device(&mut self, device: &str) -> Option<u64> {
        let owner = self.device_owners.remove(device);
        if let Some(session) = owner {
            if let Some(devices) = self.peer_devices.get_mut(&session) {
                devices.remove(device);
            }
        }
        owner
    }

    /// The session owning `device`, if any (spec §4.8 `cfg.req.backup`
    /// routing: "forwards to the session owning the device").
    pub fn device_owner(&self, device: &str) -> Option<u64> {
        self.device_owners.get(device).copied()
    }

    /// Remove a peer and all its subscriptions/ownerships on disconnect
    /// (spec §4.8 cancellation). Returns the tables it was subscribed to
    /// (for broadcasting removals) and the devices it owned (for pty-row
    /// cleanup).
    pub fn disconnect(&mut self, session: u64) -> (Vec<String>, Vec<String>) {
        self.peers.remove(&session);

        let tables: Vec<String> = self.peer_tables.remove(&session).unwrap_or_default().into_iter().collect();
        for table in &tables {
            if let Some(subs) = self.table_subscribers.get_mut(table) {
                subs.remove(&session);
            }
        }

        let devices: Vec<String> = self.peer_devices.remove(&session).unwrap_or_default().into_iter().collect();
        for device in &devices {
            self.device_owners.remove(device);
        }

        (tables, devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_lookup() {
        let mut reg = ClusterRegistry::new();
        reg.connect(1);
        reg.subscribe(1, "device");
        let subs: Vec<u64> = reg.subscribers_of("device").collect();
        assert_eq!(subs, vec![1]);
    }

    #[test]
    fn disconnect_removes_subscriptions_and_devices() {
        let mut reg = ClusterRegistry::new();
        reg.connect(1);
        reg.subscribe(1, "device");
        reg.own_device(1, "meter-01");

        let (tables, devices) = reg.disconnect(1);
        assert_eq!(tables, vec!["device".to_owned()]);
        assert_eq!(devices, vec!["meter-01".to_owned()]);
        assert_eq!(reg.subscribers_of("device").count(), 0);
        assert!(reg.device_owner("meter-01").is_none());
    }

    #[test]
    fn device_owner_routes_backup_requests() {
        let mut reg = ClusterRegistry::new();
        reg.connect(5);
        reg.own_device(5, "meter-01");
        assert_eq!(reg.device_owner("meter-01"), Some(5));
    }

    #[test]
    fn login_marks_peer_logged_in() {
        let mut reg = ClusterRegistry::new();
        reg.connect(1);
        assert!(!reg.is_logged_in(1));
        reg.login(1, "acct".to_owned(), "node".to_owned(), "tag-1".to_owned());
        assert!(reg.is_logged_in(1));
    }
}
