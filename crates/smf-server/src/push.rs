//! Push-channel manager (spec §4.4).
//!
//! `TargetTable` maps a registered target name to the session that owns it
//! and its live throughput counters. `PushChannelRegistry` maps an open
//! channel id to its owner and source session, routing `transfer_push_data`
//! payloads to the target's owning session.
//!
//! Thread-safe via `Arc<Mutex<_>>`, in the same shape as the teacher's
//! `KeyPackageRegistry`: `Clone` shares the underlying storage, and a
//! poisoned mutex is a programming error worth panicking on.

#![allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::PushError;

/// Default packet size (in bytes) assigned to a newly opened push channel.
pub const DEFAULT_PACKET_SIZE: u16 = 256;

/// A session identifier, opaque to the push-channel manager.
pub type SessionId = u64;

/// A registered push target: a named sink a channel can be opened against.
#[derive(Debug, Clone)]
pub struct Target {
    /// Session that registered (owns) this target.
    pub owner_session: SessionId,
    /// Negotiated packet size for channels opened against this target.
    pub packet_size: u16,
    /// Bytes received by the target across all channels (`rx`).
    pub rx: u64,
    /// Bytes sent by the target across all channels (`sx`).
    pub sx: u64,
    /// Bytes pushed through channels bound to this target (`px`).
    pub px: u64,
}

impl Target {
    fn new(owner_session: SessionId, packet_size: u16) -> Self {
        Self {
            owner_session,
            packet_size,
            rx: 0,
            sx: 0,
            px: 0,
        }
    }
}

/// Table of registered push targets, keyed by name.
#[derive(Debug, Default)]
pub struct TargetTable {
    targets: HashMap<String, Target>,
}

impl TargetTable {
    /// Create an empty target table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new target. Fails if a target of this name already
    /// exists (spec §4.4 treats targets as uniquely owned).
    pub fn register(
        &mut self,
        name: &str,
        owner_session: SessionId,
        packet_size: u16,
    ) -> Result<(), PushError> {
        if self.targets.contains_key(name) {
            return Err(PushError::DuplicateTarget(name.to_owned()));
        }
        self.targets
            .insert(name.to_owned(), Target::new(owner_session, packet_size));
        Ok(())
    }

    /// Deregister a target. Only the owning session may do so.
    pub fn deregister(&mut self, name: &str, session: SessionId) -> Result<(), PushError> {
        match self.targets.get(name) {
            Some(t) if t.owner_session == session => {
                self.targets.remove(name);
                Ok(())
            }
            Some(_) => Err(PushError::NotOwner {
                session,
                what: name.to_owned(),
            }),
            None => Err(PushError::UnknownTarget(name.to_owned())),
        }
    }

    /// Look up a target by name.
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    /// Remove all targets owned by a session, returning their names
    /// (used on disconnect, spec §4.8 cancellation).
    pub fn remove_owned_by(&mut self, session: SessionId) -> Vec<String> {
        let names: Vec<String> = self
            .targets
            .iter()
            .filter(|(_, t)| t.owner_session == session)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            self.targets.remove(name);
        }
        names
    }
}

/// An open push channel binding a source session to a target.
#[derive(Debug, Clone)]
pub struct PushChannel {
    /// Session that opened the channel (the consumer side).
    pub owner_session: SessionId,
    /// Name of the target this channel delivers to.
    pub target_name: String,
    /// Session that will receive transferred data (the target's owner).
    pub source_session: SessionId,
    /// Negotiated packet size, copied from the target at open time.
    pub packet_size: u16,
}

/// In-memory registry of open push channels, keyed by channel id.
///
/// `Clone` shares the underlying storage via `Arc<Mutex<_>>`, matching the
/// teacher's `KeyPackageRegistry`.
#[derive(Clone)]
pub struct PushChannelRegistry {
    inner: Arc<Mutex<PushRegistryInner>>,
}

struct PushRegistryInner {
    channels: HashMap<u32, PushChannel>,
    next_channel_id: u32,
}

impl Default for PushChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PushChannelRegistry {
    /// Create an empty registry. Channel ids start at 1 (0 is never
    /// allocated, matching scenario 2 in spec §8: "channel-id ≥ 1").
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PushRegistryInner {
                channels: HashMap::new(),
                next_channel_id: 1,
            })),
        }
    }

    /// Open a push channel from `owner_session` to the target named
    /// `target_name`, looked up in `targets`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn open(
        &self,
        owner_session: SessionId,
        target_name: &str,
        targets: &TargetTable,
    ) -> Result<(u32, PushChannel), PushError> {
        let target = targets
            .get(target_name)
            .ok_or_else(|| PushError::UnknownTarget(target_name.to_owned()))?;
        let channel = PushChannel {
            owner_session,
            target_name: target_name.to_owned(),
            source_session: target.owner_session,
            packet_size: target.packet_size,
        };

        let mut inner = self.inner.lock().expect("PushChannelRegistry mutex poisoned");
        let id = inner.next_channel_id;
        inner.next_channel_id = inner.next_channel_id.wrapping_add(1).max(1);
        inner.channels.insert(id, channel.clone());
        Ok((id, channel))
    }

    /// Close a channel. Idempotent: closing an already-closed or unknown
    /// channel succeeds without error (spec §4.4: "close is idempotent").
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn close(&self, channel_id: u32) {
        let mut inner = self.inner.lock().expect("PushChannelRegistry mutex poisoned");
        inner.channels.remove(&channel_id);
    }

    /// Look up an open channel by id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn get(&self, channel_id: u32) -> Option<PushChannel> {
        let inner = self.inner.lock().expect("PushChannelRegistry mutex poisoned");
        inner.channels.get(&channel_id).cloned()
    }

    /// Transfer `payload` through `channel_id`. Returns the resolved
    /// `source_session` to deliver to and records `px` on both the
    /// channel's owner and target. If the target has disappeared from
    /// `targets`, the channel is torn down and `Unreachable` is returned
    /// (spec §4.4).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn transfer(
        &self,
        channel_id: u32,
        payload_len: usize,
        targets: &mut TargetTable,
    ) -> Result<SessionId, PushError> {
        let channel = self
            .get(channel_id)
            .ok_or(PushError::UnknownChannel(channel_id))?;

        let Some(target) = targets.targets.get_mut(&channel.target_name) else {
            self.close(channel_id);
            return Err(PushError::Unreachable(channel_id));
        };
        target.px = target.px.saturating_add(payload_len as u64);
        Ok(channel.source_session)
    }

    /// Remove every channel owned or sourced by `session` (disconnect
    /// cleanup, spec §4.8).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn remove_for_session(&self, session: SessionId) -> Vec<u32> {
        let mut inner = self.inner.lock().expect("PushChannelRegistry mutex poisoned");
        let ids: Vec<u32> = inner
            .channels
            .iter()
            .filter(|(_, c)| c.owner_session == session || c.source_session == session)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            inner.channels.remove(id);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_open_assigns_channel_id_at_least_one() {
        let mut targets = TargetTable::new();
        targets.register("power@solostec", 7, DEFAULT_PACKET_SIZE).unwrap();

        let registry = PushChannelRegistry::new();
        let (id, channel) = registry.open(1, "power@solostec", &targets).unwrap();

        assert!(id >= 1);
        assert_eq!(channel.source_session, 7);
        assert_eq!(channel.packet_size, DEFAULT_PACKET_SIZE);
    }

    #[test]
    fn open_unknown_target_fails() {
        let targets = TargetTable::new();
        let registry = PushChannelRegistry::new();
        let err = registry.open(1, "nope", &targets).unwrap_err();
        assert_eq!(err, PushError::UnknownTarget("nope".to_owned()));
    }

    #[test]
    fn close_is_idempotent() {
        let registry = PushChannelRegistry::new();
        registry.close(42);
        registry.close(42);
    }

    #[test]
    fn transfer_to_vanished_target_tears_down_channel() {
        let mut targets = TargetTable::new();
        targets.register("power@solostec", 7, DEFAULT_PACKET_SIZE).unwrap();
        let registry = PushChannelRegistry::new();
        let (id, _) = registry.open(1, "power@solostec", &targets).unwrap();

        targets.deregister("power@solostec", 7).unwrap();

        let err = registry.transfer(id, 10, &mut targets).unwrap_err();
        assert_eq!(err, PushError::Unreachable(id));
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn transfer_records_px_on_target() {
        let mut targets = TargetTable::new();
        targets.register("power@solostec", 7, DEFAULT_PACKET_SIZE).unwrap();
        let registry = PushChannelRegistry::new();
        let (id, _) = registry.open(1, "power@solostec", &targets).unwrap();

        let source = registry.transfer(id, 100, &mut targets).unwrap();
        assert_eq!(source, 7);
        assert_eq!(targets.get("power@solostec").unwrap().px, 100);
    }

    #[test]
    fn deregister_by_non_owner_fails() {
        let mut targets = TargetTable::new();
        targets.register("power@solostec", 7, DEFAULT_PACKET_SIZE).unwrap();
        let err = targets.deregister("power@solostec", 99).unwrap_err();
        assert_eq!(
            err,
            PushError::NotOwner {
                session: 99,
                what: "power@solostec".to_owned()
            }
        );
    }

    #[test]
    fn remove_for_session_tears_down_all_its_channels() {
        let mut targets = TargetTable::new();
        targets.register("a", 1, DEFAULT_PACKET_SIZE).unwrap();
        targets.register("b", 2, DEFAULT_PACKET_SIZE).unwrap();
        let registry = PushChannelRegistry::new();
        let (c1, _) = registry.open(10, "a", &targets).unwrap();
        let (c2, _) = registry.open(10, "b", &targets).unwrap();

        let removed = registry.remove_for_session(10);
        assert_eq!(removed.len(), 2);
        assert!(registry.get(c1).is_none());
        assert!(registry.get(c2).is_none());
    }
}
