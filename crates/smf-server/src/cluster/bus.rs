//! The cluster bus dispatcher (spec §4.8, §5, §8 scenario 6).
//!
//! `ClusterBus::process_verb` is a pure decision function in the teacher's
//! `Sequencer::process_frame`/`ServerDriver` style: it mutates the shared
//! [`CacheStore`] (the one piece of genuinely shared state, per spec §5)
//! and returns a `Vec<ClusterAction>` describing what I/O the driver must
//! perform — actual socket writes happen one layer up, never inside this
//! dispatcher.

use tracing::{debug, info, warn};

use crate::cluster::registry::ClusterRegistry;
use crate::cluster::verb::{Response, Verb};
use crate::error::ClusterError;
use crate::push::{PushChannelRegistry, TargetTable, DEFAULT_PACKET_SIZE};
use crate::store::{CacheStore, CellValue, ParamMap, Row, RowKey};

/// The meter table a `gwIEC` placeholder row is derived from.
const METER_TABLE: &str = "meter";
/// Placeholder table holding one row per gateway that at least one
/// "meter" row currently references, named after the original system's
/// `gwIEC` table.
const GATEWAY_TABLE: &str = "gwIEC";
/// Column in a "meter" row naming the gateway it belongs to.
const GATEWAY_COLUMN: &str = "gw";

/// What the driver must do in response to processing one verb.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterAction {
    /// Send `response` to every session in `to`.
    Broadcast {
        /// Recipient sessions.
        to: Vec<u64>,
        /// The message to deliver.
        response: Response,
    },
    /// A table mutation was committed; carried separately from
    /// `Broadcast` so the driver can additionally persist or log the
    /// change without re-deriving it from the wire message.
    Persist {
        /// Table that changed.
        table: String,
        /// Key of the row that changed (empty for a clear).
        key: Option<RowKey>,
        /// Generation the mutation landed at.
        generation: u64,
    },
    /// Reject the request; send `response` (a `Reject`) to the requester
    /// alone. Other sessions are undisturbed (spec §7 `ConfigError`:
    /// "fail the configuration call, do not disturb live sessions").
    Reject {
        /// Requesting session.
        to: u64,
        /// The rejection.
        response: Response,
    },
    /// Send the full current snapshot of `table` to `to` as a sequence
    /// of `DbInsert` responses, followed by a `DbTrx` marker (spec §8
    /// scenario 6).
    SendSnapshot {
        /// Requesting session.
        to: u64,
        /// Table being snapshotted.
        table: String,
        /// Snapshot rows, in no particular order (scenario 6: "any
        /// order").
        rows: Vec<Row>,
    },
}

/// The cluster bus: peer registry, push-channel state, and the shared
/// cache store, wired together into one verb dispatcher.
pub struct ClusterBus {
    registry: ClusterRegistry,
    push_channels: PushChannelRegistry,
    targets: TargetTable,
    store: CacheStore,
}

impl ClusterBus {
    /// Build a bus over an existing [`CacheStore`] (so the driver and any
    /// report-generation code can share the same tables).
    pub fn new(store: CacheStore) -> Self {
        Self {
            registry: ClusterRegistry::new(),
            push_channels: PushChannelRegistry::new(),
            targets: TargetTable::new(),
            store,
        }
    }

    /// Register a newly connected (not yet logged-in) peer session.
    pub fn connect(&mut self, session: u64) {
        self.registry.connect(session);
    }

    /// Process one verb from `session`, returning the actions the driver
    /// must carry out.
    pub fn process_verb(&mut self, session: u64, verb: Verb) -> Vec<ClusterAction> {
        match verb {
            Verb::ClusterLogin { account, pwd, node_name, tag, .. } => {
                self.handle_login(session, account, pwd, node_name, tag)
            }
            Verb::ClusterPing { ts } => {
                vec![ClusterAction::Broadcast { to: vec![session], response: Response::ClusterPing { ts } }]
            }
            Verb::DbSubscribe { table, tag } => self.handle_subscribe(session, &table, &tag),
            Verb::DbInsert { table, key, data, origin, .. } => {
                self.handle_insert(session, &table, key, data, &origin)
            }
            Verb::DbInsertAuto { table, data, origin } => {
                self.handle_insert_auto(session, &table, data, &origin)
            }
            Verb::DbUpdate { table, key, param_map, origin } => {
                self.handle_update(session, &table, key, param_map, &origin)
            }
            Verb::DbRemove { table, key, origin } => {
                self.handle_remove(session, &table, key, &origin)
            }
            Verb::DbClear { table, origin } => self.handle_clear(session, &table, &origin),
            Verb::PtyRegister { target, packet_size } => {
                self.handle_pty_register(session, &target, packet_size)
            }
            Verb::PtyDeregister { target } => self.handle_pty_deregister(session, &target),
            Verb::PtyOpenChannel { target } => self.handle_pty_open_channel(session, &target),
            Verb::PtyCloseChannel { channel_id } => self.handle_pty_close_channel(channel_id),
            Verb::PtyPushData { channel_id, payload } | Verb::PtyTransferData { channel_id, payload } => {
                self.handle_pty_transfer(session, channel_id, &payload)
            }
            Verb::PtyLogin { device } | Verb::PtyOpenConnection { device } => {
                self.registry.own_device(session, &device);
                Vec::new()
            }
            Verb::PtyCloseConnection { device } | Verb::PtyStop { device } => {
                self.registry.disown_device(&device);
                Vec::new()
            }
            Verb::CfgBackup { dev, .. } => self.handle_cfg_backup(session, &dev),
        }
    }

    /// Clean up all state owned by `session` on TCP disconnect (spec
    /// §4.8 cancellation): remove its cluster-session and pty rows, tear
    /// down its push channels, and broadcast removals to the survivors.
    pub fn disconnect(&mut self, session: u64) -> Vec<ClusterAction> {
        let (tables, devices) = self.registry.disconnect(session);
        self.push_channels.remove_for_session(session);
        self.targets.remove_owned_by(session);

        let mut actions = Vec::new();
        for device in devices {
            let key: RowKey = vec![crate::store::CellValue::Text(device.clone())];
            if self
                .store
                .with_table("pty", |t| Ok(t.erase(&key)))
                .unwrap_or(false)
            {
                let recipients: Vec<u64> =
                    self.registry.subscribers_of("pty").filter(|&s| s != session).collect();
                if !recipients.is_empty() {
                    actions.push(ClusterAction::Broadcast {
                        to: recipients,
                        response: Response::DbRemove {
                            table: "pty".to_owned(),
                            key,
                            origin: String::new(),
                        },
                    });
                }
            }
        }
        info!(session, ?tables, "cluster peer disconnected");
        actions
    }

    fn handle_login(
        &mut self,
        session: u64,
        account: String,
        pwd: String,
        node_name: String,
        tag: String,
    ) -> Vec<ClusterAction> {
        let success = !account.is_empty() && !pwd.is_empty();
        if success {
            self.registry.login(session, account, node_name, tag);
        } else {
            warn!(session, "cluster login rejected");
        }
        vec![ClusterAction::Broadcast {
            to: vec![session],
            response: Response::ClusterLogin { success },
        }]
    }

    fn require_logged_in(&self, session: u64) -> Result<(), ClusterError> {
        if self.registry.is_logged_in(session) {
            Ok(())
        } else {
            Err(ClusterError::NotLoggedIn(session.to_string()))
        }
    }

    fn handle_subscribe(&mut self, session: u64, table: &str, tag: &str) -> Vec<ClusterAction> {
        if let Err(err) = self.require_logged_in(session) {
            return vec![reject(session, err)];
        }
        self.registry.subscribe(session, table);
        let _ = tag;

        let rows = match self.store.with_table_ref(table, |t| Ok(t.rows().cloned().collect())) {
            Ok(rows) => rows,
            Err(err) => return vec![reject(session, ClusterError::from(err))],
        };
        debug!(session, table, rows = rows.len(), "subscribed, sending snapshot");
        vec![ClusterAction::SendSnapshot { to: session, table: table.to_owned(), rows }]
    }

    fn handle_insert(
        &mut self,
        session: u64,
        table: &str,
        key: RowKey,
        data: ParamMap,
        origin: &str,
    ) -> Vec<ClusterAction> {
        if let Err(err) = self.require_logged_in(session) {
            return vec![reject(session, err)];
        }
        let row = match self.store.with_table(table, |t| Ok(t.insert(key, data))) {
            Ok(row) => row,
            Err(err) => return vec![reject(session, ClusterError::from(err))],
        };
        let mut actions = self.broadcast_row_change(table, &row, origin, |data, gen| Response::DbInsert {
            table: table.to_owned(),
            key: data.key.clone(),
            data: data.data.clone(),
            gen,
            origin: origin.to_owned(),
        });
        if table == METER_TABLE {
            actions.extend(self.ensure_gateway_placeholder(&row, origin));
        }
        actions
    }

    fn handle_insert_auto(
        &mut self,
        session: u64,
        table: &str,
        data: ParamMap,
        origin: &str,
    ) -> Vec<ClusterAction> {
        if let Err(err) = self.require_logged_in(session) {
            return vec![reject(session, err)];
        }
        let row = match self.store.with_table(table, |t| t.insert_auto(data)) {
            Ok(row) => row,
            Err(err) => return vec![reject(session, ClusterError::from(err))],
        };
        self.broadcast_row_change(table, &row, origin, |data, gen| Response::DbInsert {
            table: table.to_owned(),
            key: data.key.clone(),
            data: data.data.clone(),
            gen,
            origin: origin.to_owned(),
        })
    }

    fn handle_update(
        &mut self,
        session: u64,
        table: &str,
        key: RowKey,
        param_map: ParamMap,
        origin: &str,
    ) -> Vec<ClusterAction> {
        if let Err(err) = self.require_logged_in(session) {
            return vec![reject(session, err)];
        }
        let merged = match self.store.with_table(table, |t| t.merge(&key, param_map)) {
            Ok(row) => row,
            Err(err) => return vec![reject(session, ClusterError::from(err))],
        };
        let Some(row) = merged else {
            // No-op merge: no generation bump, no notification (spec §8).
            return Vec::new();
        };
        self.broadcast_row_change(table, &row, origin, |data, gen| Response::DbUpdate {
            table: table.to_owned(),
            key: data.key.clone(),
            data: data.data.clone(),
            gen,
            origin: origin.to_owned(),
        })
    }

    fn handle_remove(
        &mut self,
        session: u64,
        table: &str,
        key: RowKey,
        origin: &str,
    ) -> Vec<ClusterAction> {
        if let Err(err) = self.require_logged_in(session) {
            return vec![reject(session, err)];
        }
        let gateway_of_removed = if table == METER_TABLE {
            self.store.with_table_ref(table, |t| Ok(t.lookup(&key).and_then(gateway_key_of))).unwrap_or(None)
        } else {
            None
        };
        let removed = match self.store.with_table(table, |t| Ok(t.erase(&key))) {
            Ok(removed) => removed,
            Err(err) => return vec![reject(session, ClusterError::from(err))],
        };
        if !removed {
            return Vec::new();
        }
        let recipients = self.recipients_excluding_origin(table, origin);
        let mut actions = Vec::new();
        if !recipients.is_empty() {
            actions.push(ClusterAction::Broadcast {
                to: recipients,
                response: Response::DbRemove { table: table.to_owned(), key, origin: origin.to_owned() },
            });
        }
        if let Some(gw_key) = gateway_of_removed {
            actions.extend(self.retire_gateway_placeholder_if_orphaned(&gw_key, origin));
        }
        actions
    }

    /// Insert a `gwIEC` placeholder for `meter_row`'s gateway if no
    /// gateway row exists for it yet. A no-op if the `meter` row carries
    /// no `gw` column, if the placeholder already exists, or if the
    /// embedding binary never defined a `gwIEC` table.
    fn ensure_gateway_placeholder(&mut self, meter_row: &Row, origin: &str) -> Vec<ClusterAction> {
        let Some(gw_key) = gateway_key_of(meter_row) else {
            return Vec::new();
        };
        let key = vec![gw_key];
        let already_present =
            self.store.with_table_ref(GATEWAY_TABLE, |t| Ok(t.lookup(&key).is_some()));
        match already_present {
            Ok(true) => Vec::new(),
            Ok(false) => match self.store.with_table(GATEWAY_TABLE, |t| Ok(t.insert(key, ParamMap::new()))) {
                Ok(row) => {
                    debug!(table = GATEWAY_TABLE, "gwIEC placeholder inserted");
                    self.broadcast_row_change(GATEWAY_TABLE, &row, origin, |data, gen| Response::DbInsert {
                        table: GATEWAY_TABLE.to_owned(),
                        key: data.key.clone(),
                        data: data.data.clone(),
                        gen,
                        origin: origin.to_owned(),
                    })
                }
                Err(_) => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    /// Remove the `gwIEC` placeholder for `gw_key` once no `meter` row
    /// references it any longer.
    fn retire_gateway_placeholder_if_orphaned(&mut self, gw_key: &CellValue, origin: &str) -> Vec<ClusterAction> {
        let still_referenced = self
            .store
            .with_table_ref(METER_TABLE, |t| Ok(t.rows().any(|r| gateway_key_of(r).as_ref() == Some(gw_key))))
            .unwrap_or(true);
        if still_referenced {
            return Vec::new();
        }
        let key = vec![gw_key.clone()];
        match self.store.with_table(GATEWAY_TABLE, |t| Ok(t.erase(&key))) {
            Ok(true) => {
                debug!(table = GATEWAY_TABLE, "gwIEC placeholder retired, last meter removed");
                let recipients = self.recipients_excluding_origin(GATEWAY_TABLE, origin);
                if recipients.is_empty() {
                    Vec::new()
                } else {
                    vec![ClusterAction::Broadcast {
                        to: recipients,
                        response: Response::DbRemove { table: GATEWAY_TABLE.to_owned(), key, origin: origin.to_owned() },
                    }]
                }
            }
            _ => Vec::new(),
        }
    }

    fn handle_clear(&mut self, session: u64, table: &str, origin: &str) -> Vec<ClusterAction> {
        if let Err(err) = self.require_logged_in(session) {
            return vec![reject(session, err)];
        }
        if let Err(err) = self.store.with_table(table, |t| {
            t.clear();
            Ok(())
        }) {
            return vec![reject(session, ClusterError::from(err))];
        }
        let recipients = self.recipients_excluding_origin(table, origin);
        let mut actions = Vec::new();
        if !recipients.is_empty() {
            actions.push(ClusterAction::Broadcast {
                to: recipients,
                response: Response::DbClear { table: table.to_owned(), origin: origin.to_owned() },
            });
        }
        actions
    }

    fn handle_pty_register(
        &mut self,
        session: u64,
        target: &str,
        packet_size: u16,
    ) -> Vec<ClusterAction> {
        let packet_size = if packet_size == 0 { DEFAULT_PACKET_SIZE } else { packet_size };
        match self.targets.register(target, session, packet_size) {
            Ok(()) => Vec::new(),
            Err(err) => vec![ClusterAction::Reject {
                to: session,
                response: Response::Reject { reason: err.to_string() },
            }],
        }
    }

    fn handle_pty_deregister(&mut self, session: u64, target: &str) -> Vec<ClusterAction> {
        match self.targets.deregister(target, session) {
            Ok(()) => Vec::new(),
            Err(err) => vec![ClusterAction::Reject {
                to: session,
                response: Response::Reject { reason: err.to_string() },
            }],
        }
    }

    fn handle_pty_open_channel(&mut self, session: u64, target: &str) -> Vec<ClusterAction> {
        match self.push_channels.open(session, target, &self.targets) {
            Ok((channel_id, channel)) => vec![ClusterAction::Broadcast {
                to: vec![session],
                response: Response::PtyChannelOpened {
                    channel_id,
                    source: channel.source_session as u32,
                    packet_size: channel.packet_size,
                },
            }],
            Err(err) => vec![ClusterAction::Reject {
                to: session,
                response: Response::Reject { reason: err.to_string() },
            }],
        }
    }

    fn handle_pty_close_channel(&mut self, channel_id: u32) -> Vec<ClusterAction> {
        self.push_channels.close(channel_id);
        Vec::new()
    }

    fn handle_pty_transfer(
        &mut self,
        session: u64,
        channel_id: u32,
        payload: &[u8],
    ) -> Vec<ClusterAction> {
        match self.push_channels.transfer(channel_id, payload.len(), &mut self.targets) {
            Ok(target_session) => vec![ClusterAction::Broadcast {
                to: vec![target_session],
                response: Response::PtyChannelOpened {
                    channel_id,
                    source: session as u32,
                    packet_size: payload.len() as u16,
                },
            }],
            Err(err) => vec![ClusterAction::Reject {
                to: session,
                response: Response::Reject { reason: err.to_string() },
            }],
        }
    }

    fn handle_cfg_backup(&mut self, session: u64, device: &str) -> Vec<ClusterAction> {
        match self.registry.device_owner(device) {
            Some(owner) => vec![ClusterAction::Broadcast {
                to: vec![owner],
                response: Response::Reject { reason: format!("cfg.req.backup forwarded for {device}") },
            }],
            None => vec![ClusterAction::Reject {
                to: session,
                response: Response::Reject {
                    reason: ClusterError::ResourceNotFound(device.to_owned()).to_string(),
                },
            }],
        }
    }

    /// Subscribers to `table` whose own origin tag does not match
    /// `origin` (spec §4.8 ordering rule 3: "a subscriber never receives
    /// its own change back").
    fn recipients_excluding_origin(&self, table: &str, origin: &str) -> Vec<u64> {
        self.registry
            .subscribers_of(table)
            .filter(|&s| self.registry.peer(s).is_none_or(|p| p.tag != origin))
            .collect()
    }

    fn broadcast_row_change(
        &self,
        table: &str,
        row: &Row,
        origin: &str,
        mk: impl FnOnce(&Row, u64) -> Response,
    ) -> Vec<ClusterAction> {
        let recipients = self.recipients_excluding_origin(table, origin);
        let mut actions = vec![ClusterAction::Persist {
            table: table.to_owned(),
            key: Some(row.key.clone()),
            generation: row.generation,
        }];
        if !recipients.is_empty() {
            actions.push(ClusterAction::Broadcast { to: recipients, response: mk(row, row.generation) });
        }
        actions
    }
}

/// Extracts the `gw` column from a `meter` row, if present and non-nil.
fn gateway_key_of(row: &Row) -> Option<CellValue> {
    match row.data.get(GATEWAY_COLUMN) {
        Some(CellValue::Bytes(b)) if b.is_empty() => None,
        Some(CellValue::Text(s)) if s.is_empty() => None,
        Some(v) => Some(v.clone()),
        None => None,
    }
}

fn reject(session: u64, err: ClusterError) -> ClusterAction {
    ClusterAction::Reject { to: session, response: Response::Reject { reason: err.to_string() } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CellValue, ColumnType, Table, TableMeta};

    fn make_bus() -> ClusterBus {
        let store = CacheStore::new();
        store.define_table(Table::new(TableMeta {
            name: "device".to_owned(),
            columns: vec![("id".to_owned(), ColumnType::Uint)],
            pk_count: 1,
        }));
        store.define_table(Table::new(TableMeta {
            name: "pty".to_owned(),
            columns: vec![("id".to_owned(), ColumnType::Text)],
            pk_count: 1,
        }));
        ClusterBus::new(store)
    }

    #[test]
    fn login_then_ping_roundtrips_timestamp() {
        let mut bus = make_bus();
        bus.connect(1);
        bus.process_verb(
            1,
            Verb::ClusterLogin {
                account: "acct".to_owned(),
                pwd: "pwd".to_owned(),
                pid: 1,
                node_name: "node".to_owned(),
                tag: "tag-1".to_owned(),
                version: "1.0".to_owned(),
            },
        );
        let actions = bus.process_verb(1, Verb::ClusterPing { ts: 42 });
        assert_eq!(
            actions,
            vec![ClusterAction::Broadcast { to: vec![1], response: Response::ClusterPing { ts: 42 } }]
        );
    }

    #[test]
    fn verb_before_login_is_rejected() {
        let mut bus = make_bus();
        bus.connect(1);
        let actions = bus.process_verb(
            1,
            Verb::DbSubscribe { table: "device".to_owned(), tag: "t".to_owned() },
        );
        assert!(matches!(
            actions.as_slice(),
            [ClusterAction::Reject { .. }]
        ));
    }

    #[test]
    fn subscribe_replays_current_snapshot() {
        let mut bus = make_bus();
        bus.connect(1);
        bus.process_verb(
            1,
            Verb::ClusterLogin {
                account: "a".to_owned(),
                pwd: "p".to_owned(),
                pid: 1,
                node_name: "n".to_owned(),
                tag: "t".to_owned(),
                version: "1".to_owned(),
            },
        );
        bus.connect(2);
        bus.process_verb(
            2,
            Verb::ClusterLogin {
                account: "a".to_owned(),
                pwd: "p".to_owned(),
                pid: 1,
                node_name: "n".to_owned(),
                tag: "t2".to_owned(),
                version: "1".to_owned(),
            },
        );
        for id in 0u64..3 {
            bus.process_verb(
                1,
                Verb::DbInsert {
                    table: "device".to_owned(),
                    key: vec![CellValue::Uint(id)],
                    data: ParamMap::new(),
                    gen: 0,
                    origin: "t".to_owned(),
                },
            );
        }

        let actions = bus.process_verb(
            2,
            Verb::DbSubscribe { table: "device".to_owned(), tag: "t2".to_owned() },
        );
        match actions.as_slice() {
            [ClusterAction::SendSnapshot { to, table, rows }] => {
                assert_eq!(*to, 2);
                assert_eq!(table, "device");
                assert_eq!(rows.len(), 3);
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn origin_tag_suppresses_self_echo() {
        let mut bus = make_bus();
        bus.connect(1);
        bus.process_verb(
            1,
            Verb::ClusterLogin {
                account: "a".to_owned(),
                pwd: "p".to_owned(),
                pid: 1,
                node_name: "n".to_owned(),
                tag: "1".to_owned(),
                version: "1".to_owned(),
            },
        );
        bus.process_verb(1, Verb::DbSubscribe { table: "device".to_owned(), tag: "1".to_owned() });

        let actions = bus.process_verb(
            1,
            Verb::DbInsert {
                table: "device".to_owned(),
                key: vec![CellValue::Uint(1)],
                data: ParamMap::new(),
                gen: 0,
                origin: "1".to_owned(),
            },
        );
        // Only the Persist action, no Broadcast back to session 1.
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ClusterAction::Persist { .. }));
    }

    #[test]
    fn disconnect_removes_pty_row_and_broadcasts() {
        let mut bus = make_bus();
        bus.connect(1);
        bus.connect(2);
        for session in [1, 2] {
            bus.process_verb(
                session,
                Verb::ClusterLogin {
                    account: "a".to_owned(),
                    pwd: "p".to_owned(),
                    pid: 1,
                    node_name: "n".to_owned(),
                    tag: session.to_string(),
                    version: "1".to_owned(),
                },
            );
        }
        bus.process_verb(2, Verb::DbSubscribe { table: "pty".to_owned(), tag: "2".to_owned() });
        bus.process_verb(1, Verb::PtyLogin { device: "meter-01".to_owned() });
        bus.process_verb(
            1,
            Verb::DbInsert {
                table: "pty".to_owned(),
                key: vec![CellValue::Text("meter-01".to_owned())],
                data: ParamMap::new(),
                gen: 0,
                origin: "1".to_owned(),
            },
        );

        let actions = bus.disconnect(1);
        assert!(actions.iter().any(|a| matches!(
            a,
            ClusterAction::Broadcast { response: Response::DbRemove { .. }, .. }
        )));
    }

    fn make_bus_with_meter_tables() -> ClusterBus {
        let store = CacheStore::new();
        store.define_table(Table::new(TableMeta {
            name: METER_TABLE.to_owned(),
            columns: vec![("id".to_owned(), ColumnType::Uint), ("gw".to_owned(), ColumnType::Bytes)],
            pk_count: 1,
        }));
        store.define_table(Table::new(TableMeta {
            name: GATEWAY_TABLE.to_owned(),
            columns: vec![("id".to_owned(), ColumnType::Bytes)],
            pk_count: 1,
        }));
        ClusterBus::new(store)
    }

    fn login(bus: &mut ClusterBus, session: u64, tag: &str) {
        bus.connect(session);
        bus.process_verb(
            session,
            Verb::ClusterLogin {
                account: "a".to_owned(),
                pwd: "p".to_owned(),
                pid: 1,
                node_name: "n".to_owned(),
                tag: tag.to_owned(),
                version: "1".to_owned(),
            },
        );
    }

    fn insert_meter(bus: &mut ClusterBus, session: u64, meter_id: u64, gw: &[u8], origin: &str) {
        let mut data = ParamMap::new();
        data.insert(GATEWAY_COLUMN.to_owned(), CellValue::Bytes(gw.to_vec()));
        bus.process_verb(
            session,
            Verb::DbInsert {
                table: METER_TABLE.to_owned(),
                key: vec![CellValue::Uint(meter_id)],
                data,
                gen: 0,
                origin: origin.to_owned(),
            },
        );
    }

    #[test]
    fn meter_insert_creates_gw_iec_placeholder_once() {
        let mut bus = make_bus_with_meter_tables();
        login(&mut bus, 1, "t1");

        let actions = bus.process_verb(1, {
            let mut data = ParamMap::new();
            data.insert(GATEWAY_COLUMN.to_owned(), CellValue::Bytes(vec![1, 2, 3]));
            Verb::DbInsert {
                table: METER_TABLE.to_owned(),
                key: vec![CellValue::Uint(1)],
                data,
                gen: 0,
                origin: "t1".to_owned(),
            }
        });
        assert!(
            bus.store.with_table_ref(GATEWAY_TABLE, |t| Ok(t.lookup(&vec![CellValue::Bytes(vec![1, 2, 3])]).is_some())).unwrap(),
            "gwIEC placeholder must exist after first meter insert"
        );
        let _ = actions;

        // A second meter referencing the same gateway must not re-create
        // (or re-broadcast) the placeholder.
        let before = bus
            .store
            .with_table_ref(GATEWAY_TABLE, |t| Ok(t.lookup(&vec![CellValue::Bytes(vec![1, 2, 3])]).unwrap().generation))
            .unwrap();
        insert_meter(&mut bus, 1, 2, &[1, 2, 3], "t1");
        let after = bus
            .store
            .with_table_ref(GATEWAY_TABLE, |t| Ok(t.lookup(&vec![CellValue::Bytes(vec![1, 2, 3])]).unwrap().generation))
            .unwrap();
        assert_eq!(before, after, "placeholder generation must not change on a second meter for the same gateway");
    }

    #[test]
    fn gw_iec_placeholder_retired_when_last_meter_removed() {
        let mut bus = make_bus_with_meter_tables();
        login(&mut bus, 1, "t1");
        insert_meter(&mut bus, 1, 1, &[9, 9], "t1");
        insert_meter(&mut bus, 1, 2, &[9, 9], "t1");

        bus.process_verb(
            1,
            Verb::DbRemove { table: METER_TABLE.to_owned(), key: vec![CellValue::Uint(1)], origin: "t1".to_owned() },
        );
        assert!(
            bus.store.with_table_ref(GATEWAY_TABLE, |t| Ok(t.lookup(&vec![CellValue::Bytes(vec![9, 9])]).is_some())).unwrap(),
            "placeholder survives while another meter still references the gateway"
        );

        bus.process_verb(
            1,
            Verb::DbRemove { table: METER_TABLE.to_owned(), key: vec![CellValue::Uint(2)], origin: "t1".to_owned() },
        );
        assert!(
            !bus.store.with_table_ref(GATEWAY_TABLE, |t| Ok(t.lookup(&vec![CellValue::Bytes(vec![9, 9])]).is_some())).unwrap(),
            "placeholder must be retired once the last referencing meter is removed"
        );
    }
}
