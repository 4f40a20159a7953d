//! The cluster bus's verb set (spec §4.8): client-to-master requests,
//! master-to-client responses, and broadcast `db.res.*` notifications.

use crate::store::{ParamMap, RowKey};

/// A verb sent from a cluster client to the master.
#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    /// `cluster.req.login(account, pwd, pid, node-name, tag, version)`.
    ClusterLogin {
        /// Account name.
        account: String,
        /// Password.
        pwd: String,
        /// Process id of the reporting client.
        pid: u32,
        /// Node name.
        node_name: String,
        /// Origin tag used for self-echo suppression.
        tag: String,
        /// Client version string.
        version: String,
    },
    /// `cluster.req.ping(ts)`.
    ClusterPing {
        /// Timestamp echoed back in the response.
        ts: i64,
    },
    /// `db.req.subscribe(table, tag)`.
    DbSubscribe {
        /// Table to subscribe to.
        table: String,
        /// Requesting peer's origin tag.
        tag: String,
    },
    /// `db.req.insert(table, key, data, gen, origin)`.
    DbInsert {
        /// Target table.
        table: String,
        /// Explicit row key.
        key: RowKey,
        /// Row data.
        data: ParamMap,
        /// Generation hint supplied by the caller (advisory; the table's
        /// own counter is authoritative).
        gen: u64,
        /// Origin tag.
        origin: String,
    },
    /// `db.req.insert.auto(table, data, origin)`.
    DbInsertAuto {
        /// Target auto-table.
        table: String,
        /// Row data.
        data: ParamMap,
        /// Origin tag.
        origin: String,
    },
    /// `db.req.update(table, key, param-map, origin)` — merge semantics.
    DbUpdate {
        /// Target table.
        table: String,
        /// Row key.
        key: RowKey,
        /// Partial update to merge.
        param_map: ParamMap,
        /// Origin tag.
        origin: String,
    },
    /// `db.req.remove(table, key, origin)`.
    DbRemove {
        /// Target table.
        table: String,
        /// Row key.
        key: RowKey,
        /// Origin tag.
        origin: String,
    },
    /// `db.req.clear(table, origin)`.
    DbClear {
        /// Target table.
        table: String,
        /// Origin tag.
        origin: String,
    },
    /// `pty.req.login`.
    PtyLogin {
        /// Device name.
        device: String,
    },
    /// `pty.req.open.connection`.
    PtyOpenConnection {
        /// Device to connect to.
        device: String,
    },
    /// `pty.req.close.connection`.
    PtyCloseConnection {
        /// Device name.
        device: String,
    },
    /// `pty.req.register`.
    PtyRegister {
        /// Target name to register.
        target: String,
        /// Packet size to negotiate.
        packet_size: u16,
    },
    /// `pty.req.deregister`.
    PtyDeregister {
        /// Target name to deregister.
        target: String,
    },
    /// `pty.req.open.channel`.
    PtyOpenChannel {
        /// Target name to open a push channel against.
        target: String,
    },
    /// `pty.req.close.channel`.
    PtyCloseChannel {
        /// Channel id to close.
        channel_id: u32,
    },
    /// `pty.req.push.data`.
    PtyPushData {
        /// Channel id to push through.
        channel_id: u32,
        /// Payload bytes.
        payload: Vec<u8>,
    },
    /// `pty.req.transfer.data`.
    PtyTransferData {
        /// Channel id to transfer through.
        channel_id: u32,
        /// Payload bytes.
        payload: Vec<u8>,
    },
    /// `pty.req.stop`.
    PtyStop {
        /// Device name to stop.
        device: String,
    },
    /// `cfg.req.backup(name, pwd, dev, id, firmware, ts)`.
    CfgBackup {
        /// Backup name.
        name: String,
        /// Password for the backup operation.
        pwd: String,
        /// Device to back up.
        dev: String,
        /// Requesting identifier.
        id: String,
        /// Firmware version string.
        firmware: String,
        /// Request timestamp.
        ts: i64,
    },
}

/// A verb reply or broadcast sent from the master to one or more clients.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `cluster.res.login(success)`.
    ClusterLogin {
        /// Whether login succeeded.
        success: bool,
    },
    /// `cluster.res.ping(ts)`.
    ClusterPing {
        /// Timestamp echoed from the request.
        ts: i64,
    },
    /// One row of a subscribe-time snapshot, delivered as `db.res.insert`.
    DbInsert {
        /// Table the row belongs to.
        table: String,
        /// Row key.
        key: RowKey,
        /// Row data.
        data: ParamMap,
        /// Row generation.
        gen: u64,
        /// Origin tag of the change (empty for snapshot replay rows).
        origin: String,
    },
    /// `db.res.update`.
    DbUpdate {
        /// Table the row belongs to.
        table: String,
        /// Row key.
        key: RowKey,
        /// Merged row data.
        data: ParamMap,
        /// Row generation.
        gen: u64,
        /// Origin tag.
        origin: String,
    },
    /// `db.res.remove`.
    DbRemove {
        /// Table the row was removed from.
        table: String,
        /// Row key.
        key: RowKey,
        /// Origin tag.
        origin: String,
    },
    /// `db.res.clear`.
    DbClear {
        /// Table that was cleared.
        table: String,
        /// Origin tag.
        origin: String,
    },
    /// Marks the end of a subscribe-time snapshot replay for `table`
    /// (spec §8 scenario 6: "one `db.res.trx(device, true)` marker").
    DbTrx {
        /// Table whose snapshot just finished replaying.
        table: String,
        /// Always `true`: marks successful completion of the snapshot.
        success: bool,
    },
    /// A push channel was opened (reply to `pty.req.open.channel`).
    PtyChannelOpened {
        /// Allocated channel id.
        channel_id: u32,
        /// Source session id the channel delivers to.
        source: u32,
        /// Negotiated packet size.
        packet_size: u16,
    },
    /// A verb was rejected.
    Reject {
        /// Human-readable reason, matching the §7 error taxonomy.
        reason: String,
    },
}
