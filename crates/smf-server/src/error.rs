//! Error types for the push-channel manager, cluster bus, and cache/readout
//! stores (spec §7: `ResourceNotFound`, `Busy`, `IoError`, `ConfigError`).

use thiserror::Error;

/// Errors raised by [`crate::push::PushChannelRegistry`] and
/// [`crate::push::TargetTable`] (spec §4.4).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// `open_push_channel` named a target that has not been registered.
    #[error("target {0:?} is not registered")]
    UnknownTarget(String),

    /// `register_target` named a target that already exists.
    #[error("target {0:?} is already registered")]
    DuplicateTarget(String),

    /// `close_push_channel`/`register_target` issued by a session that
    /// does not own the channel/target in question.
    #[error("session {session} is not the owner of {what:?}")]
    NotOwner {
        /// Session that attempted the operation.
        session: u64,
        /// Channel id or target name it attempted to act on.
        what: String,
    },

    /// The channel's target disappeared while a transfer was in flight
    /// (spec §4.4: "fail with UNREACHABLE and the channel is torn down").
    #[error("push channel {0} target is unreachable")]
    Unreachable(u32),

    /// `transfer_push_data`/`close_push_channel` named a channel id this
    /// registry never allocated.
    #[error("push channel {0} does not exist")]
    UnknownChannel(u32),
}

/// Errors raised by the cache store (spec §4.9) and readout persistence
/// (spec §4.10).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Operation named a table that was never defined.
    #[error("unknown table {0:?}")]
    UnknownTable(String),

    /// `lookup`/`merge`/`erase` named a key that table does not hold.
    #[error("row {key:?} not found in table {table:?}")]
    RowNotFound {
        /// Table that was queried.
        table: String,
        /// Key that was missing.
        key: String,
    },

    /// Underlying redb/IO failure persisting a readout (spec §7 `IOError`).
    #[error("I/O error: {0}")]
    Io(String),

    /// Readout row failed to (de)serialize to its on-disk representation.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the cluster bus (spec §4.8).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// Verb issued by a tag that never logged in.
    #[error("peer {0:?} is not logged in")]
    NotLoggedIn(String),

    /// `cfg.req.backup` named a device not owned by any connected session.
    #[error("device {0:?} is not reachable from any session")]
    ResourceNotFound(String),

    /// Table/operation rejected for configuration reasons (spec §7
    /// `ConfigError`): bad OBIS, bad key length, etc. Does not disturb
    /// other live sessions.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Underlying cache-store failure.
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for ClusterError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}
