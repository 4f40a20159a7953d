//! Server driver: wires the cluster bus (C8) and readout persistence
//! (C10) to the runtime-facing event/action pair, in the teacher's
//! `ServerDriver`/`ServerEvent`/`ServerAction` shape.

use tracing::{error, info};

use crate::cluster::{ClusterAction, ClusterBus, Response, Verb};
use crate::store::redb_store::{Readout, ReadoutStore};
use crate::store::CacheStore;

/// Driver configuration (spec §5's ambient tunables, kept as a `*Config`
/// struct with a `Default` in the teacher's style).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent cluster-peer connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: 256 }
    }
}

/// Events the driver processes, produced by the external runtime.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new cluster-peer TCP connection was accepted.
    PeerConnected {
        /// Runtime-assigned session id.
        session: u64,
    },
    /// A verb was received and decoded from a cluster peer.
    VerbReceived {
        /// Session the verb arrived on.
        session: u64,
        /// The decoded verb.
        verb: Verb,
    },
    /// A cluster peer's TCP connection closed.
    PeerDisconnected {
        /// Session that closed.
        session: u64,
    },
    /// A complete readout (envelope + data rows) arrived for persistence.
    ReadoutReceived {
        /// The readout to persist under one transaction.
        readout: Readout,
    },
}

/// Actions the driver produces, executed by runtime-specific code.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Send `response` to a single session.
    SendTo {
        /// Target session.
        session: u64,
        /// Response to deliver.
        response: Response,
    },
    /// Send `response` to every session in `sessions`.
    SendToMany {
        /// Target sessions.
        sessions: Vec<u64>,
        /// Response to deliver.
        response: Response,
    },
}

/// Ties the cluster bus and readout store together behind one
/// event/action interface.
pub struct ServerDriver {
    bus: ClusterBus,
    readouts: ReadoutStore,
    config: ServerConfig,
}

impl ServerDriver {
    /// Build a driver over a shared [`CacheStore`] and a durable
    /// [`ReadoutStore`].
    pub fn new(store: CacheStore, readouts: ReadoutStore, config: ServerConfig) -> Self {
        Self { bus: ClusterBus::new(store), readouts, config }
    }

    /// Driver configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Process one event, returning the actions the runtime must carry
    /// out.
    pub fn handle_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        match event {
            ServerEvent::PeerConnected { session } => {
                self.bus.connect(session);
                Vec::new()
            }
            ServerEvent::VerbReceived { session, verb } => {
                let actions = self.bus.process_verb(session, verb);
                actions.into_iter().flat_map(cluster_action_to_server_actions).collect()
            }
            ServerEvent::PeerDisconnected { session } => {
                let actions = self.bus.disconnect(session);
                actions.into_iter().flat_map(cluster_action_to_server_actions).collect()
            }
            ServerEvent::ReadoutReceived { readout } => {
                match self.readouts.insert_readout(&readout) {
                    Ok(()) => {
                        info!(
                            meter = %readout.envelope.meter_id,
                            gen = readout.envelope.gen,
                            registers = readout.data.len(),
                            "readout persisted"
                        );
                    }
                    Err(err) => {
                        error!(error = %err, "failed to persist readout");
                    }
                }
                Vec::new()
            }
        }
    }
}

/// Flattens one dispatcher decision into the runtime-facing send actions.
/// A `SendSnapshot` expands into one `SendTo` per row (spec §8 scenario
/// 6: "any order") followed by the trailing `db.res.trx` marker that
/// closes out the snapshot-before-delta guarantee.
fn cluster_action_to_server_actions(action: ClusterAction) -> Vec<ServerAction> {
    match action {
        ClusterAction::Broadcast { to, response } if to.len() == 1 => {
            vec![ServerAction::SendTo { session: to[0], response }]
        }
        ClusterAction::Broadcast { to, response } => vec![ServerAction::SendToMany { sessions: to, response }],
        ClusterAction::Reject { to, response } => vec![ServerAction::SendTo { session: to, response }],
        ClusterAction::SendSnapshot { to, table, rows } => {
            let mut actions: Vec<ServerAction> = rows
                .into_iter()
                .map(|row| ServerAction::SendTo {
                    session: to,
                    response: Response::DbInsert {
                        table: table.clone(),
                        key: row.key,
                        data: row.data,
                        gen: row.generation,
                        origin: String::new(),
                    },
                })
                .collect();
            actions.push(ServerAction::SendTo {
                session: to,
                response: Response::DbTrx { table, success: true },
            });
            actions
        }
        ClusterAction::Persist { .. } => Vec::new(),
    }
}
