use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::HubConfig;
use crate::hub::channel::Channel;
use crate::hub::message::{ClientMessage, ServerMessage};

pub type ConnectionId = Uuid;

/// What a connection's writer task receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

struct Connection {
    tx: mpsc::Sender<Outbound>,
    channels: HashSet<Channel>,
    missed_pongs: u32,
}

impl Connection {
    /// A connection subscribed to `global` hears everything. One with no
    /// subscriptions hears only what is published to `global`. Otherwise it
    /// hears only the channels it asked for.
    fn wants(&self, channels: &[Channel]) -> bool {
        if self.channels.contains(&Channel::Global) {
            return true;
        }
        if self.channels.is_empty() {
            return channels.contains(&Channel::Global);
        }
        channels.iter().any(|c| self.channels.contains(c))
    }

    fn sorted_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.channels.iter().cloned().collect();
        channels.sort();
        channels
    }
}

/// Registry of live connections and their channel subscriptions.
///
/// Each connection owns a bounded outbound queue drained by its writer task.
/// Publishing never awaits on a socket: a full or closed queue removes that
/// connection and delivery to everyone else carries on.
pub struct BroadcastHub {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    buffer: usize,
    max_missed_pongs: u32,
}

impl BroadcastHub {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            buffer: config.connection_buffer.max(1),
            max_missed_pongs: config.max_missed_pongs,
        }
    }

    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ConnectionId::new_v4();
        let connection = Connection {
            tx,
            channels: HashSet::new(),
            missed_pongs: 0,
        };
        self.connections.write().await.insert(id, connection);
        log::debug!("Connection {} registered", id);
        (id, rx)
    }

    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            log::debug!("Connection {} removed", id);
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn subscriptions(&self, id: ConnectionId) -> Option<Vec<Channel>> {
        let connections = self.connections.read().await;
        connections.get(&id).map(Connection::sorted_channels)
    }

    /// Returns the connection's full subscription list afterwards.
    pub async fn subscribe<I>(&self, id: ConnectionId, channels: I) -> Option<Vec<Channel>>
    where
        I: IntoIterator<Item = Channel>,
    {
        let mut connections = self.connections.write().await;
        let connection = connections.get_mut(&id)?;
        connection.channels.extend(channels);
        Some(connection.sorted_channels())
    }

    pub async fn unsubscribe<I>(&self, id: ConnectionId, channels: I) -> Option<Vec<Channel>>
    where
        I: IntoIterator<Item = Channel>,
    {
        let mut connections = self.connections.write().await;
        let connection = connections.get_mut(&id)?;
        for channel in channels {
            connection.channels.remove(&channel);
        }
        Some(connection.sorted_channels())
    }

    pub async fn record_pong(&self, id: ConnectionId) {
        if let Some(connection) = self.connections.write().await.get_mut(&id) {
            connection.missed_pongs = 0;
        }
    }

    pub async fn handle_client_message(&self, id: ConnectionId, message: ClientMessage) {
        let current = match message {
            ClientMessage::Subscribe(channels) => self.subscribe(id, channels).await,
            ClientMessage::Unsubscribe(channels) => self.unsubscribe(id, channels).await,
            ClientMessage::Pong => {
                self.record_pong(id).await;
                return;
            }
        };
        if let Some(channels) = current {
            self.send_to(id, ServerMessage::subscribed(&channels)).await;
        }
    }

    /// Direct message to a single connection.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let sent = {
            let connections = self.connections.read().await;
            match connections.get(&id) {
                Some(connection) => connection.tx.try_send(Outbound::Message(message)).is_ok(),
                None => return false,
            }
        };
        if !sent {
            self.drop_connections(&[id], "send failed").await;
        }
        sent
    }

    pub async fn publish(&self, channel: Channel, message: ServerMessage) -> usize {
        self.publish_to(&[channel], message).await
    }

    /// Deliver `message` once to every connection that wants any of `channels`.
    /// Returns the number of connections it was queued for.
    pub async fn publish_to(&self, channels: &[Channel], message: ServerMessage) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, connection) in connections.iter() {
                if !connection.wants(channels) {
                    continue;
                }
                match connection.tx.try_send(Outbound::Message(message.clone())) {
                    Ok(()) => delivered += 1,
                    Err(_) => failed.push(*id),
                }
            }
        }
        if !failed.is_empty() {
            self.drop_connections(&failed, "send failed").await;
        }
        delivered
    }

    /// One liveness round: evict connections that have not answered the last
    /// `max_missed_pongs` pings, then ping everyone else. Returns evicted ids.
    pub async fn heartbeat(&self) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        let mut connections = self.connections.write().await;

        for (id, connection) in connections.iter_mut() {
            if connection.missed_pongs >= self.max_missed_pongs {
                evicted.push(*id);
                continue;
            }
            connection.missed_pongs += 1;
            if connection
                .tx
                .try_send(Outbound::Message(ServerMessage::ping()))
                .is_err()
            {
                evicted.push(*id);
            }
        }

        for id in &evicted {
            if let Some(connection) = connections.remove(id) {
                let _ = connection.tx.try_send(Outbound::Close);
                log::info!("Connection {} closed after missing heartbeats", id);
            }
        }
        evicted
    }

    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so new connections get a full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        hub.heartbeat().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            log::debug!("Heartbeat loop stopped");
        })
    }

    async fn drop_connections(&self, ids: &[ConnectionId], reason: &str) {
        let mut connections = self.connections.write().await;
        for id in ids {
            if let Some(connection) = connections.remove(id) {
                let _ = connection.tx.try_send(Outbound::Close);
                log::warn!("Connection {} removed: {}", id, reason);
            }
        }
    }
}
