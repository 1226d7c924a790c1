//! Cross-tab coordination: single-leader election among same-origin tabs.
//!
//! One tab per `(origin, application)` owns the server connection; the
//! others publish their operations to it over the tab channel and receive
//! state through the persistence adapter's change signal. Election rules:
//! a starting tab announces itself and claims leadership if no leader speaks
//! within the claim window; ties break toward the lexicographically largest
//! tab id; a leader that misses enough heartbeats is replaced.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use synckit_core::config::TabsConfig;
use synckit_core::{ClientId, SyncResult};
use synckit_crdt::OperationEnvelope;

/// Messages on the in-browser broadcast channel (or its test stand-in).
#[derive(Debug, Clone)]
pub enum TabMessage {
    /// A tab started and is looking for the leader.
    Announce { tab_id: String },
    /// A tab claims (or defends) leadership.
    LeaderClaim { tab_id: String },
    /// Periodic leader liveness.
    Heartbeat { tab_id: String },
    /// The leader is going away voluntarily.
    Resign { tab_id: String },
    /// A follower routes an operation through the leader on behalf of its
    /// own client id.
    ForwardOp {
        tab_id: String,
        client_id: ClientId,
        envelope: OperationEnvelope,
    },
}

/// The same-origin broadcast channel surface.
#[async_trait]
pub trait TabChannel: Send + Sync {
    async fn publish(&self, message: TabMessage) -> SyncResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<TabMessage>;
}

/// In-process channel: every subscriber sees every publish, including the
/// publisher (matching BroadcastChannel-with-self-delivery semantics the
/// coordinator filters on tab id).
pub struct LocalTabChannel {
    sender: broadcast::Sender<TabMessage>,
}

impl LocalTabChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }
}

impl Default for LocalTabChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TabChannel for LocalTabChannel {
    async fn publish(&self, message: TabMessage) -> SyncResult<()> {
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TabMessage> {
        self.sender.subscribe()
    }
}

/// This tab's current role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabRole {
    Electing,
    Leader,
    Follower { leader: String },
}

/// Runs the election protocol for one tab.
pub struct TabCoordinator {
    tab_id: String,
    channel: Arc<dyn TabChannel>,
    role_rx: watch::Receiver<TabRole>,
    task: JoinHandle<()>,
}

impl TabCoordinator {
    /// Start coordinating. The election task runs until `shutdown`.
    pub fn spawn(channel: Arc<dyn TabChannel>, config: TabsConfig) -> Self {
        let tab_id = Uuid::new_v4().to_string();
        let (role_tx, role_rx) = watch::channel(TabRole::Electing);
        let task = tokio::spawn(election_task(
            tab_id.clone(),
            channel.clone(),
            config,
            role_tx,
        ));
        Self {
            tab_id,
            channel,
            role_rx,
            task,
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn role(&self) -> TabRole {
        self.role_rx.borrow().clone()
    }

    /// Watch role transitions (leader ↔ follower).
    pub fn watch_role(&self) -> watch::Receiver<TabRole> {
        self.role_rx.clone()
    }

    /// Subscribe to raw channel traffic (the runtime consumes forwarded
    /// operations from here).
    pub fn channel_subscribe(&self) -> broadcast::Receiver<TabMessage> {
        self.channel.subscribe()
    }

    /// Follower path: hand an operation to the leader for delivery under
    /// this tab's client id.
    pub async fn forward_op(
        &self,
        client_id: ClientId,
        envelope: OperationEnvelope,
    ) -> SyncResult<()> {
        self.channel
            .publish(TabMessage::ForwardOp {
                tab_id: self.tab_id.clone(),
                client_id,
                envelope,
            })
            .await
    }

    /// Resign (if leading) and stop the election task.
    pub async fn shutdown(self) {
        let _ = self
            .channel
            .publish(TabMessage::Resign {
                tab_id: self.tab_id.clone(),
            })
            .await;
        self.task.abort();
    }
}

async fn election_task(
    tab_id: String,
    channel: Arc<dyn TabChannel>,
    config: TabsConfig,
    role_tx: watch::Sender<TabRole>,
) {
    let mut rx = channel.subscribe();
    let claim_window = Duration::from_millis(config.claim_window_ms);
    let heartbeat_interval = Duration::from_millis(config.heartbeat_interval_ms);
    let leader_timeout = heartbeat_interval * config.missed_heartbeats.max(1);

    let _ = channel
        .publish(TabMessage::Announce {
            tab_id: tab_id.clone(),
        })
        .await;

    let mut role = TabRole::Electing;
    let mut deadline = Instant::now() + claim_window;
    let mut last_leader_seen = Instant::now();

    loop {
        let _ = role_tx.send(role.clone());

        tokio::select! {
            message = rx.recv() => {
                let message = match message {
                    Ok(message) => message,
                    // Lagged or closed: re-enter election to resync.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                role = handle_message(
                    &tab_id,
                    role,
                    message,
                    &channel,
                    &mut last_leader_seen,
                    &mut deadline,
                    claim_window,
                )
                .await;
            }
            _ = sleep_until(deadline) => {
                match &role {
                    TabRole::Electing => {
                        // Nobody spoke up: claim leadership.
                        info!(tab_id = %tab_id, "claiming tab leadership");
                        let _ = channel
                            .publish(TabMessage::LeaderClaim { tab_id: tab_id.clone() })
                            .await;
                        role = TabRole::Leader;
                        deadline = Instant::now() + heartbeat_interval;
                    }
                    TabRole::Leader => {
                        let _ = channel
                            .publish(TabMessage::Heartbeat { tab_id: tab_id.clone() })
                            .await;
                        deadline = Instant::now() + heartbeat_interval;
                    }
                    TabRole::Follower { leader } => {
                        if last_leader_seen.elapsed() >= leader_timeout {
                            debug!(tab_id = %tab_id, leader = %leader, "leader went silent, re-electing");
                            let _ = channel
                                .publish(TabMessage::Announce { tab_id: tab_id.clone() })
                                .await;
                            role = TabRole::Electing;
                            deadline = Instant::now() + claim_window;
                        } else {
                            deadline = Instant::now() + heartbeat_interval;
                        }
                    }
                }
            }
        }
    }
}

async fn handle_message(
    tab_id: &str,
    role: TabRole,
    message: TabMessage,
    channel: &Arc<dyn TabChannel>,
    last_leader_seen: &mut Instant,
    deadline: &mut Instant,
    claim_window: Duration,
) -> TabRole {
    match message {
        TabMessage::Announce { tab_id: other } if other != tab_id => {
            // A newcomer is listening: the leader identifies itself.
            if role == TabRole::Leader {
                let _ = channel
                    .publish(TabMessage::Heartbeat {
                        tab_id: tab_id.to_string(),
                    })
                    .await;
            }
            role
        }
        TabMessage::LeaderClaim { tab_id: other } | TabMessage::Heartbeat { tab_id: other }
            if other != tab_id =>
        {
            match &role {
                TabRole::Electing => {
                    *last_leader_seen = Instant::now();
                    TabRole::Follower { leader: other }
                }
                TabRole::Leader => {
                    // Contested leadership: the lexicographically largest
                    // tab id wins.
                    if other.as_str() > tab_id {
                        debug!(tab_id = %tab_id, winner = %other, "yielding leadership");
                        *last_leader_seen = Instant::now();
                        TabRole::Follower { leader: other }
                    } else {
                        let _ = channel
                            .publish(TabMessage::LeaderClaim {
                                tab_id: tab_id.to_string(),
                            })
                            .await;
                        role
                    }
                }
                TabRole::Follower { leader } => {
                    if other == *leader || other.as_str() > leader.as_str() {
                        *last_leader_seen = Instant::now();
                        TabRole::Follower { leader: other }
                    } else {
                        role
                    }
                }
            }
        }
        TabMessage::Resign { tab_id: other } if other != tab_id => match &role {
            TabRole::Follower { leader } if *leader == other => {
                let _ = channel
                    .publish(TabMessage::Announce {
                        tab_id: tab_id.to_string(),
                    })
                    .await;
                *deadline = Instant::now() + claim_window;
                TabRole::Electing
            }
            _ => role,
        },
        // Own echoes and forwarded operations are not election traffic.
        _ => role,
    }
}
