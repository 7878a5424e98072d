//! Room actor: one tokio task per room
//!
//! All access to a [`Room`] goes through its [`RoomHandle`]. The task owning
//! the room multiplexes commands, the fixed tick and broadcast deadlines, so
//! the room itself never needs a lock.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::room::{AttachError, Room, RoomStatus, RoomSummary};
use super::transport::Transport;
use crate::util::time::{tick_period, Clock};

/// Commands queued per room before `handle_message` starts dropping input
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

pub enum RoomCommand {
    Attach {
        transport: Arc<dyn Transport>,
        name: String,
        reply: oneshot::Sender<Result<String, AttachError>>,
    },
    Detach {
        player_id: String,
    },
    Message {
        player_id: String,
        payload: Bytes,
    },
    Shutdown,
}

/// Cloneable handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    id: Arc<str>,
    cmd_tx: mpsc::Sender<RoomCommand>,
    summary: Arc<RwLock<RoomSummary>>,
}

impl RoomHandle {
    /// Start the actor for `room` on the current tokio runtime
    pub fn spawn(room: Room, clock: Arc<dyn Clock>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let summary = Arc::new(RwLock::new(room.summary()));
        let handle = Self {
            id: Arc::from(room.id()),
            cmd_tx,
            summary: Arc::clone(&summary),
        };
        let task = RoomTask {
            room,
            cmd_rx,
            summary,
            clock,
        };
        tokio::spawn(task.run());
        handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn attach(
        &self,
        transport: Arc<dyn Transport>,
        name: String,
    ) -> Result<String, AttachError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomCommand::Attach {
                transport,
                name,
                reply,
            })
            .await
            .map_err(|_| AttachError::RoomClosed)?;
        rx.await.map_err(|_| AttachError::RoomClosed)?
    }

    pub async fn detach(&self, player_id: String) {
        let _ = self.cmd_tx.send(RoomCommand::Detach { player_id }).await;
    }

    /// Queue a command frame. Returns false when the frame was dropped.
    pub fn handle_message(&self, player_id: &str, payload: Bytes) -> bool {
        self.cmd_tx
            .try_send(RoomCommand::Message {
                player_id: player_id.to_string(),
                payload,
            })
            .is_ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RoomCommand::Shutdown).await;
    }

    pub fn summary(&self) -> RoomSummary {
        self.summary.read().clone()
    }

    pub fn player_count(&self) -> usize {
        self.summary.read().players
    }

    pub fn is_full(&self) -> bool {
        let summary = self.summary.read();
        summary.players >= summary.max_players
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Owns the room and drives it
pub struct RoomTask {
    room: Room,
    cmd_rx: mpsc::Receiver<RoomCommand>,
    summary: Arc<RwLock<RoomSummary>>,
    clock: Arc<dyn Clock>,
}

impl RoomTask {
    pub async fn run(mut self) {
        info!(room_id = %self.room.id(), "room started");

        let mut tick_interval = interval(tick_period(self.room.tuning().tick_rate));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flush_at = self.room.next_flush_deadline().map(|at| self.instant_for(at));

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(RoomCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                _ = tick_interval.tick() => self.room.tick(),
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {}
            }

            self.room.flush_if_due();
            self.publish_summary();
        }

        self.room.destroy();
        self.publish_summary();
        debug!(room_id = %self.room.id(), "room task finished");
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Attach {
                transport,
                name,
                reply,
            } => {
                let result = self.room.attach(transport, &name);
                if let (Err(_), Ok(player_id)) = (reply.send(result.clone()), result) {
                    // Caller went away before hearing back
                    self.room.detach(&player_id);
                }
            }
            RoomCommand::Detach { player_id } => {
                self.room.detach(&player_id);
            }
            RoomCommand::Message { player_id, payload } => {
                self.room.handle_message(&player_id, &payload);
            }
            RoomCommand::Shutdown => {}
        }
    }

    /// Map a room clock deadline onto the tokio timer
    fn instant_for(&self, deadline_ms: u64) -> Instant {
        let delay = deadline_ms.saturating_sub(self.clock.now_ms());
        Instant::now() + Duration::from_millis(delay)
    }

    fn publish_summary(&self) {
        let players = self.room.player_count();
        let mut summary = self.summary.write();
        summary.players = players;
        summary.status = if players > 0 {
            RoomStatus::Live
        } else {
            RoomStatus::Idle
        };
        summary.last_activity_ms = self.room.last_activity();
    }
}
