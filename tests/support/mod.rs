// Shared helpers for driving a room without sockets or wall-clock time.
#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crossline_server::game::entity::Player;
use crossline_server::game::room::{Room, RoomSettings};
use crossline_server::game::snapshot::StateDelta;
use crossline_server::game::transport::{Transport, TransportError};
use crossline_server::game::Tuning;
use crossline_server::util::time::{Clock, ManualClock};
use crossline_server::ws::protocol::{decode_server_frame, encode_command, ClientCommand, ServerFrame};

pub const SEED: u64 = 7;

/// Transport that keeps every frame and close request for inspection.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<Bytes>>,
    closes: Mutex<Vec<(u16, String)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Decode and clear everything received so far
    pub fn take(&self) -> Vec<ServerFrame> {
        self.frames
            .lock()
            .drain(..)
            .map(|frame| decode_server_frame(&frame).expect("server frame decodes"))
            .collect()
    }

    /// State updates received so far, clearing the buffer
    pub fn take_deltas(&self) -> Vec<StateDelta> {
        self.take()
            .into_iter()
            .filter_map(|frame| match frame {
                ServerFrame::StateUpdate(delta) => Some(delta),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: Bytes, _is_binary: bool) -> Result<(), TransportError> {
        if !self.closes.lock().is_empty() {
            return Err(TransportError::Closed);
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.closes.lock().push((code, reason.to_string()));
    }
}

/// Transport whose every write fails with the given error.
pub struct FailingTransport {
    error: TransportError,
    attempts: Mutex<usize>,
}

impl FailingTransport {
    pub fn new(error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            error,
            attempts: Mutex::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

impl Transport for FailingTransport {
    fn send(&self, _frame: Bytes, _is_binary: bool) -> Result<(), TransportError> {
        *self.attempts.lock() += 1;
        Err(self.error.clone())
    }

    fn close(&self, _code: u16, _reason: &str) {}
}

pub struct TestRoom {
    pub room: Room,
    pub clock: Arc<ManualClock>,
    joined: Vec<Arc<RecordingTransport>>,
}

impl TestRoom {
    pub fn new() -> Self {
        Self::with_tuning(Tuning::default())
    }

    pub fn with_tuning(tuning: Tuning) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let room = Room::new(
            RoomSettings {
                id: "test-room".into(),
                name: "Test Room".into(),
                max_players: 4,
                persistent: false,
                seed: Some(SEED),
            },
            Arc::new(tuning),
            clock.clone(),
        );
        Self {
            room,
            clock,
            joined: Vec::new(),
        }
    }

    /// Attach a recording participant and discard its join frames
    pub fn join(&mut self, name: &str) -> (String, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new();
        let id = self
            .room
            .attach(transport.clone(), name)
            .expect("attach succeeds");
        transport.take();
        self.joined.push(transport.clone());
        (id, transport)
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Set up player state, then flush and discard the resulting frames so
    /// the scenario starts from a clean slate
    pub fn edit(&mut self, id: &str, edit: impl FnOnce(&mut Player)) {
        assert!(self.room.edit_player(id, edit), "player exists");
        self.room.flush();
        for transport in &self.joined {
            transport.take();
        }
    }

    pub fn place(&mut self, id: &str, x: f32, y: f32, angle: f32) {
        self.edit(id, |player| {
            player.x = x;
            player.y = y;
            player.angle = angle;
        });
    }

    /// Send an encoded command frame, as a socket would
    pub fn send(&mut self, id: &str, command: ClientCommand) {
        let frame = encode_command(&command);
        self.room.handle_message(id, &frame);
    }

    /// Advance the clock by one tick period and tick
    pub fn step(&mut self) {
        let step = self.room.tuning().step_ms().round() as u64;
        self.clock.advance(step);
        self.room.tick();
    }
}
