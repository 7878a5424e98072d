//! Binary wire protocol
//!
//! All multi-byte values are little-endian. Strings are a `u8` byte length
//! followed by UTF-8 bytes, so they are capped at 255 bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::game::entity::{bullet_fields, player_fields};
use crate::game::snapshot::{BulletRecord, PlayerRecord, StateDelta};

pub const MSG_STATE_UPDATE: u8 = 1;
pub const MSG_INIT: u8 = 2;
pub const MSG_ERROR: u8 = 3;

pub const CMD_MOVE: u8 = 1;
pub const CMD_SHOOT: u8 = 2;
pub const CMD_SHIELD: u8 = 3;
pub const CMD_DASH: u8 = 4;
pub const CMD_RESPAWN: u8 = 5;

const PLAYER_FLAG_FULL_SYNC: u8 = 1 << 0;
const PLAYER_FLAG_ALIVE: u8 = 1 << 1;
const PLAYER_FLAG_SHIELD_ACTIVE: u8 = 1 << 2;
const PLAYER_FLAG_NAME: u8 = 1 << 3;
const BULLET_FLAG_FULL_SYNC: u8 = 1 << 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("command {kind} expects {expected} bytes, got {actual}")]
    Length {
        kind: u8,
        expected: usize,
        actual: usize,
    },

    #[error("non-finite coordinate")]
    NonFinite,

    #[error("frame truncated")]
    Truncated,

    #[error("invalid utf-8 string")]
    InvalidUtf8,
}

/// Commands a client can send
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientCommand {
    Move { x: f32, y: f32, angle: Option<f32> },
    Shoot,
    Shield { active: bool },
    Dash { dir_x: f32, dir_y: f32 },
    Respawn,
}

fn expected_len(kind: u8) -> Option<usize> {
    match kind {
        CMD_MOVE => Some(13),
        CMD_SHOOT | CMD_RESPAWN => Some(1),
        CMD_SHIELD => Some(2),
        CMD_DASH => Some(9),
        _ => None,
    }
}

/// Decode one client command frame. Frames whose length does not match the
/// declared type exactly are rejected.
pub fn decode_command(frame: &[u8]) -> Result<ClientCommand, DecodeError> {
    let kind = *frame.first().ok_or(DecodeError::Empty)?;
    let expected = expected_len(kind).ok_or(DecodeError::UnknownType(kind))?;
    if frame.len() != expected {
        return Err(DecodeError::Length {
            kind,
            expected,
            actual: frame.len(),
        });
    }
    let mut buf = &frame[1..];

    let command = match kind {
        CMD_MOVE => {
            let x = buf.get_f32_le();
            let y = buf.get_f32_le();
            let angle = buf.get_f32_le();
            if !x.is_finite() || !y.is_finite() {
                return Err(DecodeError::NonFinite);
            }
            ClientCommand::Move {
                x,
                y,
                angle: angle.is_finite().then_some(angle),
            }
        }
        CMD_SHOOT => ClientCommand::Shoot,
        CMD_SHIELD => ClientCommand::Shield {
            active: buf.get_u8() != 0,
        },
        CMD_DASH => {
            // Garbage directions fall back to the player's own heading
            let finite_or_zero = |v: f32| if v.is_finite() { v } else { 0.0 };
            ClientCommand::Dash {
                dir_x: finite_or_zero(buf.get_f32_le()),
                dir_y: finite_or_zero(buf.get_f32_le()),
            }
        }
        _ => ClientCommand::Respawn,
    };
    Ok(command)
}

/// Encode a client command (used by bots and tests)
pub fn encode_command(command: &ClientCommand) -> Bytes {
    let mut buf = BytesMut::with_capacity(13);
    match *command {
        ClientCommand::Move { x, y, angle } => {
            buf.put_u8(CMD_MOVE);
            buf.put_f32_le(x);
            buf.put_f32_le(y);
            buf.put_f32_le(angle.unwrap_or(f32::NAN));
        }
        ClientCommand::Shoot => buf.put_u8(CMD_SHOOT),
        ClientCommand::Shield { active } => {
            buf.put_u8(CMD_SHIELD);
            buf.put_u8(active as u8);
        }
        ClientCommand::Dash { dir_x, dir_y } => {
            buf.put_u8(CMD_DASH);
            buf.put_f32_le(dir_x);
            buf.put_f32_le(dir_y);
        }
        ClientCommand::Respawn => buf.put_u8(CMD_RESPAWN),
    }
    buf.freeze()
}

fn put_short_str(buf: &mut BytesMut, value: &str) {
    let mut end = value.len().min(u8::MAX as usize);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u8(end as u8);
    buf.put_slice(&value.as_bytes()[..end]);
}

pub fn encode_init(player_id: &str, width: f32, height: f32) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + player_id.len() + 8);
    buf.put_u8(MSG_INIT);
    put_short_str(&mut buf, player_id);
    buf.put_f32_le(width);
    buf.put_f32_le(height);
    buf.freeze()
}

pub fn encode_error(message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + message.len());
    buf.put_u8(MSG_ERROR);
    put_short_str(&mut buf, message);
    buf.freeze()
}

fn player_wire_mask(rec: &PlayerRecord) -> u16 {
    use player_fields::*;
    [
        (rec.position.is_some(), POSITION),
        (rec.angle.is_some(), ANGLE),
        (rec.health.is_some(), HEALTH),
        (rec.score.is_some(), SCORE),
        (rec.shield_charge.is_some(), SHIELD),
        (rec.dash_charge.is_some(), DASH),
        (rec.name.is_some(), NAME),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .fold(rec.mask & STATUS, |mask, (_, bit)| mask | bit)
}

fn bullet_wire_mask(rec: &BulletRecord) -> u8 {
    let mut mask = 0u16;
    if rec.position.is_some() {
        mask |= bullet_fields::POSITION;
    }
    if rec.angle.is_some() {
        mask |= bullet_fields::ANGLE;
    }
    if rec.owner.is_some() {
        mask |= bullet_fields::OWNER;
    }
    mask as u8
}

fn put_player(buf: &mut BytesMut, rec: &PlayerRecord) {
    let mut flags = 0u8;
    if rec.full_sync {
        flags |= PLAYER_FLAG_FULL_SYNC;
    }
    if rec.alive {
        flags |= PLAYER_FLAG_ALIVE;
    }
    if rec.shield_active {
        flags |= PLAYER_FLAG_SHIELD_ACTIVE;
    }
    if rec.name.is_some() {
        flags |= PLAYER_FLAG_NAME;
    }
    buf.put_u8(flags);
    put_short_str(buf, &rec.id);
    if let Some(name) = &rec.name {
        put_short_str(buf, name);
    }
    buf.put_u16_le(player_wire_mask(rec));
    if let Some((x, y)) = rec.position {
        buf.put_f32_le(x);
        buf.put_f32_le(y);
    }
    for value in [
        rec.angle,
        rec.health,
        rec.score,
        rec.shield_charge,
        rec.dash_charge,
    ]
    .into_iter()
    .flatten()
    {
        buf.put_f32_le(value);
    }
}

fn put_bullet(buf: &mut BytesMut, rec: &BulletRecord) {
    buf.put_u8(if rec.full_sync { BULLET_FLAG_FULL_SYNC } else { 0 });
    buf.put_u32_le(rec.id);
    buf.put_u8(bullet_wire_mask(rec));
    if let Some((x, y)) = rec.position {
        buf.put_f32_le(x);
        buf.put_f32_le(y);
    }
    if let Some(angle) = rec.angle {
        buf.put_f32_le(angle);
    }
    if let Some(owner) = &rec.owner {
        put_short_str(buf, owner);
    }
}

fn count(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

/// Encode a STATE_UPDATE frame
pub fn encode_state_update(delta: &StateDelta) -> Bytes {
    let players = count(delta.players.len());
    let removed_players = count(delta.removed_players.len());
    let bullets = count(delta.bullets.len());
    let removed_bullets = count(delta.removed_bullets.len());

    let mut buf = BytesMut::with_capacity(
        9 + delta.players.len() * 48 + delta.bullets.len() * 24 + delta.removed_bullets.len() * 4,
    );
    buf.put_u8(MSG_STATE_UPDATE);
    buf.put_u16_le(players);
    buf.put_u16_le(removed_players);
    buf.put_u16_le(bullets);
    buf.put_u16_le(removed_bullets);

    for rec in delta.players.iter().take(players as usize) {
        put_player(&mut buf, rec);
    }
    for id in delta.removed_players.iter().take(removed_players as usize) {
        put_short_str(&mut buf, id);
    }
    for rec in delta.bullets.iter().take(bullets as usize) {
        put_bullet(&mut buf, rec);
    }
    for id in delta.removed_bullets.iter().take(removed_bullets as usize) {
        buf.put_u32_le(*id);
    }
    buf.freeze()
}

/// Decoded server → client frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Init {
        player_id: String,
        width: f32,
        height: f32,
    },
    StateUpdate(StateDelta),
    Error(String),
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            Err(DecodeError::Truncated)
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    fn short_str(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        std::str::from_utf8(head)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    fn opt_f32(&mut self, mask: u16, bit: u16) -> Result<Option<f32>, DecodeError> {
        if mask & bit != 0 {
            self.f32().map(Some)
        } else {
            Ok(None)
        }
    }
}

fn read_player(r: &mut Reader<'_>) -> Result<PlayerRecord, DecodeError> {
    use player_fields::*;
    let flags = r.u8()?;
    let id = r.short_str()?;
    let name = if flags & PLAYER_FLAG_NAME != 0 {
        Some(r.short_str()?)
    } else {
        None
    };
    let mask = r.u16()?;
    let position = if mask & POSITION != 0 {
        Some((r.f32()?, r.f32()?))
    } else {
        None
    };
    Ok(PlayerRecord {
        id,
        full_sync: flags & PLAYER_FLAG_FULL_SYNC != 0,
        alive: flags & PLAYER_FLAG_ALIVE != 0,
        shield_active: flags & PLAYER_FLAG_SHIELD_ACTIVE != 0,
        mask,
        name,
        position,
        angle: r.opt_f32(mask, ANGLE)?,
        health: r.opt_f32(mask, HEALTH)?,
        score: r.opt_f32(mask, SCORE)?,
        shield_charge: r.opt_f32(mask, SHIELD)?,
        dash_charge: r.opt_f32(mask, DASH)?,
    })
}

fn read_bullet(r: &mut Reader<'_>) -> Result<BulletRecord, DecodeError> {
    let flags = r.u8()?;
    let id = r.u32()?;
    let mask = r.u8()?;
    let wide = mask as u16;
    let position = if wide & bullet_fields::POSITION != 0 {
        Some((r.f32()?, r.f32()?))
    } else {
        None
    };
    let angle = r.opt_f32(wide, bullet_fields::ANGLE)?;
    let owner = if wide & bullet_fields::OWNER != 0 {
        Some(r.short_str()?)
    } else {
        None
    };
    Ok(BulletRecord {
        id,
        full_sync: flags & BULLET_FLAG_FULL_SYNC != 0,
        mask,
        position,
        angle,
        owner,
    })
}

/// Decode a server frame (client side of the protocol)
pub fn decode_server_frame(frame: &[u8]) -> Result<ServerFrame, DecodeError> {
    let mut r = Reader { buf: frame };
    let kind = r.u8().map_err(|_| DecodeError::Empty)?;
    match kind {
        MSG_INIT => Ok(ServerFrame::Init {
            player_id: r.short_str()?,
            width: r.f32()?,
            height: r.f32()?,
        }),
        MSG_ERROR => Ok(ServerFrame::Error(r.short_str()?)),
        MSG_STATE_UPDATE => {
            let players = r.u16()? as usize;
            let removed_players = r.u16()? as usize;
            let bullets = r.u16()? as usize;
            let removed_bullets = r.u16()? as usize;
            let mut delta = StateDelta::default();
            for _ in 0..players {
                delta.players.push(read_player(&mut r)?);
            }
            for _ in 0..removed_players {
                delta.removed_players.push(r.short_str()?);
            }
            for _ in 0..bullets {
                delta.bullets.push(read_bullet(&mut r)?);
            }
            for _ in 0..removed_bullets {
                delta.removed_bullets.push(r.u32()?);
            }
            Ok(ServerFrame::StateUpdate(delta))
        }
        other => Err(DecodeError::UnknownType(other)),
    }
}
