//! Crossline Server - authoritative room server for a multiplayer arena shooter
//!
//! - `game`: room simulation, actor and registry
//! - `ws`: binary wire protocol and WebSocket sessions
//! - `http`: lobby endpoints and static client files

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
