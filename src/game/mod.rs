//! Game simulation modules

pub mod actor;
pub mod arena;
pub mod broadcast;
pub mod combat;
pub mod entity;
pub mod physics;
pub mod registry;
pub mod room;
pub mod snapshot;
pub mod transport;
pub mod tuning;

pub use actor::RoomHandle;
pub use registry::{CreateRoom, RegistryError, RoomRegistry};
pub use room::{AttachError, Room, RoomSettings, RoomSummary};
pub use transport::{Transport, TransportError};
pub use tuning::Tuning;
