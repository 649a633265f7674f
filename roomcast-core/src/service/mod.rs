//! Collaborator interfaces consumed by the backplane
//!
//! Rooms, membership and persistence live outside the fan-out core. The
//! HTTP layer consults them before joining or sending and hands off sent
//! messages; neither influences delivery semantics.

pub mod message_store;
pub mod room_directory;

pub use message_store::{InMemoryMessageStore, MessageStore};
pub use room_directory::{InMemoryRoomDirectory, RoomDirectory};
