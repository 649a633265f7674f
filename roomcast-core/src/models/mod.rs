pub mod chat;
pub mod id;

pub use chat::{ChatMessage, ChatRoom, CreateRoomRequest, SendMessageRequest};
pub use id::{generate_id, ConnectionId, RoomId, UserId};
